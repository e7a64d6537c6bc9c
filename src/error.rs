//! 协程错误码
//!
//! 固定的错误码表，所有失败都以类型化的错误同步返回，
//! 等待结果（WaitResult）按值返回，不走 Err 通道

use thiserror::Error;

/// 协程核心错误
///
/// 分配/保护失败在本地处理（重试一次或降级为无保护栈），
/// 其余错误同步返回给调用者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoError {
    /// 栈内存分配失败（已重试一次）
    #[error("stack allocation failed (size={0})")]
    StackAllocFailed(usize),

    /// 上下文构造失败（栈太小，放不下初始帧）
    #[error("make context failed (stack size={0})")]
    MakeContextFailed(usize),

    /// 栈保护页安装失败（非致命，上下文以无保护方式继续）
    #[error("protect stack failed")]
    ProtectStackFailed,

    /// 栈保护页解除失败
    #[error("unprotect stack failed")]
    UnprotectStackFailed,
}

/// 等待结果
///
/// rutex 的 wait 以及切换器的 sleep_until 的返回值，
/// 对应 futex 风格的四种唤醒方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitResult {
    /// 被 wake 正常唤醒
    Success = 0,
    /// 截止时间到达
    Timeout = 1,
    /// 不满足等待条件，立即返回
    WouldBlock = 2,
    /// 被中断
    Interrupted = 3,
}

impl WaitResult {
    /// 错误码转静态字符串（用于日志）
    pub fn as_str(self) -> &'static str {
        match self {
            WaitResult::Success => "wait_return_success",
            WaitResult::Timeout => "wait_return_etimeout",
            WaitResult::WouldBlock => "wait_return_ewouldblock",
            WaitResult::Interrupted => "wait_return_eintr",
        }
    }

    /// 是否唤醒成功
    #[inline]
    pub fn is_success(self) -> bool {
        self == WaitResult::Success
    }
}

impl std::fmt::Display for WaitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
