//! 挂起切换器
//!
//! 等待原语（rutex）与执行底座之间的适配层：
//! - `PThreadSwitcher`：普通线程底座，parking_lot 条件变量挂起/唤醒
//! - `CoroutineSwitcher`：协程底座，swap_out 挂起，唤醒回调交还调度器
//!
//! 协议是 mark → 入队 → sleep，唤醒方 wake：
//! waiting 标志在 mark 里置位，wake 以事务方式检查并清除，
//! 因此 wake 落在 sleep 开始停靠之前或之后行为一致，
//! 且一个睡眠周期内 K 个并发 wake 恰好一个成功

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::context::Context;
use crate::error::WaitResult;

/// 挂起切换器接口
///
/// 每个等待者一个实例；mark 和 sleep 必须在被挂起的执行流自身上
/// 调用，wake 可以来自任意线程
pub trait RoutineSwitcher: Send + Sync {
    /// 宣告即将睡眠，置位 waiting 标志
    ///
    /// 必须在把自己挂到等待队列之前调用，此后落地的 wake 不会丢失
    fn mark(&self);

    /// 无限期睡眠，直到被 wake
    fn sleep(&self) -> WaitResult {
        self.sleep_until(None)
    }

    /// 睡眠到绝对截止时间（None 表示无限期）
    ///
    /// 超时返回不清除 waiting：睡眠周期保持开放，之后到达的 wake
    /// 仍然认领本周期。谁最终关闭周期（再次 sleep 吸收 wake，
    /// 或自己 wake 一下）由上层等待原语裁决
    fn sleep_until(&self, deadline: Option<Instant>) -> WaitResult;

    /// 唤醒，返回 true 表示本次 wake 完成了 waiting 的清除
    ///
    /// 同一个睡眠周期的并发 wake 中恰好一个返回 true
    fn wake(&self) -> bool;

    /// 切换器是否仍然有效（执行流未销毁）
    fn valid(&self) -> bool;
}

/// 切换器共享句柄
///
/// 唤醒方在结构锁内克隆句柄、锁外调用 wake，
/// 等待者超时自行摘除时切换器不会在唤醒方手里失效
pub type SwitcherRef = Arc<dyn RoutineSwitcher>;

/// 线程底座切换器
///
/// waiting 标志由互斥锁保护，sleep 在条件变量上等待；
/// 超时路径自己清除 waiting，之后的 wake 返回 false
pub struct PThreadSwitcher {
    waiting: Mutex<bool>,
    cond: Condvar,
    valid: AtomicBool,
}

impl PThreadSwitcher {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(false),
            cond: Condvar::new(),
            valid: AtomicBool::new(true),
        }
    }
}

impl Default for PThreadSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutineSwitcher for PThreadSwitcher {
    fn mark(&self) {
        *self.waiting.lock() = true;
    }

    fn sleep_until(&self, deadline: Option<Instant>) -> WaitResult {
        let mut waiting = self.waiting.lock();
        // wake 已经落地时 waiting 为 false，立即返回
        while *waiting {
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut waiting, d).timed_out() {
                        if *waiting {
                            // 周期保持开放（waiting 不清除），在途的
                            // wake 仍会认领它，归属由调用方裁决
                            return WaitResult::Timeout;
                        }
                        // 超时与唤醒并发，唤醒已经清除标志，算成功
                        return WaitResult::Success;
                    }
                }
                None => self.cond.wait(&mut waiting),
            }
        }
        WaitResult::Success
    }

    fn wake(&self) -> bool {
        if !self.valid.load(Ordering::Acquire) {
            log::warn!("wake on an invalid pthread switcher, ignored");
            return false;
        }
        let mut waiting = self.waiting.lock();
        if *waiting {
            *waiting = false;
            self.cond.notify_one();
            true
        } else {
            false
        }
    }

    fn valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl Drop for PThreadSwitcher {
    fn drop(&mut self) {
        self.valid.store(false, Ordering::Release);
    }
}

thread_local! {
    /// 每个普通线程一个常驻切换器，随线程生命周期复用
    static PTHREAD_SWITCHER: Arc<PThreadSwitcher> = Arc::new(PThreadSwitcher::new());
}

/// 当前线程的线程底座切换器
pub fn pthread_cls_ref() -> Arc<PThreadSwitcher> {
    PTHREAD_SWITCHER.with(Arc::clone)
}

/// 协程底座切换器
///
/// sleep 通过 swap_out 交还执行权；wake 清除 waiting 后调用
/// 调度器提供的 resume 回调，由调度器决定何时何地重新切入。
/// 截止时间不在这里触发：调度器的定时器到点后调用 wake
pub struct CoroutineSwitcher {
    waiting: AtomicBool,
    valid: AtomicBool,
    ctx: UnsafeCell<*mut Context>,
    resume: Box<dyn Fn() + Send + Sync>,
}

impl CoroutineSwitcher {
    pub fn new(resume: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            waiting: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            ctx: UnsafeCell::new(std::ptr::null_mut()),
            resume,
        }
    }

    /// 绑定所属协程的上下文
    ///
    /// # Safety
    /// ctx 必须在切换器整个使用期间有效，且由调度器保证
    /// resume 回调只在协程已经 swap_out 之后才重新切入
    pub unsafe fn bind(&self, ctx: *mut Context) {
        *self.ctx.get() = ctx;
    }

    /// 标记切换器失效（协程结束时由调度器调用）
    ///
    /// 此后的 wake 是受检的空操作
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl RoutineSwitcher for CoroutineSwitcher {
    fn mark(&self) {
        self.waiting.store(true, Ordering::Release);
    }

    fn sleep_until(&self, _deadline: Option<Instant>) -> WaitResult {
        // wake 已经在 mark 之后落地，不必真的挂起
        if !self.waiting.load(Ordering::Acquire) {
            return WaitResult::Success;
        }
        let ctx = unsafe { *self.ctx.get() };
        debug_assert!(!ctx.is_null(), "coroutine switcher not bound to a context");
        // 交还执行权；重新切入即视为唤醒（超时由调度器定时器转成 wake）
        unsafe { (*ctx).swap_out() };
        WaitResult::Success
    }

    fn wake(&self) -> bool {
        if !self.valid.load(Ordering::Acquire) {
            log::warn!("wake on an invalid coroutine switcher, ignored");
            return false;
        }
        if self
            .waiting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        (self.resume)();
        true
    }

    fn valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl Drop for CoroutineSwitcher {
    fn drop(&mut self) {
        self.valid.store(false, Ordering::Release);
    }
}

// ctx 裸指针只在所属协程与调度器的约定下访问
unsafe impl Send for CoroutineSwitcher {}
unsafe impl Sync for CoroutineSwitcher {}

/// 切换器种类：底座判定谓词 + 当前执行流的切换器获取函数
#[derive(Clone, Copy)]
pub struct SwitcherKind {
    pub name: &'static str,
    /// 当前执行流是否运行在该底座上
    pub is_in_routine: fn() -> bool,
    /// 当前执行流的切换器
    pub current: fn() -> SwitcherRef,
}

struct PolicyState {
    kind: Option<SwitcherKind>,
    level: i64,
}

static POLICY: RwLock<PolicyState> = RwLock::new(PolicyState {
    kind: None,
    level: -1,
});

/// 切换器选择策略
///
/// 进程级单槽注册表：运行时框架启动时以一个优先级注册自己的
/// 切换器种类，等于或低于当前级别的注册被拒绝；
/// 取当前切换器时先问注册种类的底座谓词，不命中退回线程底座
pub struct RoutineSyncPolicy;

impl RoutineSyncPolicy {
    /// 注册切换器种类，level 必须高于当前级别
    pub fn register(kind: SwitcherKind, level: i64) -> bool {
        let mut st = POLICY.write();
        if level <= st.level {
            log::warn!(
                "switcher kind '{}' at level {} rejected, current level {}",
                kind.name,
                level,
                st.level
            );
            return false;
        }
        log::info!("switcher kind '{}' registered at level {}", kind.name, level);
        st.kind = Some(kind);
        st.level = level;
        true
    }

    /// 当前执行流的切换器
    pub fn cls_ref() -> SwitcherRef {
        let st = POLICY.read();
        if let Some(kind) = st.kind {
            if (kind.is_in_routine)() {
                return (kind.current)();
            }
        }
        pthread_cls_ref()
    }

    /// 当前执行流是否在普通线程底座上
    pub fn is_in_pthread() -> bool {
        let st = POLICY.read();
        match st.kind {
            Some(kind) => !(kind.is_in_routine)(),
            None => true,
        }
    }
}
