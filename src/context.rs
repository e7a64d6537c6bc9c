//! 协程执行上下文
//!
//! 一个可独立切换的栈 + 保存的机器状态，三种切换操作：
//! - `swap_in`：把调用方状态存进本线程的 TLS 槽位，切入本上下文
//! - `swap_out`：切回 TLS 槽位里保存的状态（与最近一次 swap_in 配对）
//! - `swap_to`：绕过 TLS 槽位，对等上下文间直接切换（调度器续接用）
//!
//! x86_64 System V：切换只需保存被调用者保存寄存器，
//! 进入新协程通过 ret 弹出蹦床地址实现

use std::cell::UnsafeCell;
use std::arch::naked_asm;
use std::ptr::NonNull;

use crate::error::CoError;
use crate::stack::StackTraits;

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!("gocoro only supports x86_64 System V targets");

/// 协程入口函数
///
/// 入口不允许返回：协程结束前必须 swap_out/swap_to 交还执行权，
/// 直接返回会被蹦床截住并中止进程
pub type ContextEntry = extern "C" fn(usize);

/// 最小栈大小（至少放得下初始帧）
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// 被调用者保存寄存器组
///
/// 字段顺序与 context_switch 里的偏移一一对应
#[repr(C)]
#[derive(Debug, Clone, Default)]
struct RegContext {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

/// 上下文切换
///
/// 把当前被调用者保存寄存器存入 old，再从 new 恢复并 ret 过去；
/// 本函数在另一个上下文切回 old 时才「返回」
///
/// # Safety
/// 两个指针必须有效；new 必须是已初始化的上下文
/// （由 Context::new 构造或此前某次 context_switch 保存）
#[unsafe(naked)]
extern "C" fn context_switch(_old: *mut RegContext, _new: *const RegContext) {
    naked_asm!(
        // 保存当前状态到 old (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // 从 new (rsi) 恢复
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // 新协程首次进入时弹出蹦床地址，其余情况回到 context_switch 调用点之后
        "ret",
    )
}

/// 新协程的入口蹦床
///
/// 首次切入时寄存器由 Context::new 摆好：r12 = 参数，r13 = 入口函数
#[unsafe(naked)]
extern "C" fn context_entry_trampoline() {
    naked_asm!(
        // 入口处 rsp % 16 == 8，调用前补齐到 16 对齐
        "sub rsp, 8",
        "mov rdi, r12",
        "call r13",
        // 入口函数返回：协程没有交还执行权，无处可去
        "call {returned}",
        returned = sym context_entry_returned,
    )
}

extern "C" fn context_entry_returned() -> ! {
    log::error!("coroutine entry returned without swapping out, aborting");
    std::process::abort();
}

thread_local! {
    /// 每个承载线程一个槽位，保存 swap_in 调用方的状态
    static TLS_CONTEXT: UnsafeCell<RegContext> = UnsafeCell::new(RegContext::default());
}

#[inline]
fn tls_context() -> *mut RegContext {
    TLS_CONTEXT.with(|c| c.get())
}

/// 协程执行上下文
///
/// 拥有一条独立栈和保存的机器状态；同一时刻最多在一个承载线程上
/// 活跃，内部不加锁，跨线程恢复的约束由调度器保证
#[derive(Debug)]
pub struct Context {
    regs: RegContext,
    stack: NonNull<u8>,
    stack_size: usize,
    /// 实际生效的保护页数（安装失败时为 0）
    protect_pages: usize,
}

impl Context {
    /// 创建上下文
    ///
    /// 通过全局分配器钩子取得栈内存，构造初始寄存器组指向入口蹦床；
    /// 配置了保护页数时在栈低地址端安装保护页，
    /// 安装失败只记日志，上下文以无保护方式继续
    pub fn new(entry: ContextEntry, arg: usize, stack_size: usize) -> Result<Self, CoError> {
        if stack_size < MIN_STACK_SIZE {
            return Err(CoError::MakeContextFailed(stack_size));
        }

        let stack = StackTraits::alloc_stack(stack_size)?;

        // 栈向下增长：栈顶在高地址端，向下取整到 16 字节对齐，
        // 预留两个槽位：[蹦床地址][0 哨兵返回地址]
        let regs = unsafe {
            let top = (stack.as_ptr() as usize + stack_size) & !(STACK_TOP_ALIGN - 1);
            let sp = (top - 2 * std::mem::size_of::<u64>()) as *mut u64;
            sp.write(context_entry_trampoline as usize as u64);
            sp.add(1).write(0);

            RegContext {
                rsp: sp as u64,
                r12: arg as u64,
                r13: entry as usize as u64,
                ..RegContext::default()
            }
        };

        let mut protect_pages = StackTraits::protect_page_count();
        if protect_pages > 0
            && !StackTraits::protect_stack(stack.as_ptr(), stack_size, protect_pages)
        {
            protect_pages = 0;
        }

        Ok(Self {
            regs,
            stack,
            stack_size,
            protect_pages,
        })
    }

    /// 切入本上下文
    ///
    /// 调用方状态保存到本线程的 TLS 槽位，本函数在协程 swap_out
    /// 或其他上下文切回时才返回
    #[inline]
    pub fn swap_in(&mut self) {
        unsafe { context_switch(tls_context(), &self.regs) };
    }

    /// 切出本上下文，回到 TLS 槽位里保存的调用方
    ///
    /// 只能在本上下文内部调用，与最近一次本线程上的 swap_in 配对
    #[inline]
    pub fn swap_out(&mut self) {
        unsafe { context_switch(&mut self.regs, tls_context()) };
    }

    /// 对等切换：状态存入本上下文，直接切到 other，不经过 TLS 槽位
    #[inline]
    pub fn swap_to(&mut self, other: &Context) {
        unsafe { context_switch(&mut self.regs, &other.regs) };
    }

    /// 栈大小
    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// 保护页是否生效
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.protect_pages > 0
    }
}

const STACK_TOP_ALIGN: usize = 16;

impl Drop for Context {
    fn drop(&mut self) {
        // 先解除保护再释放：带着 PROT_NONE 释放是未定义行为
        if self.protect_pages > 0 {
            StackTraits::unprotect_stack(self.stack.as_ptr(), self.protect_pages);
        }
        StackTraits::free_stack(self.stack.as_ptr(), self.stack_size);
    }
}

// 上下文可以随协程在承载线程之间迁移，同一时刻只在一个线程上活跃
unsafe impl Send for Context {}
