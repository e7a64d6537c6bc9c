//! 协程栈管理
//!
//! 栈内存通过全局可替换的分配器钩子获取，
//! 可选在栈的低地址端安装页对齐的保护页（mprotect PROT_NONE），
//! 把栈溢出变成立即段错误而不是静默踩内存
//!
//! 全局配置（分配器、保护页数）是进程启动期的一次性设置，
//! 用原子变量承载，读路径无锁

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::CoError;

/// 栈分配函数：size -> 基址（失败返回空指针）
pub type StackMallocFn = fn(usize) -> *mut u8;
/// 栈释放函数
pub type StackFreeFn = fn(*mut u8, usize);

/// 栈对齐：16 字节
const STACK_ALIGNMENT: usize = 16;

/// 分配器钩子（0 表示使用默认分配器）
static MALLOC_FN: AtomicUsize = AtomicUsize::new(0);
static FREE_FN: AtomicUsize = AtomicUsize::new(0);
/// 保护页数（0 表示关闭）
static PROTECT_PAGES: AtomicUsize = AtomicUsize::new(0);

fn default_malloc(size: usize) -> *mut u8 {
    match Layout::from_size_align(size, STACK_ALIGNMENT) {
        Ok(layout) => unsafe { alloc::alloc(layout) },
        Err(_) => std::ptr::null_mut(),
    }
}

fn default_free(ptr: *mut u8, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size, STACK_ALIGNMENT) {
        unsafe { alloc::dealloc(ptr, layout) };
    }
}

/// 栈属性：分配器钩子与保护页配置的全局入口
pub struct StackTraits;

impl StackTraits {
    /// 替换栈分配器（进程启动期一次性配置）
    pub fn set_allocator(malloc_fn: StackMallocFn, free_fn: StackFreeFn) {
        MALLOC_FN.store(malloc_fn as usize, Ordering::Release);
        FREE_FN.store(free_fn as usize, Ordering::Release);
    }

    /// 设置保护页数，0 关闭保护
    pub fn set_protect_page_count(pages: usize) {
        PROTECT_PAGES.store(pages, Ordering::Release);
    }

    /// 当前保护页数
    pub fn protect_page_count() -> usize {
        PROTECT_PAGES.load(Ordering::Acquire)
    }

    /// 系统页大小
    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    /// 分配栈内存，失败重试一次
    pub(crate) fn alloc_stack(size: usize) -> Result<NonNull<u8>, CoError> {
        let malloc_fn = Self::malloc_fn();
        for _ in 0..2 {
            let ptr = malloc_fn(size);
            if let Some(ptr) = NonNull::new(ptr) {
                return Ok(ptr);
            }
            log::warn!("stack allocation of {} bytes failed, retrying", size);
        }
        log::error!("stack allocation of {} bytes failed after retry", size);
        Err(CoError::StackAllocFailed(size))
    }

    /// 释放栈内存
    pub(crate) fn free_stack(ptr: *mut u8, size: usize) {
        (Self::free_fn())(ptr, size)
    }

    /// 在栈的低地址端安装保护页
    ///
    /// 返回 true 表示保护页已生效；栈太小或 mprotect 失败时
    /// 返回 false（只记日志，调用方以无保护方式继续）
    pub(crate) fn protect_stack(stack: *mut u8, size: usize, pages: usize) -> bool {
        if pages == 0 {
            return false;
        }

        let page_size = Self::page_size();
        // +1 保证保护页之上至少还剩一页可用栈
        if size <= (pages + 1) * page_size {
            log::warn!(
                "stack of {} bytes too small for {} protect pages, left unprotected",
                size,
                pages
            );
            return false;
        }

        // mprotect 要求页对齐，基址向上取整到页边界
        let addr = Self::align_up(stack as usize, page_size);
        let ret = unsafe { libc::mprotect(addr as *mut libc::c_void, pages * page_size, libc::PROT_NONE) };
        if ret == -1 {
            log::error!(
                "failed to protect stack at {:#x}: {}",
                addr,
                std::io::Error::last_os_error()
            );
            return false;
        }

        log::debug!("protected stack at {:#x} with {} pages", addr, pages);
        true
    }

    /// 解除栈保护，恢复正常读写
    ///
    /// 必须在释放栈内存之前调用，带着保护释放是未定义行为
    pub(crate) fn unprotect_stack(stack: *mut u8, pages: usize) -> bool {
        if pages == 0 {
            return true;
        }

        let page_size = Self::page_size();
        let addr = Self::align_up(stack as usize, page_size);
        let ret = unsafe {
            libc::mprotect(
                addr as *mut libc::c_void,
                pages * page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret == -1 {
            log::error!(
                "failed to unprotect stack at {:#x}: {}",
                addr,
                std::io::Error::last_os_error()
            );
            return false;
        }

        log::debug!("unprotected stack at {:#x} with {} pages", addr, pages);
        true
    }

    #[inline]
    fn align_up(addr: usize, align: usize) -> usize {
        (addr + align - 1) & !(align - 1)
    }

    fn malloc_fn() -> StackMallocFn {
        let raw = MALLOC_FN.load(Ordering::Acquire);
        if raw == 0 {
            default_malloc
        } else {
            unsafe { std::mem::transmute::<usize, StackMallocFn>(raw) }
        }
    }

    fn free_fn() -> StackFreeFn {
        let raw = FREE_FN.load(Ordering::Acquire);
        if raw == 0 {
            default_free
        } else {
            unsafe { std::mem::transmute::<usize, StackFreeFn>(raw) }
        }
    }
}
