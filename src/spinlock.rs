//! 结构自旋锁
//!
//! test-and-set 自旋锁，只用于保护亚微秒级的临界区
//! （链表拼接、注册表守卫），绝不允许跨 sleep 持有

use std::sync::atomic::{AtomicBool, Ordering};

/// 锁接口
///
/// TsQueue 的锁类型参数：真自旋锁、外部注入的共享锁、
/// 或调用方自行保证单线程访问时的空锁
pub trait RawLock: Default + Send + Sync {
    fn lock(&self);
    fn try_lock(&self) -> bool;
    fn unlock(&self);

    /// RAII 方式加锁
    #[inline]
    fn guard(&self) -> LockGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        LockGuard { lock: self }
    }
}

/// 锁守卫，析构时解锁
pub struct LockGuard<'a, L: RawLock> {
    lock: &'a L,
}

impl<L: RawLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// 自旋锁
///
/// release-store 之前的所有写操作，对下一个 acquire-load 之后的读可见
pub struct LfLock {
    flag: AtomicBool,
}

impl LfLock {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }
}

impl Default for LfLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for LfLock {
    #[inline]
    fn lock(&self) {
        while self.flag.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.flag.swap(true, Ordering::Acquire)
    }

    #[inline]
    fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// 空锁
///
/// 单线程访问由调用方保证时替换 LfLock，锁操作全部为空
#[derive(Default)]
pub struct FakeLock;

impl RawLock for FakeLock {
    #[inline]
    fn lock(&self) {}

    #[inline]
    fn try_lock(&self) -> bool {
        true
    }

    #[inline]
    fn unlock(&self) {}
}
