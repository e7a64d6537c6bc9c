//! 无锁环形队列
//!
//! 有界 FIFO，CAS 认领下标，多生产者多消费者安全，
//! 针对单生产者单消费者场景优化
//!
//! 四个游标划分两个区间：
//! - `[write, writable]` 可写区间，write == writable 即满
//! - `[read, readable)` 可读区间，read == readable 即空
//!
//! push 后推进 readable，pop 后推进 writable，
//! 先构造后发布，消费者不会观察到未构造完成的槽位

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// 无锁环形队列
///
/// 容量向上取整为 2 的幂并保留一个槽位用于区分满和空，
/// 实际可用容量为 `capacity() = 取整值 - 1`
pub struct LockFreeRingQueue<T> {
    /// 槽位总数（2 的幂，含保留槽位）
    capacity: usize,
    buffer: NonNull<T>,

    /// 可写区间 [write, writable]，read 之后更新 writable
    write: CachePadded<AtomicUsize>,
    writable: CachePadded<AtomicUsize>,

    /// 可读区间 [read, readable)，write 之后更新 readable
    read: CachePadded<AtomicUsize>,
    readable: CachePadded<AtomicUsize>,
}

impl<T> LockFreeRingQueue<T> {
    /// 创建队列，capacity 为期望的可用容量
    ///
    /// capacity 为 0 是使用错误，直接 panic
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        let capacity = Self::round_capacity(capacity);

        let buffer = if std::mem::size_of::<T>() == 0 {
            NonNull::dangling()
        } else {
            let layout = Layout::array::<T>(capacity).expect("capacity overflow");
            // 裸内存，槽位按需原地构造/析构
            let ptr = unsafe { alloc::alloc(layout) } as *mut T;
            NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };

        Self {
            capacity,
            buffer,
            write: CachePadded::new(AtomicUsize::new(0)),
            writable: CachePadded::new(AtomicUsize::new(capacity - 1)),
            read: CachePadded::new(AtomicUsize::new(0)),
            readable: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// 可用容量（扣除保留槽位）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity - 1
    }

    /// 入队
    ///
    /// 队列满时立即失败（不自旋等待），原值通过 Err 返还；
    /// 成功时返回 notify 位，仅当本次入队使队列从空变为非空时为 true
    pub fn push(&self, value: T) -> Result<bool, T> {
        // 1. CAS 认领写下标
        let mut write;
        let mut writable;
        loop {
            write = self.write.load(Ordering::Relaxed);
            writable = self.writable.load(Ordering::Acquire);
            if write == writable {
                return Err(value); // 队列已满
            }

            if self
                .write
                .compare_exchange_weak(
                    write,
                    self.index(write + 1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }

        // 2. 槽位原地构造
        unsafe { ptr::write(self.buffer.as_ptr().add(write), value) };

        // 3. 发布到可读区间：等待先行的生产者发布完毕后推进 readable，
        //    保证消费者看到下标可读之前构造已完成
        while self
            .readable
            .compare_exchange_weak(
                write,
                self.index(write + 1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            std::hint::spin_loop();
        }

        // 4. 入队前队列为空 <=> write 回绕到 writable 的下一格
        Ok(write == self.index(writable + 1))
    }

    /// 出队
    ///
    /// 队列空时立即返回 None；成功时返回元素和 notify 位，
    /// notify 仅当本次出队使队列从满变为非满时为 true
    pub fn pop(&self) -> Option<(T, bool)> {
        // 1. CAS 认领读下标
        let mut read;
        let mut readable;
        loop {
            read = self.read.load(Ordering::Relaxed);
            readable = self.readable.load(Ordering::Acquire);
            if read == readable {
                return None; // 队列为空
            }

            if self
                .read
                .compare_exchange_weak(
                    read,
                    self.index(read + 1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }

        // 2. 移出元素（槽位析构随 move 完成）
        let value = unsafe { ptr::read(self.buffer.as_ptr().add(read)) };

        // 3. 槽位回收：等待先行的消费者回收完毕后把 writable 推进到 read，
        //    期望值每次重试都重新计算，避免竞争下死转
        loop {
            let expected = self.index(read + self.capacity - 1);
            if self
                .writable
                .compare_exchange_weak(expected, read, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        // 4. 出队前队列为满 <=> read 回绕到 readable 的下一格
        let notify = read == self.index(readable + 1);
        Some((value, notify))
    }

    /// 位运算取模（capacity 是 2 的幂）
    #[inline]
    fn index(&self, val: usize) -> usize {
        val & (self.capacity - 1)
    }

    /// 容量向上取整为 2 的幂（7→8, 8→8, 9→16）
    ///
    /// 接近下标类型上限时先截断到一半，防止取整回绕
    fn round_capacity(capacity: usize) -> usize {
        capacity.min(usize::MAX / 2).next_power_of_two()
    }
}

impl<T> Drop for LockFreeRingQueue<T> {
    fn drop(&mut self) {
        // 析构尚未消费的元素（可读区间可能回绕）；
        // 零大小类型也可能带析构器，同样要走这一遍
        let mut read = self.read.load(Ordering::Relaxed);
        let readable = self.readable.load(Ordering::Relaxed);
        while read != readable {
            unsafe { ptr::drop_in_place(self.buffer.as_ptr().add(read)) };
            read = self.index(read + 1);
        }

        // 零大小类型没有真实分配，只有缓冲区需要按大小分流
        if std::mem::size_of::<T>() != 0 {
            let layout = Layout::array::<T>(self.capacity).expect("capacity overflow");
            unsafe { alloc::dealloc(self.buffer.as_ptr() as *mut u8, layout) };
        }
    }
}

unsafe impl<T: Send> Send for LockFreeRingQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeRingQueue<T> {}
