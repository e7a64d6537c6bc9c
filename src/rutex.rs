//! futex 风格等待队列
//!
//! 等待者以栈上帧挂入侵入式链表，结构自旋锁只保护链表形状，
//! 绝不跨越 sleep 持有。协议：
//! mark → 锁内挂链 → 解锁 → sleep_until；
//! 唤醒方锁内摘链并克隆切换器句柄，解锁后再 wake，
//! 摘链之后不再触碰等待者内存（超时方要先拿同一把锁自摘才会返回）

use std::cell::UnsafeCell;
use std::time::{Duration, Instant};

use crate::error::WaitResult;
use crate::linked_list::{LinkedList, LinkedNode};
use crate::spinlock::{LfLock, RawLock};
use crate::switcher::{RoutineSyncPolicy, SwitcherRef};

/// 等待者帧：链表节点 + 切换器句柄
///
/// node 必须是第一个字段，链表节点指针可以直接转回等待者
#[repr(C)]
struct RutexWaiter {
    node: LinkedNode,
    switcher: SwitcherRef,
}

/// futex 风格等待队列
///
/// 不比较用户值：wait 无条件挂起（条件判断由上层在调用前完成），
/// wake_one/wake_all 按 FIFO 顺序唤醒
pub struct Rutex {
    lock: LfLock,
    waiters: UnsafeCell<LinkedList>,
}

impl Rutex {
    pub fn new() -> Self {
        Self {
            lock: LfLock::new(),
            waiters: UnsafeCell::new(LinkedList::new()),
        }
    }

    /// 挂起当前执行流，直到被唤醒或超时
    ///
    /// timeout 为 None 时无限期等待；挂起底座由切换器选择策略决定
    pub fn wait(&self, timeout: Option<Duration>) -> WaitResult {
        let deadline = timeout.map(|d| Instant::now() + d);
        let switcher = RoutineSyncPolicy::cls_ref();

        let mut waiter = RutexWaiter {
            node: LinkedNode::new(),
            switcher,
        };

        // 先 mark 再挂链：挂链之后任何时刻落地的 wake 都不会丢失
        waiter.switcher.mark();
        {
            let _guard = self.lock.guard();
            unsafe { (*self.waiters.get()).push(&mut waiter.node) };
        }

        let result = waiter.switcher.sleep_until(deadline);
        if result.is_success() {
            return result;
        }

        // 超时/中断：自摘。wake 方在锁内先摘链、锁外才 wake，
        // 所以自摘失败说明本周期已被某个 wake 认领
        let unlinked = {
            let _guard = self.lock.guard();
            unsafe { (*self.waiters.get()).unlink(&mut waiter.node) }
        };
        if unlinked {
            // 没有 wake 认领本周期，自己关闭它，
            // 开放的 waiting 标志不能泄漏到下一个睡眠周期
            waiter.switcher.wake();
            return result;
        }

        // 认领者的 wake 必然到达：吸收掉再返回，不让它落在
        // 同一个切换器的下一个睡眠周期上
        while !waiter.switcher.sleep().is_success() {}
        WaitResult::Success
    }

    /// 唤醒队首一个等待者，返回实际完成唤醒的数量（0 或 1）
    ///
    /// 队首等待者恰好超时返回时 wake 会失败，继续尝试下一个
    pub fn wake_one(&self) -> usize {
        loop {
            let switcher = {
                let _guard = self.lock.guard();
                let list = unsafe { &mut *self.waiters.get() };
                let node = list.front();
                if node.is_null() {
                    return 0;
                }
                // node 是 RutexWaiter 的第一个字段
                let waiter = node as *mut RutexWaiter;
                let switcher = unsafe { (*waiter).switcher.clone() };
                unsafe { list.unlink(&mut *node) };
                switcher
            };

            // 锁外唤醒：wake 可能触发调度器回调，不能在结构锁内做
            if switcher.wake() {
                return 1;
            }
        }
    }

    /// 唤醒所有等待者，返回实际完成唤醒的数量
    ///
    /// 逐个摘链：临界区只做一次摘除（不在结构锁内分配），wake 在锁外
    pub fn wake_all(&self) -> usize {
        let mut woken = 0;
        loop {
            let switcher = {
                let _guard = self.lock.guard();
                let list = unsafe { &mut *self.waiters.get() };
                let node = list.front();
                if node.is_null() {
                    return woken;
                }
                let waiter = node as *mut RutexWaiter;
                let switcher = unsafe { (*waiter).switcher.clone() };
                unsafe { list.unlink(&mut *node) };
                switcher
            };

            if switcher.wake() {
                woken += 1;
            }
        }
    }

    /// 是否有等待者挂在队列上
    pub fn has_waiters(&self) -> bool {
        let _guard = self.lock.guard();
        unsafe { !(*self.waiters.get()).front().is_null() }
    }
}

impl Default for Rutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rutex {
    fn drop(&mut self) {
        // 等待者帧在各自的栈上，带着等待者析构说明上层用错了
        if self.has_waiters() {
            log::error!("rutex dropped with waiters still enqueued");
            debug_assert!(false, "rutex dropped with waiters still enqueued");
        }
    }
}

unsafe impl Send for Rutex {}
unsafe impl Sync for Rutex {}
