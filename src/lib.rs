//! gocoro —— 有栈协程运行时核心
//!
//! 面向调度器作者的底层构件库，不含调度器本身：
//!
//! - `context`：独立栈 + 寄存器切换（swap_in / swap_out / swap_to）
//! - `stack`：栈分配器钩子与 mprotect 保护页
//! - `switcher`：挂起切换器，线程/协程双底座 + 选择策略
//! - `rutex`：futex 风格等待队列，同步原语的共同基石
//! - `ring_queue`：无锁环形队列，带空转非空/满转非满的边沿通知位
//! - `ts_queue`：侵入式批量队列，O(1) 整段拼接 + 带标签校验的摘除
//! - `linked_list` / `spinlock` / `ref_count`：上述构件的支撑件

pub mod context;
pub mod error;
pub mod linked_list;
pub mod ref_count;
pub mod ring_queue;
pub mod rutex;
pub mod spinlock;
pub mod stack;
pub mod switcher;
pub mod ts_queue;

pub use context::{Context, ContextEntry, MIN_STACK_SIZE};
pub use error::{CoError, WaitResult};
pub use linked_list::{LinkedList, LinkedNode};
pub use ref_count::RefCounted;
pub use ring_queue::LockFreeRingQueue;
pub use rutex::Rutex;
pub use spinlock::{FakeLock, LfLock, LockGuard, RawLock};
pub use stack::{StackFreeFn, StackMallocFn, StackTraits};
pub use switcher::{
    pthread_cls_ref, CoroutineSwitcher, PThreadSwitcher, RoutineSwitcher, RoutineSyncPolicy,
    SwitcherKind, SwitcherRef,
};
pub use ts_queue::{QueueHook, QueueNode, SList, TsQueue};
