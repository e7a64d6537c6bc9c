//! 侵入式批量队列
//!
//! 两个配合使用的类型：
//! - `SList<T>`：无同步的可拆卸链段，支持 O(1) 拼接和 O(1) 摘除
//! - `TsQueue<T, L>`：哨兵头结点 + 锁 + 计数的同步队列，
//!   单个 push/pop O(1)，批量 splice 一次加锁完成
//!
//! 元素通过内嵌的 `QueueHook` 挂链，入队时盖上归属标记（check），
//! 出队/摘下时清除，splice 入队时逐个改盖；带校验的 erase 先核对
//! 标记，防止误操作挂在别的队列实例（或已摘下的链段）上的节点
//!
//! 引用计数契约见 `ref_count`：push 取一个引用，pop/erase 释放一个，
//! 批量 splice 不触碰计数，队列持有的引用整体转移给调用方

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use crate::ref_count::RefCounted;
use crate::spinlock::{LfLock, RawLock};

/// 侵入式队列钩子
///
/// 内嵌在元素里（通常包在 UnsafeCell 中），宿主回指指针在
/// 首次入队时盖好，此后 splice 只搬钩子不再触碰
pub struct QueueHook<T> {
    prev: *mut QueueHook<T>,
    next: *mut QueueHook<T>,
    /// 归属标记：挂链时指向所在队列的哨兵，摘除时清空
    check: *const (),
    /// 宿主对象回指
    owner: *mut T,
}

impl<T> QueueHook<T> {
    pub const fn new() -> Self {
        Self {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            check: ptr::null(),
            owner: ptr::null_mut(),
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        !self.prev.is_null() || !self.next.is_null()
    }
}

impl<T> Default for QueueHook<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 可入队元素
///
/// 元素内嵌一个 `UnsafeCell<QueueHook<Self>>` 并暴露其裸指针
pub trait QueueNode: RefCounted + Sized {
    fn hook_ptr(&self) -> *mut QueueHook<Self>;
}

/// 无同步的可拆卸链段
///
/// 不带哨兵节点，head/tail 都是真实元素；析构要求链段已空，
/// 调用方必须显式 drain 或把所有权 splice 到别处，不允许静默泄漏
pub struct SList<T: QueueNode> {
    head: *mut QueueHook<T>,
    tail: *mut QueueHook<T>,
    count: usize,
}

impl<T: QueueNode> SList<T> {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            count: 0,
        }
    }

    pub(crate) fn from_raw(head: *mut QueueHook<T>, tail: *mut QueueHook<T>, count: usize) -> Self {
        Self { head, tail, count }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// 把另一条链段整体拼接到尾部，O(1)，消费 other
    pub fn append(&mut self, mut other: SList<T>) {
        if other.is_empty() {
            return;
        }

        if self.is_empty() {
            self.head = other.head;
            self.tail = other.tail;
            self.count = other.count;
            other.stealed();
            return;
        }

        unsafe {
            (*self.tail).next = other.head;
            (*other.head).prev = self.tail;
        }
        self.tail = other.tail;
        self.count += other.count;
        other.stealed();
    }

    /// 切下前 n 个元素，保持原有顺序
    ///
    /// n >= len 时整体移交（O(1)），否则需要走到切割点（O(n)）
    pub fn cut(&mut self, n: usize) -> SList<T> {
        if self.is_empty() || n == 0 {
            return SList::new();
        }

        if n >= self.count {
            let out = SList::from_raw(self.head, self.tail, self.count);
            self.stealed();
            return out;
        }

        unsafe {
            let mut pos = self.head;
            for _ in 1..n {
                pos = (*pos).next;
            }

            let out = SList::from_raw(self.head, pos, n);
            self.count -= n;
            self.head = (*pos).next;
            (*self.head).prev = ptr::null_mut();
            (*pos).next = ptr::null_mut();
            out
        }
    }

    /// O(1) 摘除一个元素并释放链段持有的引用
    ///
    /// # Safety
    /// element 必须挂在本链段上
    pub unsafe fn erase(&mut self, element: *mut T) {
        let hook = (*element).hook_ptr();

        if !(*hook).prev.is_null() {
            (*(*hook).prev).next = (*hook).next;
        } else {
            self.head = (*hook).next;
        }

        if !(*hook).next.is_null() {
            (*(*hook).next).prev = (*hook).prev;
        } else {
            self.tail = (*hook).prev;
        }

        (*hook).prev = ptr::null_mut();
        (*hook).next = ptr::null_mut();
        (*hook).check = ptr::null();
        self.count -= 1;
        (*element).dec_ref();
    }

    /// 逐个摘除所有元素（逐个释放引用）
    pub fn clear(&mut self) {
        unsafe {
            let mut pos = self.head;
            while !pos.is_null() {
                let next = (*pos).next;
                let owner = (*pos).owner;
                (*pos).prev = ptr::null_mut();
                (*pos).next = ptr::null_mut();
                (*pos).check = ptr::null();
                (*owner).dec_ref();
                pos = next;
            }
        }
        self.stealed();
    }

    /// 遍历链段，迭代器先行一步，允许边遍历边 erase 当前元素
    pub fn iter(&self) -> SListIter<'_, T> {
        SListIter {
            next: self.head,
            _marker: PhantomData,
        }
    }

    /// 置空（移动语义辅助，不触碰元素）
    fn stealed(&mut self) {
        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.count = 0;
    }
}

impl<T: QueueNode> Default for SList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueNode> Drop for SList<T> {
    fn drop(&mut self) {
        // 链段析构前必须已被 drain 或 splice 走，静默泄漏是使用错误
        debug_assert_eq!(self.count, 0, "dropping a non-empty SList");
    }
}

unsafe impl<T: QueueNode + Send> Send for SList<T> {}

/// 链段迭代器
pub struct SListIter<'a, T: QueueNode> {
    next: *mut QueueHook<T>,
    _marker: PhantomData<&'a SList<T>>,
}

impl<T: QueueNode> Iterator for SListIter<'_, T> {
    type Item = *mut T;

    fn next(&mut self) -> Option<*mut T> {
        if self.next.is_null() {
            return None;
        }
        unsafe {
            let hook = self.next;
            self.next = (*hook).next;
            Some((*hook).owner)
        }
    }
}

struct QueueInner<T: QueueNode> {
    /// 哨兵头结点（不存储数据），同时充当队列的归属标记
    head: *mut QueueHook<T>,
    tail: *mut QueueHook<T>,
    count: usize,
}

/// 同步的侵入式批量队列
///
/// 锁类型可替换：默认自旋锁 `LfLock`；单线程访问由调用方保证时用
/// `FakeLock`；多个队列共享一把锁时通过 `set_lock` 注入
pub struct TsQueue<T: QueueNode, L: RawLock = LfLock> {
    lock: Arc<L>,
    inner: UnsafeCell<QueueInner<T>>,
}

impl<T: QueueNode, L: RawLock> TsQueue<T, L> {
    pub fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(QueueHook::<T>::new()));
        Self {
            lock: Arc::new(L::default()),
            inner: UnsafeCell::new(QueueInner {
                head: sentinel,
                tail: sentinel,
                count: 0,
            }),
        }
    }

    /// 注入外部共享锁（必须在队列投入使用前完成）
    pub fn set_lock(&mut self, lock: Arc<L>) {
        self.lock = lock;
    }

    /// 返回队列的锁，供调用方跨多次 *_without_lock 操作持锁
    #[inline]
    pub fn lock_ref(&self) -> &Arc<L> {
        &self.lock
    }

    /// 队列归属标记（哨兵地址，堆上稳定）
    #[inline]
    fn check_tag(&self) -> *const () {
        unsafe { (*self.inner.get()).head as *const () }
    }

    pub fn is_empty(&self) -> bool {
        let _g = self.lock.guard();
        unsafe { (*self.inner.get()).count == 0 }
    }

    pub fn len(&self) -> usize {
        let _g = self.lock.guard();
        unsafe { (*self.inner.get()).count }
    }

    /// 入队一个元素，盖上归属标记并取一个引用，返回入队后的元素数
    ///
    /// # Safety
    /// element 必须有效、未挂在任何队列上，且在摘除前保持有效
    pub unsafe fn push(&self, element: *mut T) -> usize {
        let _g = self.lock.guard();
        self.push_without_lock(element)
    }

    /// push 的无锁版本，调用方已持有本队列的锁
    ///
    /// # Safety
    /// 同 `push`，另须持有 `lock_ref` 返回的锁
    pub unsafe fn push_without_lock(&self, element: *mut T) -> usize {
        let inner = &mut *self.inner.get();
        let hook = (*element).hook_ptr();
        debug_assert!(!(*hook).is_linked(), "element already linked");

        (*hook).owner = element;
        (*hook).prev = inner.tail;
        (*hook).next = ptr::null_mut();
        (*hook).check = self.check_tag();
        (*inner.tail).next = hook;
        inner.tail = hook;

        inner.count += 1;
        (*element).add_ref();
        inner.count
    }

    /// 出队头部元素；清除归属标记、释放队列持有的引用，
    /// 所有权转移给调用方。队列为空时返回空指针
    pub fn pop(&self) -> *mut T {
        let _g = self.lock.guard();
        unsafe { self.pop_without_lock() }
    }

    /// pop 的无锁版本
    ///
    /// # Safety
    /// 须持有 `lock_ref` 返回的锁
    pub unsafe fn pop_without_lock(&self) -> *mut T {
        let inner = &mut *self.inner.get();
        if inner.head == inner.tail {
            return ptr::null_mut();
        }

        let hook = (*inner.head).next;
        if hook == inner.tail {
            inner.tail = inner.head;
        }

        (*inner.head).next = (*hook).next;
        if !(*hook).next.is_null() {
            (*(*hook).next).prev = inner.head;
        }

        (*hook).prev = ptr::null_mut();
        (*hook).next = ptr::null_mut();
        (*hook).check = ptr::null();
        inner.count -= 1;

        let owner = (*hook).owner;
        (*owner).dec_ref();
        owner
    }

    /// 查看头部元素，不出队
    pub fn front(&self) -> *mut T {
        let _g = self.lock.guard();
        unsafe {
            let inner = &*self.inner.get();
            if inner.head == inner.tail {
                return ptr::null_mut();
            }
            (*(*inner.head).next).owner
        }
    }

    /// 把一条链段整体入队（结构 splice，不触碰引用计数：
    /// 链段持有的引用原样转给队列），归属标记逐个改盖到本队列
    pub fn push_list(&self, elements: SList<T>) {
        if elements.is_empty() {
            return;
        }
        let _g = self.lock.guard();
        unsafe { self.push_list_without_lock(elements) }
    }

    /// push_list 的无锁版本
    ///
    /// # Safety
    /// 须持有 `lock_ref` 返回的锁
    pub unsafe fn push_list_without_lock(&self, mut elements: SList<T>) {
        if elements.is_empty() {
            return;
        }
        let inner = &mut *self.inner.get();
        debug_assert!((*elements.head).prev.is_null());
        debug_assert!((*elements.tail).next.is_null());

        // 改盖归属标记：splice 进来的节点从此属于本队列，
        // 带校验的 erase 才能在新归属处成功、在旧队列处失败
        let tag = self.check_tag();
        let mut pos = elements.head;
        while !pos.is_null() {
            (*pos).check = tag;
            pos = (*pos).next;
        }

        inner.count += elements.count;
        (*inner.tail).next = elements.head;
        (*elements.head).prev = inner.tail;
        inner.tail = elements.tail;
        elements.stealed();
    }

    /// 摘下头部前 n 个元素，一次加锁完成结构 splice，
    /// 队列持有的引用随链段整体转移（计数不变）
    pub fn pop_front(&self, n: usize) -> SList<T> {
        if n == 0 {
            return SList::new();
        }
        let _g = self.lock.guard();
        unsafe { self.pop_front_without_lock(n) }
    }

    /// pop_front 的无锁版本
    ///
    /// # Safety
    /// 须持有 `lock_ref` 返回的锁
    pub unsafe fn pop_front_without_lock(&self, n: usize) -> SList<T> {
        let inner = &mut *self.inner.get();
        if inner.head == inner.tail || n == 0 {
            return SList::new();
        }

        let first = (*inner.head).next;
        let mut last = first;
        (*last).check = ptr::null();
        let mut c = 1;
        while c < n && !(*last).next.is_null() {
            last = (*last).next;
            (*last).check = ptr::null();
            c += 1;
        }

        if last == inner.tail {
            inner.tail = inner.head;
        }
        (*inner.head).next = (*last).next;
        if !(*last).next.is_null() {
            (*(*last).next).prev = inner.head;
        }

        (*first).prev = ptr::null_mut();
        (*last).next = ptr::null_mut();
        inner.count -= c;
        SList::from_raw(first, last, c)
    }

    /// 摘下尾部后 n 个元素
    pub fn pop_back(&self, n: usize) -> SList<T> {
        if n == 0 {
            return SList::new();
        }
        let _g = self.lock.guard();
        unsafe { self.pop_back_without_lock(n) }
    }

    /// pop_back 的无锁版本
    ///
    /// # Safety
    /// 须持有 `lock_ref` 返回的锁
    pub unsafe fn pop_back_without_lock(&self, n: usize) -> SList<T> {
        let inner = &mut *self.inner.get();
        if inner.head == inner.tail || n == 0 {
            return SList::new();
        }

        let last = inner.tail;
        let mut first = last;
        (*first).check = ptr::null();
        let mut c = 1;
        while c < n && (*first).prev != inner.head {
            first = (*first).prev;
            (*first).check = ptr::null();
            c += 1;
        }

        inner.tail = (*first).prev;
        (*inner.tail).next = ptr::null_mut();
        (*first).prev = ptr::null_mut();
        inner.count -= c;
        SList::from_raw(first, last, c)
    }

    /// 一次性摘下所有元素
    pub fn pop_all(&self) -> SList<T> {
        let _g = self.lock.guard();
        unsafe { self.pop_all_without_lock() }
    }

    /// pop_all 的无锁版本
    ///
    /// # Safety
    /// 须持有 `lock_ref` 返回的锁
    pub unsafe fn pop_all_without_lock(&self) -> SList<T> {
        let inner = &mut *self.inner.get();
        if inner.head == inner.tail {
            return SList::new();
        }

        let first = (*inner.head).next;
        let last = inner.tail;

        // 摘下即失去归属，旧队列不能再带校验摘除这些节点
        let mut pos = first;
        while !pos.is_null() {
            (*pos).check = ptr::null();
            pos = (*pos).next;
        }

        inner.tail = inner.head;
        (*inner.head).next = ptr::null_mut();

        (*first).prev = ptr::null_mut();
        let c = inner.count;
        inner.count = 0;
        SList::from_raw(first, last, c)
    }

    /// 摘除指定元素并释放队列持有的引用
    ///
    /// checked 为 true 时先核对归属标记：标记不属于本队列实例时
    /// 返回 false 且不做任何修改
    ///
    /// # Safety
    /// checked 为 false 时 element 必须确实挂在本队列上
    pub unsafe fn erase(&self, element: *mut T, checked: bool) -> bool {
        let _g = self.lock.guard();
        self.erase_without_lock(element, checked)
    }

    /// erase 的无锁版本
    ///
    /// # Safety
    /// 同 `erase`，另须持有 `lock_ref` 返回的锁
    pub unsafe fn erase_without_lock(&self, element: *mut T, checked: bool) -> bool {
        let inner = &mut *self.inner.get();
        let hook = (*element).hook_ptr();

        if checked && (*hook).check != self.check_tag() {
            return false;
        }

        debug_assert!(!(*hook).prev.is_null(), "erasing an unlinked element");

        (*(*hook).prev).next = (*hook).next;
        if !(*hook).next.is_null() {
            (*(*hook).next).prev = (*hook).prev;
        } else {
            inner.tail = (*hook).prev;
        }

        (*hook).prev = ptr::null_mut();
        (*hook).next = ptr::null_mut();
        (*hook).check = ptr::null();
        debug_assert!(inner.count > 0);
        inner.count -= 1;

        (*element).dec_ref();
        true
    }
}

impl<T: QueueNode, L: RawLock> Default for TsQueue<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueNode, L: RawLock> Drop for TsQueue<T, L> {
    fn drop(&mut self) {
        unsafe {
            // 释放队列仍持有的引用，然后回收哨兵
            let inner = &mut *self.inner.get();
            let mut pos = (*inner.head).next;
            while !pos.is_null() {
                let next = (*pos).next;
                (*pos).prev = ptr::null_mut();
                (*pos).next = ptr::null_mut();
                (*pos).check = ptr::null();
                (*(*pos).owner).dec_ref();
                pos = next;
            }
            drop(Box::from_raw(inner.head));
        }
    }
}

unsafe impl<T: QueueNode + Send, L: RawLock> Send for TsQueue<T, L> {}
unsafe impl<T: QueueNode + Send, L: RawLock> Sync for TsQueue<T, L> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ref_count::testing::CountedProbe;

    struct TestElement {
        hook: UnsafeCell<QueueHook<TestElement>>,
        probe: CountedProbe,
        value: i32,
    }

    impl TestElement {
        fn boxed(value: i32) -> Box<Self> {
            Box::new(Self {
                hook: UnsafeCell::new(QueueHook::new()),
                probe: CountedProbe::new(),
                value,
            })
        }
    }

    impl RefCounted for TestElement {
        fn add_ref(&self) {
            self.probe.add_ref();
        }
        fn dec_ref(&self) -> bool {
            self.probe.dec_ref()
        }
    }

    impl QueueNode for TestElement {
        fn hook_ptr(&self) -> *mut QueueHook<TestElement> {
            self.hook.get()
        }
    }

    fn collect(list: &SList<TestElement>) -> Vec<i32> {
        list.iter().map(|p| unsafe { (*p).value }).collect()
    }

    #[test]
    fn test_push_pop_single() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let e = TestElement::boxed(42);

        unsafe {
            assert_eq!(queue.push(&*e as *const _ as *mut TestElement), 1);
        }
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
        // 队列持有一个引用
        assert_eq!(e.probe.refs(), 2);

        let out = queue.pop();
        assert_eq!(out, &*e as *const _ as *mut TestElement);
        assert!(queue.is_empty());
        // 队列的引用已释放
        assert_eq!(e.probe.refs(), 1);
        assert!(unsafe { !(*(*out).hook_ptr()).is_linked() });

        // 空队列 pop 返回空指针
        assert!(queue.pop().is_null());
    }

    #[test]
    fn test_fifo_and_front() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..5).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        assert_eq!(unsafe { (*queue.front()).value }, 0);
        for i in 0..5 {
            let out = queue.pop();
            assert_eq!(unsafe { (*out).value }, i);
        }
        assert!(queue.front().is_null());
    }

    #[test]
    fn test_pop_front_splice_preserves_order() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..6).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        // splice 不触碰引用计数
        let mut batch = queue.pop_front(4);
        assert_eq!(batch.len(), 4);
        assert_eq!(collect(&batch), vec![0, 1, 2, 3]);
        assert_eq!(queue.len(), 2);
        for e in &elems {
            assert_eq!(e.probe.refs(), 2);
        }

        batch.clear();
        let mut rest = queue.pop_all();
        assert_eq!(collect(&rest), vec![4, 5]);
        rest.clear();
        for e in &elems {
            assert_eq!(e.probe.refs(), 1);
        }
    }

    #[test]
    fn test_pop_back_splice() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..5).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        let mut back = queue.pop_back(2);
        assert_eq!(collect(&back), vec![3, 4]);
        assert_eq!(queue.len(), 3);

        let mut front = queue.pop_all();
        assert_eq!(collect(&front), vec![0, 1, 2]);

        back.clear();
        front.clear();
    }

    #[test]
    fn test_cut_preserves_both_halves() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..5).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        let mut list = queue.pop_all();
        let mut head = list.cut(2);
        assert_eq!(collect(&head), vec![0, 1]);
        assert_eq!(collect(&list), vec![2, 3, 4]);

        // n >= len 整体移交
        let mut all = list.cut(100);
        assert!(list.is_empty());
        assert_eq!(collect(&all), vec![2, 3, 4]);

        head.clear();
        all.clear();
    }

    #[test]
    fn test_append_consumes_other() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..6).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        let mut a = queue.pop_front(3);
        let b = queue.pop_all();
        a.append(b);
        assert_eq!(collect(&a), vec![0, 1, 2, 3, 4, 5]);
        a.clear();
    }

    #[test]
    fn test_erase_with_foreign_tag_fails() {
        let queue_a: TsQueue<TestElement> = TsQueue::new();
        let queue_b: TsQueue<TestElement> = TsQueue::new();
        let e1 = TestElement::boxed(1);
        let e2 = TestElement::boxed(2);

        unsafe {
            queue_a.push(&*e1 as *const _ as *mut TestElement);
            queue_b.push(&*e2 as *const _ as *mut TestElement);

            // e2 挂在 queue_b 上，标记不匹配，两个队列都不能被改动
            assert!(!queue_a.erase(&*e2 as *const _ as *mut TestElement, true));
            assert_eq!(queue_a.len(), 1);
            assert_eq!(queue_b.len(), 1);
            assert_eq!(e2.probe.refs(), 2);

            // 标记匹配时摘除成功
            assert!(queue_b.erase(&*e2 as *const _ as *mut TestElement, true));
            assert_eq!(queue_b.len(), 0);
            assert_eq!(e2.probe.refs(), 1);

            assert!(queue_a.erase(&*e1 as *const _ as *mut TestElement, true));
        }
    }

    #[test]
    fn test_slist_erase_while_iterating() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (1..=3).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        let mut list = queue.pop_all();
        unsafe {
            let mut iter = list.iter();
            while let Some(p) = iter.next() {
                if (*p).value == 2 {
                    list.erase(p);
                    break;
                }
            }
        }
        assert_eq!(collect(&list), vec![1, 3]);
        list.clear();
    }

    #[test]
    fn test_push_list_transfers_ownership() {
        let queue_a: TsQueue<TestElement> = TsQueue::new();
        let queue_b: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..4).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue_a.push(&**e as *const _ as *mut TestElement);
            }
        }

        // 整批从 A 挪到 B，计数始终是「一个队列引用」
        let batch = queue_a.pop_all();
        queue_b.push_list(batch);
        assert_eq!(queue_a.len(), 0);
        assert_eq!(queue_b.len(), 4);
        for e in &elems {
            assert_eq!(e.probe.refs(), 2);
        }

        for i in 0..4 {
            let out = queue_b.pop();
            assert_eq!(unsafe { (*out).value }, i);
        }
        for e in &elems {
            assert_eq!(e.probe.refs(), 1);
        }
    }

    #[test]
    fn test_splice_restamps_ownership_tags() {
        let queue_a: TsQueue<TestElement> = TsQueue::new();
        let queue_b: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..2).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue_a.push(&**e as *const _ as *mut TestElement);
            }
        }

        let e0 = &*elems[0] as *const _ as *mut TestElement;
        let batch = queue_a.pop_all();

        // 摘下的链段已不属于 A，旧队列的带校验 erase 失败且 A 不被改动
        unsafe {
            assert!(!queue_a.erase(e0, true));
        }
        assert_eq!(queue_a.len(), 0);

        queue_b.push_list(batch);

        // splice 改盖了标记：新归属队列可以带校验摘除，旧队列仍然不行
        unsafe {
            assert!(!queue_a.erase(e0, true));
            assert_eq!(queue_a.len(), 0);
            assert!(queue_b.erase(e0, true));
        }
        assert_eq!(queue_b.len(), 1);
        assert_eq!(elems[0].probe.refs(), 1);

        let out = queue_b.pop();
        assert_eq!(unsafe { (*out).value }, 1);
    }

    #[test]
    fn test_partial_pop_splices_clear_tags() {
        let queue: TsQueue<TestElement> = TsQueue::new();
        let elems: Vec<Box<TestElement>> = (0..4).map(TestElement::boxed).collect();

        unsafe {
            for e in &elems {
                queue.push(&**e as *const _ as *mut TestElement);
            }
        }

        let mut front = queue.pop_front(1);
        let mut back = queue.pop_back(1);

        unsafe {
            // 摘下的两端都失去归属，留在队列里的仍可带校验摘除
            assert!(!queue.erase(&*elems[0] as *const _ as *mut TestElement, true));
            assert!(!queue.erase(&*elems[3] as *const _ as *mut TestElement, true));
            assert_eq!(queue.len(), 2);
            assert!(queue.erase(&*elems[1] as *const _ as *mut TestElement, true));
        }
        assert_eq!(queue.len(), 1);

        front.clear();
        back.clear();
        let mut rest = queue.pop_all();
        rest.clear();
    }

    #[test]
    fn test_queue_drop_releases_refs() {
        let elems: Vec<Box<TestElement>> = (0..3).map(TestElement::boxed).collect();
        {
            let queue: TsQueue<TestElement> = TsQueue::new();
            unsafe {
                for e in &elems {
                    queue.push(&**e as *const _ as *mut TestElement);
                }
            }
            for e in &elems {
                assert_eq!(e.probe.refs(), 2);
            }
        }
        // 队列析构时释放它持有的引用
        for e in &elems {
            assert_eq!(e.probe.refs(), 1);
            assert!(unsafe { !(*e.hook_ptr()).is_linked() });
        }
    }

    #[test]
    fn test_shared_external_lock() {
        use crate::spinlock::LfLock;

        let lock = Arc::new(LfLock::new());
        let mut queue_a: TsQueue<TestElement> = TsQueue::new();
        let mut queue_b: TsQueue<TestElement> = TsQueue::new();
        queue_a.set_lock(Arc::clone(&lock));
        queue_b.set_lock(Arc::clone(&lock));

        let e = TestElement::boxed(7);
        unsafe {
            // 持外部锁跨两个队列做搬移
            let guard_lock = Arc::clone(queue_a.lock_ref());
            let _g = guard_lock.guard();
            queue_a.push_without_lock(&*e as *const _ as *mut TestElement);
            let batch = queue_a.pop_all_without_lock();
            queue_b.push_list_without_lock(batch);
        }
        assert_eq!(queue_b.len(), 1);
        let out = queue_b.pop();
        assert_eq!(unsafe { (*out).value }, 7);
    }
}
