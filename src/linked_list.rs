//! 侵入式双向链表
//!
//! 链表指针内嵌在节点里，链表本身不拥有节点，也不做任何同步，
//! 由使用方（rutex 的结构锁）保证同一时刻只有一个容器解引用节点指针

use std::ptr;

/// 链表节点
///
/// 作为等待者记录的一个字段内嵌使用，unlink 成功后两个指针都被清空，
/// 因此重复 unlink 可以被检测为无操作
#[derive(Debug)]
pub struct LinkedNode {
    pub(crate) prev: *mut LinkedNode,
    pub(crate) next: *mut LinkedNode,
}

impl LinkedNode {
    pub const fn new() -> Self {
        Self {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// 是否仍挂在某个链表上
    #[inline]
    pub fn is_linked(&self) -> bool {
        !self.prev.is_null() || !self.next.is_null()
    }
}

impl Default for LinkedNode {
    fn default() -> Self {
        Self::new()
    }
}

/// 无同步的侵入式链表
pub struct LinkedList {
    head: *mut LinkedNode,
    tail: *mut LinkedNode,
}

impl LinkedList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// 尾部追加
    ///
    /// # Safety
    /// node 必须有效且未挂在任何链表上，且在 unlink 之前保持有效
    pub unsafe fn push(&mut self, node: *mut LinkedNode) {
        if self.tail.is_null() {
            self.head = node;
            self.tail = node;
            (*node).prev = ptr::null_mut();
            (*node).next = ptr::null_mut();
            return;
        }

        (*self.tail).next = node;
        (*node).prev = self.tail;
        (*node).next = ptr::null_mut();
        self.tail = node;
    }

    /// 返回头节点，不移除
    #[inline]
    pub fn front(&self) -> *mut LinkedNode {
        self.head
    }

    /// O(1) 摘除任意位置的节点
    ///
    /// 节点不在链表上时返回 false 且不做任何修改（重复 unlink 安全）
    ///
    /// # Safety
    /// node 必须有效；若其 prev/next 非空，则必须是本链表的节点
    pub unsafe fn unlink(&mut self, node: *mut LinkedNode) -> bool {
        if self.head == node && self.tail == node {
            (*node).prev = ptr::null_mut();
            (*node).next = ptr::null_mut();
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
            return true;
        }

        if self.tail == node {
            self.tail = (*node).prev;
            (*self.tail).next = ptr::null_mut();
            (*node).prev = ptr::null_mut();
            (*node).next = ptr::null_mut();
            return true;
        }

        if self.head == node {
            self.head = (*node).next;
            (*self.head).prev = ptr::null_mut();
            (*node).prev = ptr::null_mut();
            (*node).next = ptr::null_mut();
            return true;
        }

        // 中间节点：两个指针都为空说明早已摘除
        if (*node).prev.is_null() && (*node).next.is_null() {
            return false;
        }

        if !(*node).prev.is_null() {
            (*(*node).prev).next = (*node).next;
        }
        if !(*node).next.is_null() {
            (*(*node).next).prev = (*node).prev;
        }
        (*node).prev = ptr::null_mut();
        (*node).next = ptr::null_mut();
        true
    }
}

impl Default for LinkedList {
    fn default() -> Self {
        Self::new()
    }
}

// 裸指针字段本身不携带线程亲和性，同步责任在外层的结构锁
unsafe impl Send for LinkedList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_front() {
        let mut list = LinkedList::new();
        let mut node = LinkedNode::new();

        assert!(list.is_empty());
        unsafe { list.push(&mut node) };
        assert!(!list.is_empty());
        assert_eq!(list.front(), &mut node as *mut LinkedNode);
    }

    #[test]
    fn test_is_linked() {
        let mut list = LinkedList::new();
        let mut a = LinkedNode::new();
        let mut b = LinkedNode::new();

        // 孤立节点没有任何链接
        assert!(!a.is_linked());

        unsafe {
            list.push(&mut a);
            list.push(&mut b);
        }
        // 两个节点互相挂接后均有链接
        assert!(a.is_linked());
        assert!(b.is_linked());

        unsafe {
            assert!(list.unlink(&mut b));
        }
        assert!(!b.is_linked());
    }

    #[test]
    fn test_unlink_sole_element() {
        let mut list = LinkedList::new();
        let mut node = LinkedNode::new();

        unsafe {
            list.push(&mut node);
            assert!(list.unlink(&mut node));
        }
        assert!(list.is_empty());
        assert!(!node.is_linked());
    }

    #[test]
    fn test_double_unlink_is_noop() {
        let mut list = LinkedList::new();
        let mut a = LinkedNode::new();
        let mut b = LinkedNode::new();
        let mut c = LinkedNode::new();

        unsafe {
            list.push(&mut a);
            list.push(&mut b);
            list.push(&mut c);

            assert!(list.unlink(&mut b));
            // 第二次 unlink：指针已清空，检测为无操作
            assert!(!list.unlink(&mut b));
        }

        // 剩余链表保持 a -> c
        assert_eq!(list.front(), &mut a as *mut LinkedNode);
        assert_eq!(a.next, &mut c as *mut LinkedNode);
        assert_eq!(c.prev, &mut a as *mut LinkedNode);
    }

    #[test]
    fn test_unlink_head_and_tail() {
        let mut list = LinkedList::new();
        let mut a = LinkedNode::new();
        let mut b = LinkedNode::new();
        let mut c = LinkedNode::new();

        unsafe {
            list.push(&mut a);
            list.push(&mut b);
            list.push(&mut c);

            assert!(list.unlink(&mut a));
            assert_eq!(list.front(), &mut b as *mut LinkedNode);

            assert!(list.unlink(&mut c));
            assert_eq!(b.next, std::ptr::null_mut());

            assert!(list.unlink(&mut b));
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let mut list = LinkedList::new();
        let mut nodes: Vec<LinkedNode> = (0..5).map(|_| LinkedNode::new()).collect();

        unsafe {
            for node in nodes.iter_mut() {
                list.push(node);
            }
            for node in nodes.iter_mut() {
                let front = list.front();
                assert_eq!(front, node as *mut LinkedNode);
                assert!(list.unlink(front));
            }
        }
        assert!(list.is_empty());
    }
}
