//! 引用计数接口契约
//!
//! 批量队列（TsQueue）要求元素暴露 add_ref/dec_ref，
//! 计数本身由外部的半侵入式所有权系统（强/弱句柄 + 共享控制块）实现，
//! 本层只定义契约，不实现计数

/// 引用计数契约
///
/// 队列在元素入队时取一个逻辑引用，出队/摘除时释放；
/// 批量 splice 不触碰计数，队列持有的引用整体转移给调用方
pub trait RefCounted {
    /// 增加一个强引用
    fn add_ref(&self);

    /// 释放一个强引用，返回 true 表示释放的是最后一个引用
    /// （随后对象的释放由外部所有权系统完成）
    fn dec_ref(&self) -> bool;
}
