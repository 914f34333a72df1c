//! # 调度器接口
//!
//! 缓存自身不创建线程，也不关心任务如何切换。
//! 阻塞等待、后台任务的创建与休眠都交给内核的调度器完成。

use alloc::boxed::Box;
use core::time::Duration;

/// 缓存所依赖的调度原语
pub trait Scheduler: Send + Sync + 'static {
    /// 可被唤醒的任务句柄
    type Task: Clone + Send + 'static;

    /// 当前任务的句柄
    fn current(&self) -> Self::Task;

    /// 挂起当前任务，直到被[`Scheduler::unpark`]唤醒。
    ///
    /// 允许虚假返回；在挂起之前送达的唤醒不能丢失。
    fn park(&self);

    fn unpark(&self, task: &Self::Task);

    /// 挂起当前任务，至多`duration`，期间可被[`Scheduler::unpark`]提前唤醒。
    ///
    /// 与[`Scheduler::park`]一样允许虚假返回。
    fn park_timeout(&self, duration: Duration);

    /// 创建一个内核任务
    fn spawn(&self, name: &'static str, job: Box<dyn FnOnce() + Send>);
}
