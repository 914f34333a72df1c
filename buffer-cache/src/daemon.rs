//! # 后台任务
//!
//! - 写回任务：周期性醒来，把驻留的脏扇区写回后备存储；
//! - 预读任务：按顺序服务预读队列，队列空时挂起，入队时被唤醒。
//!
//! 两个任务都只持有缓存的弱引用，只在干活时短暂升级。
//! 启动后各自登记任务句柄，关闭时被立即唤醒并退出。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

use crate::{BufferCache, Scheduler};

pub(crate) fn spawn<S: Scheduler>(cache: &Arc<BufferCache<S>>) {
    let sched = &cache.sched;

    let (weak, task_sched) = (Arc::downgrade(cache), sched.clone());
    sched.spawn(
        "bcache-writeback",
        Box::new(move || writeback(weak, task_sched)),
    );

    let (weak, task_sched) = (Arc::downgrade(cache), sched.clone());
    sched.spawn(
        "bcache-readahead",
        Box::new(move || readahead(weak, task_sched)),
    );
}

fn writeback<S: Scheduler>(cache: Weak<BufferCache<S>>, sched: Arc<S>) {
    let interval = match cache.upgrade() {
        Some(cache) => {
            *cache.writeback_task.lock() = Some(sched.current());
            cache.config().writeback_interval
        }
        None => return,
    };

    loop {
        // 挂起期间不能持有强引用，否则缓存永远不会被丢弃
        match cache.upgrade() {
            Some(cache) if cache.is_running() => {}
            _ => break,
        }
        // 提前返回时照样写回一遍
        sched.park_timeout(interval);

        match cache.upgrade() {
            Some(cache) if cache.is_running() => cache.flush(),
            _ => break,
        }
    }
    log::debug!("writeback task exits");
}

fn readahead<S: Scheduler>(cache: Weak<BufferCache<S>>, sched: Arc<S>) {
    match cache.upgrade() {
        Some(cache) => *cache.readahead_task.lock() = Some(sched.current()),
        None => return,
    }

    loop {
        let served = match cache.upgrade() {
            Some(cache) if cache.is_running() => {
                let next = cache.readahead_queue.lock().pop_front();
                if let Some(sector) = next {
                    log::trace!("readahead sector {sector}");
                    cache.prefetch(sector);
                }
                next.is_some()
            }
            _ => break,
        };

        if !served {
            sched.park();
        }
    }
    log::debug!("readahead task exits");
}
