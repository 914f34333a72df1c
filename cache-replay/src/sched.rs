use std::thread::{self, Thread};
use std::time::Duration;

use buffer_cache::Scheduler;

/// 宿主机上用线程扮演内核任务
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    type Task = Thread;

    fn current(&self) -> Thread {
        thread::current()
    }

    fn park(&self) {
        thread::park();
    }

    fn unpark(&self, task: &Thread) {
        task.unpark();
    }

    fn park_timeout(&self, duration: Duration) {
        thread::park_timeout(duration);
    }

    fn spawn(&self, name: &'static str, job: Box<dyn FnOnce() + Send>) {
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(job)
            .expect("failed to spawn kernel task");
    }
}
