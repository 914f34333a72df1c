//! # 缓存项
//!
//! 每个驻留扇区对应一个缓存项，记录扇区身份、标志位、占用的槽以及访问状态。
//!
//! 访问协议是一个显式的状态机：
//!
//! ```text
//!               acquire(Shared)                 acquire(Exclusive)
//!   Shared(n) <───────────────── Idle ──────────────────────> Exclusive
//!       │   release (n == 1)      ▲ ▲        release              │
//!       └─────────────────────────┘ └─────────────────────────────┘
//!
//!               drain (pending == 0)
//!   Idle ─────────────────────────────> Draining ──undrain──> Idle
//! ```
//!
//! 申请者先在目录锁下登记`pending`，再在缓存项上等待条件成立。
//! 每次状态变化都唤醒**全部**等待者，由各自重新检查条件，
//! 所以只有弱公平：共享与独占的等待者之间谁先被满足没有次序保证。
//!
//! `Draining`是写回与淘汰借用的独占：它要求连`pending`也清零，
//! 从而保证不会有正在排队的读写者看到一个被回收的缓冲区。

use alloc::vec::Vec;
use core::mem;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

use crate::pool::SlotId;
use crate::{Scheduler, SectorId};

/// 客户申请的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Shared,
    Exclusive,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    /// 缓冲区与磁盘内容一致
    Valid = 0b0001,
    /// 缓冲区被修改过，尚未写回
    Dirty = 0b0010,
    /// CLOCK 的第二次机会位
    Referenced = 0b0100,
    /// 已被淘汰者收回数据，槽已归还
    Harvested = 0b1000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Idle,
    Shared(usize),
    Exclusive,
    Draining,
}

pub struct Entry<S: Scheduler> {
    sector: SectorId,
    state: Mutex<EntryState<S::Task>>,
}

struct EntryState<T> {
    access: Access,
    /// 已在目录中登记、尚未拿到访问权的申请者个数
    pending: usize,
    flags: BitFlags<EntryFlag>,
    slot: Option<SlotId>,
    waiters: Vec<T>,
    /// 广播的次数，每次取走`waiters`时加一
    broadcasts: u64,
}

impl<T> EntryState<T> {
    fn take_waiters(&mut self) -> Vec<T> {
        self.broadcasts += 1;
        mem::take(&mut self.waiters)
    }
}

impl<S: Scheduler> Entry<S> {
    /// 新装入的缓存项，由装入者独占，直到数据读入
    pub fn loading(sector: SectorId) -> Self {
        Self {
            sector,
            state: Mutex::new(EntryState {
                access: Access::Exclusive,
                pending: 0,
                flags: BitFlags::empty(),
                slot: None,
                waiters: Vec::new(),
                broadcasts: 0,
            }),
        }
    }

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    /// 在目录锁下登记一个申请者；`touch`为真时同时置引用位
    pub fn enqueue(&self, touch: bool) {
        let mut state = self.state.lock();
        state.pending += 1;
        if touch {
            state.flags |= EntryFlag::Referenced;
        }
    }

    /// 等待并取得访问权，必须先[`Entry::enqueue`]
    pub fn acquire(&self, sched: &S, mode: Mode) {
        self.wait_until(sched, |state| {
            let granted = match (mode, state.access) {
                (Mode::Shared, Access::Idle) => Access::Shared(1),
                (Mode::Shared, Access::Shared(readers)) => Access::Shared(readers + 1),
                (Mode::Exclusive, Access::Idle) => Access::Exclusive,
                _ => return false,
            };
            state.pending -= 1;
            state.access = granted;
            true
        });
    }

    pub fn release(&self, sched: &S, mode: Mode) {
        let mut state = self.state.lock();
        state.access = match (mode, state.access) {
            (Mode::Exclusive, Access::Exclusive) => Access::Idle,
            (Mode::Shared, Access::Shared(1)) => Access::Idle,
            (Mode::Shared, Access::Shared(readers)) => Access::Shared(readers - 1),
            (mode, access) => panic!(
                "releasing sector {} as {mode:?} while it is {access:?}",
                self.sector
            ),
        };
        let waiters = state.take_waiters();
        drop(state);

        broadcast(sched, waiters);
    }

    /// 等待缓存项完全空闲（无持有者、无排队者），借用独占
    pub fn drain(&self, sched: &S) {
        self.wait_until(sched, |state| {
            if state.pending == 0 && state.access == Access::Idle {
                state.access = Access::Draining;
                true
            } else {
                false
            }
        });
    }

    pub fn undrain(&self, sched: &S) {
        let mut state = self.state.lock();
        assert_eq!(Access::Draining, state.access);
        state.access = Access::Idle;
        let waiters = state.take_waiters();
        drop(state);

        broadcast(sched, waiters);
    }

    /// 装入完成：绑定槽，数据有效。
    /// 共享申请在此降级为一个读者，唤醒排队的其他读者。
    pub fn finish_load(&self, sched: &S, slot: SlotId, mode: Mode) {
        let mut state = self.state.lock();
        assert_eq!(Access::Exclusive, state.access);
        state.slot = Some(slot);
        state.flags |= EntryFlag::Valid;
        if mode == Mode::Exclusive {
            return;
        }

        state.access = Access::Shared(1);
        let waiters = state.take_waiters();
        drop(state);

        broadcast(sched, waiters);
    }

    /// 淘汰收尾：交出槽，数据作废，唤醒等待回收完成的任务。
    /// 必须处于`Draining`。
    pub fn retire(&self, sched: &S) {
        let mut state = self.state.lock();
        assert_eq!(Access::Draining, state.access);
        state.access = Access::Idle;
        state.slot = None;
        state.flags = EntryFlag::Harvested.into();
        let waiters = state.take_waiters();
        drop(state);

        broadcast(sched, waiters);
    }

    pub fn wait_harvested(&self, sched: &S) {
        self.wait_until(sched, |state| state.flags.contains(EntryFlag::Harvested));
    }

    pub fn is_harvested(&self) -> bool {
        self.flags().contains(EntryFlag::Harvested)
    }

    /// 读取并清除引用位，返回清除前的值
    pub fn take_reference(&self) -> bool {
        let mut state = self.state.lock();
        let referenced = state.flags.contains(EntryFlag::Referenced);
        state.flags.remove(EntryFlag::Referenced);
        referenced
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<EntryFlag> {
        self.state.lock().flags
    }

    #[inline]
    pub fn insert_flags(&self, flags: impl Into<BitFlags<EntryFlag>>) {
        self.state.lock().flags.insert(flags);
    }

    #[inline]
    pub fn remove_flags(&self, flags: impl Into<BitFlags<EntryFlag>>) {
        self.state.lock().flags.remove(flags);
    }

    #[inline]
    pub fn slot(&self) -> Option<SlotId> {
        self.state.lock().slot
    }

    #[cfg(test)]
    pub fn access(&self) -> Access {
        self.state.lock().access
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// 循环检查条件：不成立就登记进等待队列并挂起。
    /// 条件闭包在成立时顺带完成状态迁移。
    ///
    /// 登记后若没有发生过广播，自己仍在队列里，虚假唤醒后不再重复登记。
    fn wait_until(&self, sched: &S, mut ready: impl FnMut(&mut EntryState<S::Task>) -> bool) {
        let mut queued_at = None;
        loop {
            let mut state = self.state.lock();
            if ready(&mut state) {
                return;
            }
            if queued_at != Some(state.broadcasts) {
                state.waiters.push(sched.current());
                queued_at = Some(state.broadcasts);
            }
            drop(state);

            sched.park();
        }
    }
}

impl<S: Scheduler> core::fmt::Debug for Entry<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Entry")
            .field("sector", &self.sector)
            .field("access", &state.access)
            .field("pending", &state.pending)
            .field("flags", &state.flags)
            .field("slot", &state.slot)
            .finish()
    }
}

fn broadcast<S: Scheduler>(sched: &S, waiters: Vec<S::Task>) {
    for task in &waiters {
        sched.unpark(task);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::boxed::Box;
    use core::time::Duration;

    use super::*;

    /// 永不阻塞的调度器：单任务测试里任何一次挂起都说明协议出了错
    pub struct NoWait;

    impl Scheduler for NoWait {
        type Task = ();

        fn current(&self) {}

        fn park(&self) {
            panic!("single task would block forever");
        }

        fn unpark(&self, _: &()) {}

        fn park_timeout(&self, _: Duration) {}

        fn spawn(&self, _: &'static str, _: Box<dyn FnOnce() + Send>) {}
    }

    /// 挂起立即返回，模拟虚假唤醒
    struct Spurious;

    impl Scheduler for Spurious {
        type Task = ();

        fn current(&self) {}

        fn park(&self) {}

        fn unpark(&self, _: &()) {}

        fn park_timeout(&self, _: Duration) {}

        fn spawn(&self, _: &'static str, _: Box<dyn FnOnce() + Send>) {}
    }

    fn loaded(mode: Mode) -> Entry<NoWait> {
        let entry = Entry::loading(SectorId::new(7));
        entry.finish_load(&NoWait, SlotId::from(0), mode);
        entry
    }

    #[test]
    fn shared_holders_coexist() {
        let entry = loaded(Mode::Shared);
        entry.enqueue(true);
        entry.acquire(&NoWait, Mode::Shared);
        assert_eq!(Access::Shared(2), entry.access());
        assert_eq!(0, entry.pending());

        entry.release(&NoWait, Mode::Shared);
        entry.release(&NoWait, Mode::Shared);
        assert_eq!(Access::Idle, entry.access());
    }

    #[test]
    #[should_panic(expected = "would block")]
    fn exclusive_waits_for_readers() {
        let entry = loaded(Mode::Shared);
        entry.enqueue(true);
        entry.acquire(&NoWait, Mode::Exclusive);
    }

    #[test]
    #[should_panic(expected = "would block")]
    fn drain_waits_for_pending() {
        let entry = loaded(Mode::Exclusive);
        entry.release(&NoWait, Mode::Exclusive);
        entry.enqueue(false);
        entry.drain(&NoWait);
    }

    #[test]
    #[should_panic(expected = "releasing sector 7")]
    fn release_without_acquire() {
        let entry = loaded(Mode::Exclusive);
        entry.release(&NoWait, Mode::Exclusive);
        entry.release(&NoWait, Mode::Exclusive);
    }

    #[test]
    fn load_then_retire() {
        let entry = loaded(Mode::Exclusive);
        assert_eq!(Some(SlotId::from(0)), entry.slot());
        assert!(entry.flags().contains(EntryFlag::Valid));
        assert!(!entry.flags().contains(EntryFlag::Referenced));

        entry.release(&NoWait, Mode::Exclusive);
        entry.drain(&NoWait);
        entry.retire(&NoWait);
        assert!(entry.is_harvested());
        assert_eq!(None, entry.slot());
        assert_eq!(Access::Idle, entry.access());
    }

    #[test]
    fn reference_bit_is_second_chance() {
        let entry = loaded(Mode::Exclusive);
        assert!(!entry.take_reference());
        entry.enqueue(true);
        assert!(entry.take_reference());
        assert!(!entry.take_reference());
    }

    #[test]
    fn spurious_wakeup_does_not_requeue() {
        let entry = Entry::<Spurious>::loading(SectorId::new(7));
        let mut polls = 0;
        entry.wait_until(&Spurious, |state| {
            polls += 1;
            match polls {
                1 => assert!(state.waiters.is_empty()),
                2 | 3 => assert_eq!(1, state.waiters.len()),
                4 => {
                    // 两次唤醒之间发生了一次广播
                    assert_eq!(1, state.waiters.len());
                    state.take_waiters();
                }
                _ => {
                    // 广播取走了队列，重新登记一次
                    assert_eq!(1, state.waiters.len());
                    return true;
                }
            }
            false
        });
        assert_eq!(5, polls);
        assert_eq!(1, entry.state.lock().broadcasts);
    }
}
