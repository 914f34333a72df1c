//! # 槽池
//!
//! 一段定长扇区缓冲区组成的数组，配一张占用位图。
//! 缓存项只记录槽号[`SlotId`]，不持有缓冲区的地址；
//! 某个槽在同一时刻只属于一个驻留的缓存项。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use derive_more::{From, Into};
use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::SECTOR_SIZE;

/// 位图中一组的位数
const GROUP_BITS: usize = u64::BITS as usize;

/// 槽号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct SlotId(usize);

#[derive(Debug)]
pub struct SlotPool {
    buffers: Box<[RwLock<Box<[u8]>>]>,
    /// 槽位图锁独立于目录锁，分配、回收可以与淘汰的记账并发进行
    map: Mutex<SlotMap>,
}

/// 占用位图，一位对应一个物理缓冲区
#[derive(Debug)]
struct SlotMap {
    groups: Vec<u64>,
    used: usize,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        let buffers = (0..capacity)
            .map(|_| RwLock::new(vec![0u8; SECTOR_SIZE].into_boxed_slice()))
            .collect();

        Self {
            buffers,
            map: Mutex::new(SlotMap::new(capacity)),
        }
    }

    /// 已分配的槽数
    pub fn in_use(&self) -> usize {
        self.map.lock().used
    }

    /// 扫描位图，分配一个空闲槽。若槽已用尽，则返回空。
    pub fn alloc(&self) -> Option<SlotId> {
        let slot = self.map.lock().alloc();
        log::trace!("slot alloc: {slot:?}");
        slot
    }

    pub fn dealloc(&self, slot: SlotId) {
        log::trace!("slot dealloc: {slot:?}");
        self.map.lock().dealloc(slot);
    }

    pub fn read(&self, slot: SlotId) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buffers[slot.0].read()
    }

    pub fn write(&self, slot: SlotId) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.buffers[slot.0].write()
    }

    /// 把全部缓冲区的内存归还给分配器。
    /// 调用前所有槽都必须已经释放。
    pub fn release(&self) {
        let used = self.in_use();
        assert_eq!(0, used, "releasing slot pool with {used} slots in use");

        for buffer in self.buffers.iter() {
            *buffer.write() = Box::default();
        }
    }
}

impl SlotMap {
    fn new(capacity: usize) -> Self {
        let mut groups = vec![0u64; capacity.div_ceil(GROUP_BITS)];

        // 末组里超出容量的位没有对应的缓冲区，预先置一，扫描时永远跳过
        let tail = capacity % GROUP_BITS;
        if tail != 0 {
            if let Some(last) = groups.last_mut() {
                *last = !0u64 << tail;
            }
        }

        Self { groups, used: 0 }
    }

    fn alloc(&mut self) -> Option<SlotId> {
        // 找到第一组还有0的位
        let (group_index, ingroup_index) =
            self.groups
                .iter()
                .enumerate()
                .find_map(|(group_index, &bits)| {
                    (bits != u64::MAX).then_some((group_index, bits.trailing_ones() as usize))
                })?;

        self.groups[group_index] |= 1 << ingroup_index;
        self.used += 1;
        Some(SlotId(group_index * GROUP_BITS + ingroup_index))
    }

    fn dealloc(&mut self, slot: SlotId) {
        let (group_index, ingroup_index) = (slot.0 / GROUP_BITS, slot.0 % GROUP_BITS);

        // 槽号一定得有对应的位
        assert_ne!(
            self.groups[group_index] & (1 << ingroup_index),
            0,
            "double free of {slot:?}"
        );

        self.groups[group_index] &= !(1 << ingroup_index);
        self.used -= 1;
    }
}
