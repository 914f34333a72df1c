//! # CAR 目录
//!
//! Clock with Adaptive Replacement：
//!
//! - T1：最近只被装入过一次的驻留扇区（近度）
//! - T2：被引用过不止一次的驻留扇区（频度）
//! - B1/B2：从T1/T2淘汰出去的扇区编号（幽灵表，不占数据）
//! - p：T1 在驻留扇区中的目标大小，由幽灵命中自适应调整
//!
//! 命中只置引用位，不移动表；近度由淘汰时的时钟扫描惰性处理。
//!
//! 目录只做记账，不做I/O。被淘汰的缓存项先进入`draining`，
//! 由发起淘汰的任务在目录锁之外写回并归还槽，之后才从`draining`移除；
//! 在此之前对同一扇区的请求都要等待回收完成，避免读到过期的磁盘数据。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::entry::Entry;
use crate::{Scheduler, SectorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CarList {
    T1,
    T2,
    B1,
    B2,
}

/// 缺失的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// 四张表中都没有
    Cold,
    /// 命中B1
    GhostRecent,
    /// 命中B2
    GhostFrequent,
}

pub enum Lookup<S: Scheduler> {
    /// 命中T1或T2，申请者已登记在缓存项上
    Hit(Arc<Entry<S>>),
    /// 预读请求无事可做：扇区已驻留，或缓存已关闭
    Skip,
    /// 扇区仍在被回收，等回收完成后重试
    Draining(Arc<Entry<S>>),
    /// 需要装入。`entry`由调用者独占，`victim`是为它腾位置而被淘汰的缓存项
    Load {
        entry: Arc<Entry<S>>,
        victim: Option<Arc<Entry<S>>>,
        miss: Miss,
    },
}

pub struct Directory<S: Scheduler> {
    capacity: usize,
    /// T1 的目标大小
    p: usize,
    t1: VecDeque<Arc<Entry<S>>>,
    t2: VecDeque<Arc<Entry<S>>>,
    /// 表头是最近淘汰的扇区
    b1: VecDeque<SectorId>,
    b2: VecDeque<SectorId>,
    /// 扇区位于哪张表，保证一个扇区最多只在一张表里
    index: BTreeMap<SectorId, CarList>,
    /// 已淘汰、尚未回收完数据的缓存项
    draining: BTreeMap<SectorId, Arc<Entry<S>>>,
    closed: bool,
}

/// 目录在某一时刻的拷贝，表按从头到尾的顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub capacity: usize,
    pub p: usize,
    pub t1: Vec<SectorId>,
    pub t2: Vec<SectorId>,
    pub b1: Vec<SectorId>,
    pub b2: Vec<SectorId>,
}

impl DirectorySnapshot {
    /// 驻留扇区数 |T1| + |T2|
    pub fn resident(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    /// 目录中的扇区总数 |T1| + |T2| + |B1| + |B2|
    pub fn total(&self) -> usize {
        self.resident() + self.b1.len() + self.b2.len()
    }

    pub fn contains(&self, sector: SectorId) -> bool {
        [&self.t1, &self.t2, &self.b1, &self.b2]
            .into_iter()
            .any(|list| list.contains(&sector))
    }
}

impl<S: Scheduler> Directory<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            p: 0,
            t1: VecDeque::new(),
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            index: BTreeMap::new(),
            draining: BTreeMap::new(),
            closed: false,
        }
    }

    /// 查找扇区。
    ///
    /// 命中时登记申请者；缺失时在必要时淘汰一个驻留项，
    /// 并把由调用者独占的新缓存项放进T1（冷缺失）或T2（幽灵命中）。
    /// 预读请求命中时不置引用位，直接返回[`Lookup::Skip`]。
    pub fn lookup(&mut self, sector: SectorId, prefetch: bool) -> Lookup<S> {
        if self.closed {
            assert!(prefetch, "buffer cache has been shut down");
            return Lookup::Skip;
        }

        if let Some(victim) = self.draining.get(&sector) {
            if !victim.is_harvested() {
                return Lookup::Draining(victim.clone());
            }
            self.draining.remove(&sector);
        }

        let ghost = match self.index.get(&sector).copied() {
            Some(list @ (CarList::T1 | CarList::T2)) => {
                if prefetch {
                    return Lookup::Skip;
                }
                let entry = self.resident(list, sector);
                entry.enqueue(true);
                log::trace!("hit sector {sector} in {list:?}");
                return Lookup::Hit(entry);
            }
            ghost => ghost,
        };

        let victim = self.is_full().then(|| {
            if ghost.is_none() {
                self.trim_history();
            }
            self.replace()
        });
        if let Some(victim) = &victim {
            self.draining.insert(victim.sector(), victim.clone());
        }

        let entry = Arc::new(Entry::loading(sector));
        let miss = match ghost {
            None => {
                self.t1.push_back(entry.clone());
                self.index.insert(sector, CarList::T1);
                Miss::Cold
            }
            Some(CarList::B1) => {
                let delta = (self.b2.len() / self.b1.len()).max(1);
                self.p = (self.p + delta).min(self.capacity);
                log::debug!("ghost hit sector {sector} in B1, p -> {}", self.p);
                Self::forget(&mut self.b1, sector);
                self.t2.push_back(entry.clone());
                self.index.insert(sector, CarList::T2);
                Miss::GhostRecent
            }
            Some(CarList::B2) => {
                let delta = (self.b1.len() / self.b2.len()).max(1);
                self.p = self.p.saturating_sub(delta);
                log::debug!("ghost hit sector {sector} in B2, p -> {}", self.p);
                Self::forget(&mut self.b2, sector);
                self.t2.push_back(entry.clone());
                self.index.insert(sector, CarList::T2);
                Miss::GhostFrequent
            }
            Some(CarList::T1 | CarList::T2) => unreachable!(),
        };

        Lookup::Load {
            entry,
            victim,
            miss,
        }
    }

    /// 回收完成后移除`draining`中的记录（若仍是同一个缓存项）
    pub fn forget_draining(&mut self, victim: &Arc<Entry<S>>) {
        let sector = victim.sector();
        if self
            .draining
            .get(&sector)
            .is_some_and(|entry| Arc::ptr_eq(entry, victim))
        {
            self.draining.remove(&sector);
        }
    }

    /// 全部驻留的缓存项，先T1后T2
    pub fn residents(&self) -> Vec<Arc<Entry<S>>> {
        self.t1.iter().chain(self.t2.iter()).cloned().collect()
    }

    /// 关闭目录，交出所有仍可能持有槽的缓存项
    pub fn close(&mut self) -> Vec<Arc<Entry<S>>> {
        self.closed = true;
        self.b1.clear();
        self.b2.clear();
        self.index.clear();
        self.p = 0;

        let draining = core::mem::take(&mut self.draining);
        self.t1
            .drain(..)
            .chain(self.t2.drain(..))
            .chain(draining.into_values())
            .collect()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            capacity: self.capacity,
            p: self.p,
            t1: self.t1.iter().map(|entry| entry.sector()).collect(),
            t2: self.t2.iter().map(|entry| entry.sector()).collect(),
            b1: self.b1.iter().copied().collect(),
            b2: self.b2.iter().copied().collect(),
        }
    }
}

impl<S: Scheduler> Directory<S> {
    #[inline]
    fn is_full(&self) -> bool {
        self.t1.len() + self.t2.len() == self.capacity
    }

    fn resident(&self, list: CarList, sector: SectorId) -> Arc<Entry<S>> {
        let list = match list {
            CarList::T1 => &self.t1,
            _ => &self.t2,
        };
        list.iter()
            .find(|entry| entry.sector() == sector)
            .cloned()
            .expect("index points at a resident list without the sector")
    }

    /// 时钟扫描，淘汰恰好一个驻留项到幽灵表表头。
    ///
    /// 被引用过的T1项清位后**晋升到T2表尾**，而不是回到T1；
    /// 被引用过的T2项清位后回到T2表尾。
    fn replace(&mut self) -> Arc<Entry<S>> {
        loop {
            if self.t1.len() >= self.p.max(1) || self.t2.is_empty() {
                let entry = self.t1.pop_front().expect("replace on an empty cache");
                if entry.take_reference() {
                    self.index.insert(entry.sector(), CarList::T2);
                    self.t2.push_back(entry);
                } else {
                    log::debug!("evict sector {} from T1", entry.sector());
                    self.index.insert(entry.sector(), CarList::B1);
                    self.b1.push_front(entry.sector());
                    return entry;
                }
            } else {
                let entry = self.t2.pop_front().expect("replace on an empty cache");
                if entry.take_reference() {
                    self.t2.push_back(entry);
                } else {
                    log::debug!("evict sector {} from T2", entry.sector());
                    self.index.insert(entry.sector(), CarList::B2);
                    self.b2.push_front(entry.sector());
                    return entry;
                }
            }
        }
    }

    /// 冷缺失前为即将进入幽灵表的扇区腾位置：
    /// T1∪B1 已满则丢弃B1最旧的记录，否则整个目录已满时丢弃B2最旧的记录
    fn trim_history(&mut self) {
        let discarded = if self.t1.len() + self.b1.len() >= self.capacity && !self.b1.is_empty() {
            self.b1.pop_back()
        } else if self.t1.len() + self.t2.len() + self.b1.len() + self.b2.len()
            >= 2 * self.capacity
        {
            self.b2.pop_back()
        } else {
            None
        };

        if let Some(sector) = discarded {
            log::trace!("discard ghost sector {sector}");
            self.index.remove(&sector);
        }
    }

    fn forget(list: &mut VecDeque<SectorId>, sector: SectorId) {
        if let Some(pos) = list.iter().position(|&s| s == sector) {
            list.remove(pos);
        }
    }
}
