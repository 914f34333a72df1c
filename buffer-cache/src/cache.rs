//! # 缓存层
//!
//! 块设备读写速度远慢于内存，因此在内存中开辟定长的缓冲区池，
//! 把即将操作的扇区复制到内存中。使用者对后备存储的所有访问都经过本层，
//! 且**操作扇区时它一定在缓冲区当中**。
//!
//! [`BufferCache::get_block`]返回一个[`BlockHandle`]，持有它即持有该扇区的共享或独占访问权，
//! 句柄析构时自动释放。脏数据由后台写回任务与[`BufferCache::shutdown`]落盘。
//!
//! 句柄自己握着缓冲区的锁，读视图借`&self`，写视图借`&mut self`，
//! 写视图存活期间同一句柄上的任何其他视图都无法通过编译：
//!
//! ```compile_fail
//! use buffer_cache::{BlockHandle, Scheduler};
//!
//! fn overlap<S: Scheduler>(handle: &mut BlockHandle<'_, S>) {
//!     let data = handle.modify();
//!     let first = handle.read()[0];
//!     data[1] = first;
//! }
//! ```
//!
//! 视图用完即可标脏、再读，无需额外的作用域：
//!
//! ```
//! use buffer_cache::{BlockHandle, Scheduler};
//!
//! fn stamp<S: Scheduler>(handle: &mut BlockHandle<'_, S>) -> u8 {
//!     let data = handle.zero();
//!     data[0] = 7;
//!     handle.mark_dirty();
//!     handle.read()[0]
//! }
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use block_dev::BlockDevice;
use spin::{Mutex, RwLockReadGuard, RwLockWriteGuard};

use crate::car::{Directory, DirectorySnapshot, Lookup, Miss};
use crate::entry::{Entry, EntryFlag, Mode};
use crate::pool::{SlotId, SlotPool};
use crate::{CacheConfig, Error, Scheduler, SectorId, daemon};

pub struct BufferCache<S: Scheduler> {
    config: CacheConfig,
    device: Arc<dyn BlockDevice>,
    pub(crate) sched: Arc<S>,
    pool: SlotPool,
    directory: Mutex<Directory<S>>,
    counters: Counters,
    /// 待预读的扇区
    pub(crate) readahead_queue: Mutex<VecDeque<SectorId>>,
    /// 预读任务启动后登记自己，以便入队时唤醒
    pub(crate) readahead_task: Mutex<Option<S::Task>>,
    /// 写回任务启动后登记自己，以便关闭时唤醒
    pub(crate) writeback_task: Mutex<Option<S::Task>>,
    stopped: AtomicBool,
}

/// 缓存运行至今的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub ghost_hits: usize,
    pub evictions: usize,
    /// 读后备存储的次数
    pub reads: usize,
    /// 写后备存储的次数
    pub writes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    ghost_hits: AtomicUsize,
    evictions: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// 对一个扇区的访问权。析构时释放。
pub struct BlockHandle<'a, S: Scheduler> {
    /// 字段按声明顺序析构，缓冲区锁先于访问权放开
    data: SectorData<'a>,
    hold: Hold<'a, S>,
}

/// 共享访问配读锁，独占访问配写锁
enum SectorData<'a> {
    Shared(RwLockReadGuard<'a, Box<[u8]>>),
    Exclusive(RwLockWriteGuard<'a, Box<[u8]>>),
}

struct Hold<'a, S: Scheduler> {
    cache: &'a BufferCache<S>,
    entry: Arc<Entry<S>>,
    mode: Mode,
}

impl<S: Scheduler> BufferCache<S> {
    /// 建立槽池与目录，启动写回和预读任务
    pub fn initialize(
        config: CacheConfig,
        device: Arc<dyn BlockDevice>,
        sched: Arc<S>,
    ) -> Result<Arc<Self>, Error> {
        config.validate()?;

        let cache = Arc::new(Self {
            pool: SlotPool::new(config.capacity),
            directory: Mutex::new(Directory::new(config.capacity)),
            config,
            device,
            sched,
            counters: Counters::default(),
            readahead_queue: Mutex::new(VecDeque::new()),
            readahead_task: Mutex::new(None),
            writeback_task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });
        daemon::spawn(&cache);

        log::info!(
            "buffer cache: {} slots, writeback every {:?}, readahead {}",
            cache.config.capacity,
            cache.config.writeback_interval,
            cache.config.readahead
        );
        Ok(cache)
    }

    #[inline]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 取得扇区的共享或独占访问权，必要时淘汰其他扇区并从后备存储读入。
    ///
    /// 可能无限期阻塞，直到冲突的持有者释放。
    /// 持有一个句柄时不要再去获取另一个扇区，否则两个任务交叉获取时可能死锁。
    pub fn get_block(&self, sector: SectorId, mode: Mode) -> BlockHandle<'_, S> {
        assert!(self.is_running(), "buffer cache has been shut down");

        let entry = self
            .fetch(sector, mode, false)
            .expect("client request always yields an entry");
        let slot = entry.slot().expect("held block has no slot");
        let data = match mode {
            Mode::Shared => SectorData::Shared(self.pool.read(slot)),
            Mode::Exclusive => SectorData::Exclusive(self.pool.write(slot)),
        };
        BlockHandle {
            data,
            hold: Hold {
                cache: self,
                entry,
                mode,
            },
        }
    }

    /// 释放[`BufferCache::get_block`]取得的访问权
    pub fn put_block(&self, handle: BlockHandle<'_, S>) {
        drop(handle);
    }

    pub fn read_block<'h>(&self, handle: &'h BlockHandle<'_, S>) -> &'h [u8] {
        handle.read()
    }

    pub fn zero_block<'h>(&self, handle: &'h mut BlockHandle<'_, S>) -> &'h mut [u8] {
        handle.zero()
    }

    pub fn modify_block<'h>(&self, handle: &'h mut BlockHandle<'_, S>) -> &'h mut [u8] {
        handle.modify()
    }

    pub fn mark_dirty(&self, handle: &BlockHandle<'_, S>) {
        handle.mark_dirty();
    }

    /// 把预读请求放进队列，由后台任务装入
    pub fn readahead(&self, sector: SectorId) {
        if !self.is_running() {
            return;
        }
        self.readahead_queue.lock().push_back(sector);
        self.wake_readahead();
    }

    /// 同步执行一遍写回：所有驻留的脏扇区落盘。
    ///
    /// 调用者自己不能持有句柄，否则会一直等下去。
    pub fn flush(&self) {
        let entries = self.directory.lock().residents();
        let mut written = 0;
        for entry in &entries {
            entry.drain(&self.sched);
            if let Some(slot) = entry.slot() {
                if entry.flags().contains(EntryFlag::Dirty) {
                    self.write_sector(entry.sector(), slot);
                    written += 1;
                }
                entry.remove_flags(EntryFlag::Dirty);
                entry.insert_flags(EntryFlag::Valid);
            }
            entry.undrain(&self.sched);
        }
        log::debug!("writeback: {written} of {} resident sectors", entries.len());
    }

    /// 写回所有脏扇区，随后归还槽池的内存。之后不能再获取扇区。
    ///
    /// 会等待所有尚未释放的句柄。重复调用无效果。
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake_readahead();
        if let Some(task) = self.writeback_task.lock().as_ref() {
            self.sched.unpark(task);
        }
        self.flush();

        let entries = self.directory.lock().close();
        for entry in &entries {
            self.harvest(entry);
        }
        self.pool.release();

        log::info!("buffer cache shut down: {:?}", self.stats());
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub fn directory(&self) -> DirectorySnapshot {
        self.directory.lock().snapshot()
    }

    /// 已分配的槽数
    pub fn slots_in_use(&self) -> usize {
        self.pool.in_use()
    }
}

impl<S: Scheduler> BufferCache<S> {
    /// 预读一个扇区：已驻留则什么也不做，否则像普通缺失一样装入
    pub(crate) fn prefetch(&self, sector: SectorId) {
        if let Some(entry) = self.fetch(sector, Mode::Shared, true) {
            entry.release(&self.sched, Mode::Shared);
        }
    }

    pub(crate) fn wake_readahead(&self) {
        if let Some(task) = self.readahead_task.lock().as_ref() {
            self.sched.unpark(task);
        }
    }

    /// 返回已取得`mode`访问权的缓存项；预读无事可做时返回空
    fn fetch(&self, sector: SectorId, mode: Mode, prefetch: bool) -> Option<Arc<Entry<S>>> {
        loop {
            let lookup = self.directory.lock().lookup(sector, prefetch);
            match lookup {
                Lookup::Hit(entry) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    entry.acquire(&self.sched, mode);
                    return Some(entry);
                }
                Lookup::Skip => return None,
                Lookup::Draining(victim) => victim.wait_harvested(&self.sched),
                Lookup::Load {
                    entry,
                    victim,
                    miss,
                } => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    if miss != Miss::Cold {
                        self.counters.ghost_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Some(victim) = victim {
                        self.harvest(&victim);
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        self.directory.lock().forget_draining(&victim);
                    }
                    self.load(&entry, mode);

                    if miss == Miss::Cold && !prefetch && self.config.readahead {
                        self.readahead(sector + 1);
                    }
                    return Some(entry);
                }
            }
        }
    }

    /// 给独占中的新缓存项分配槽并读入数据
    fn load(&self, entry: &Entry<S>, mode: Mode) {
        // 按容量不变式，此时一定还有空槽
        let slot = self.pool.alloc().expect("run out of buffer cache slots");
        self.device
            .read_block(entry.sector().into(), &mut self.pool.write(slot));
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        log::trace!("load sector {} into {slot:?}", entry.sector());

        entry.finish_load(&self.sched, slot, mode);
    }

    /// 等缓存项排空，写回脏数据并归还它的槽
    fn harvest(&self, entry: &Entry<S>) {
        entry.drain(&self.sched);
        if let Some(slot) = entry.slot() {
            if entry.flags().contains(EntryFlag::Dirty) {
                self.write_sector(entry.sector(), slot);
            }
            self.pool.dealloc(slot);
        }
        entry.retire(&self.sched);
    }

    fn write_sector(&self, sector: SectorId, slot: SlotId) {
        self.device.write_block(sector.into(), &self.pool.read(slot));
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        log::trace!("write back sector {sector}");
    }
}

impl<S: Scheduler> Drop for BufferCache<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Counters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ghost_hits: self.ghost_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl<S: Scheduler> BlockHandle<'_, S> {
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.hold.entry.sector()
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.hold.mode
    }

    /// 只读视图。至少需要共享访问权。
    pub fn read(&self) -> &[u8] {
        self.hold.entry.insert_flags(EntryFlag::Referenced);
        match &self.data {
            SectorData::Shared(guard) => &guard[..],
            SectorData::Exclusive(guard) => &guard[..],
        }
    }

    /// 清零并返回可写视图，扇区随即变脏。需要独占访问权。
    pub fn zero(&mut self) -> &mut [u8] {
        let entry = &self.hold.entry;
        let data = exclusive(&mut self.data, entry.sector(), "zero");
        data.fill(0);
        entry.insert_flags(EntryFlag::Dirty | EntryFlag::Referenced);
        entry.remove_flags(EntryFlag::Valid);
        data
    }

    /// 不清零的可写视图，改完后需[`BlockHandle::mark_dirty`]。需要独占访问权。
    pub fn modify(&mut self) -> &mut [u8] {
        let entry = &self.hold.entry;
        let data = exclusive(&mut self.data, entry.sector(), "modify");
        entry.insert_flags(EntryFlag::Referenced);
        data
    }

    pub fn mark_dirty(&self) {
        self.hold
            .entry
            .insert_flags(EntryFlag::Dirty | EntryFlag::Referenced);
    }

    pub fn is_dirty(&self) -> bool {
        self.hold.entry.flags().contains(EntryFlag::Dirty)
    }
}

fn exclusive<'d>(data: &'d mut SectorData<'_>, sector: SectorId, op: &str) -> &'d mut [u8] {
    match data {
        SectorData::Exclusive(guard) => &mut guard[..],
        SectorData::Shared(_) => panic!("{op} on sector {sector} needs exclusive access"),
    }
}

impl<S: Scheduler> Drop for Hold<'_, S> {
    fn drop(&mut self) {
        self.entry.release(&self.cache.sched, self.mode);
    }
}

impl<S: Scheduler> core::fmt::Debug for BlockHandle<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("sector", &self.sector())
            .field("mode", &self.mode())
            .finish()
    }
}
