#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use block_dev::BlockDevice;
use buffer_cache::{BufferCache, CacheConfig, SECTOR_SIZE, Scheduler, SectorId};

/// 用宿主线程充当内核任务，并记下仍在运行的任务数
#[derive(Default)]
pub struct ThreadScheduler {
    live: Arc<AtomicUsize>,
}

impl ThreadScheduler {
    pub fn live_tasks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

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
        let live = self.live.clone();
        live.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                job();
                live.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("failed to spawn kernel task");
    }
}

/// 内存盘，记录每一次读写
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: AtomicUsize,
    writes: Mutex<Vec<usize>>,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; sectors]),
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn sector(&self, id: usize) -> Vec<u8> {
        self.sectors.lock().unwrap()[id].to_vec()
    }

    /// 绕过缓存直接改盘
    pub fn fill(&self, id: usize, byte: u8) {
        self.sectors.lock().unwrap()[id].fill(byte);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn writes_to(&self, id: usize) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&sector| sector == id)
            .count()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
        self.writes.lock().unwrap().push(block_id);
    }
}

pub type Cache = Arc<BufferCache<ThreadScheduler>>;

/// 写回任务一小时才醒一次，测试里等同于不存在
pub fn quiet_config(capacity: usize) -> CacheConfig {
    CacheConfig {
        capacity,
        writeback_interval: Duration::from_secs(3600),
        readahead: false,
    }
}

pub fn with_scheduler(config: CacheConfig) -> (Arc<MemDisk>, Cache, Arc<ThreadScheduler>) {
    let disk = Arc::new(MemDisk::new(256));
    let sched = Arc::new(ThreadScheduler::default());
    let cache =
        BufferCache::initialize(config, disk.clone(), sched.clone()).expect("valid config");
    (disk, cache, sched)
}

pub fn with_config(config: CacheConfig) -> (Arc<MemDisk>, Cache) {
    let (disk, cache, _) = with_scheduler(config);
    (disk, cache)
}

pub fn cache(capacity: usize) -> (Arc<MemDisk>, Cache) {
    with_config(quiet_config(capacity))
}

pub fn s(raw: usize) -> SectorId {
    SectorId::new(raw)
}

pub fn ids(raw: &[usize]) -> Vec<SectorId> {
    raw.iter().copied().map(SectorId::new).collect()
}

/// 轮询直到条件成立，最多等5秒
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
