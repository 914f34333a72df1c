mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use buffer_cache::Mode;
use common::{ids, s};

#[test]
fn exclusive_holder_blocks_second_writer() {
    let (_disk, cache) = common::cache(4);
    let acquired = AtomicBool::new(false);

    let mut first = cache.get_block(s(1), Mode::Exclusive);
    first.modify()[0] = 42;
    first.mark_dirty();

    thread::scope(|scope| {
        let second = scope.spawn(|| {
            let handle = cache.get_block(s(1), Mode::Exclusive);
            acquired.store(true, Ordering::SeqCst);
            let seen = handle.read()[0];
            seen
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        cache.put_block(first);
        assert_eq!(42, second.join().unwrap());
    });
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn shared_readers_coexist() {
    let (disk, cache) = common::cache(2);
    disk.fill(4, 0x44);

    let reader = cache.get_block(s(4), Mode::Shared);
    let seen = thread::scope(|scope| {
        scope
            .spawn(|| cache.get_block(s(4), Mode::Shared).read()[0])
            .join()
            .unwrap()
    });
    assert_eq!(0x44, seen);
    assert_eq!(0x44, reader.read()[0]);
    assert_eq!(1, disk.reads());
}

#[test]
fn readers_wait_for_writer() {
    let (_disk, cache) = common::cache(2);
    let mut writer = cache.get_block(s(2), Mode::Exclusive);

    thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| cache.get_block(s(2), Mode::Shared).read()[0]))
            .collect();

        thread::sleep(Duration::from_millis(50));
        writer.zero().fill(9);
        drop(writer);

        for reader in readers {
            assert_eq!(9, reader.join().unwrap());
        }
    });
}

#[test]
fn eviction_waits_for_holder() {
    let (_disk, cache) = common::cache(1);
    let loaded = AtomicBool::new(false);

    let holder = cache.get_block(s(1), Mode::Shared);

    thread::scope(|scope| {
        let loader = scope.spawn(|| {
            let handle = cache.get_block(s(2), Mode::Exclusive);
            loaded.store(true, Ordering::SeqCst);
            drop(handle);
        });

        thread::sleep(Duration::from_millis(100));
        // 1已被选为牺牲者，但缓冲区仍在持有者手中
        assert!(!loaded.load(Ordering::SeqCst));
        assert_eq!(1, cache.slots_in_use());
        assert_eq!(s(1), holder.sector());

        drop(holder);
        loader.join().unwrap();
    });

    let dir = cache.directory();
    assert_eq!(ids(&[2]), dir.t1);
    assert!(!dir.t2.contains(&s(1)));
    assert!(dir.contains(s(1)));
    assert_eq!(1, cache.slots_in_use());
}

#[test]
fn lookup_of_draining_sector_waits_for_writeback() {
    let (disk, cache) = common::cache(1);

    let mut holder = cache.get_block(s(1), Mode::Exclusive);
    holder.zero().fill(0x5A);

    thread::scope(|scope| {
        // 淘汰1，但1在持有者手中，回收被挂起
        let evictor = scope.spawn(|| drop(cache.get_block(s(2), Mode::Shared)));
        thread::sleep(Duration::from_millis(50));

        // 再次申请1只能等回收写回之后从盘上重新读
        let rereader = scope.spawn(|| cache.get_block(s(1), Mode::Shared).read()[0]);
        thread::sleep(Duration::from_millis(50));

        drop(holder);
        evictor.join().unwrap();
        assert_eq!(0x5A, rereader.join().unwrap());
    });

    assert_eq!(1, disk.writes_to(1));
    assert_eq!(0x5A, disk.sector(1)[0]);
}

#[test]
fn concurrent_counters_survive_eviction() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;
    const SECTORS: usize = 12;

    let (disk, cache) = common::cache(4);
    let cache = &*cache;

    thread::scope(|scope| {
        for t in 0..THREADS {
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let sector = (t * 7 + round * 3) % SECTORS;
                    let mut handle = cache.get_block(s(sector), Mode::Exclusive);
                    {
                        let data = handle.modify();
                        let mut count = [0; 8];
                        count.copy_from_slice(&data[..8]);
                        let count = u64::from_le_bytes(count) + 1;
                        data[..8].copy_from_slice(&count.to_le_bytes());
                    }
                    handle.mark_dirty();
                }
            });
        }

        // 并发观察目录的边界
        scope.spawn(|| {
            for _ in 0..200 {
                let dir = cache.directory();
                assert!(dir.resident() <= dir.capacity);
                assert!(dir.total() <= 2 * dir.capacity);
                assert!(dir.p <= dir.capacity);
                assert!(cache.slots_in_use() <= dir.capacity);
                thread::yield_now();
            }
        });
    });

    cache.flush();
    let total: u64 = (0..SECTORS)
        .map(|sector| {
            let mut count = [0; 8];
            count.copy_from_slice(&disk.sector(sector)[..8]);
            u64::from_le_bytes(count)
        })
        .sum();
    assert_eq!((THREADS * ROUNDS) as u64, total);

    let dir = cache.directory();
    assert_eq!(dir.resident(), cache.slots_in_use());
}

#[test]
fn shutdown_waits_for_outstanding_handle() {
    let (disk, cache) = common::cache(2);

    let mut handle = cache.get_block(s(3), Mode::Exclusive);
    handle.modify()[0] = 3;
    handle.mark_dirty();

    thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(handle);
        });
        cache.shutdown();
    });

    assert_eq!(1, disk.writes_to(3));
    assert_eq!(3, disk.sector(3)[0]);
    assert_eq!(0, cache.slots_in_use());
}
