mod cli;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::Duration;

use buffer_cache::{BufferCache, CacheConfig, SECTOR_SIZE};
use cache_replay::{BlockFile, ThreadScheduler, parse_trace, replay};
use clap::Parser;
use cli::Cli;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("image={:?}\ntrace={:?}", cli.image, cli.trace);

    let ops = match &cli.trace {
        Some(path) => parse_trace(BufReader::new(File::open(path)?))?,
        None => parse_trace(io::stdin().lock())?,
    };

    // 预读会碰到下一个扇区
    let limit = cli.sectors.saturating_sub(usize::from(cli.readahead));
    if let Some(sector) = ops.iter().filter_map(|op| op.sector()).max() {
        if usize::from(sector) >= limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector {sector} is out of the {}-sector image", cli.sectors),
            ));
        }
    }

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&cli.image)?;
    let image_size = (cli.sectors * SECTOR_SIZE) as u64;
    if fd.metadata()?.len() < image_size {
        fd.set_len(image_size)?;
    }

    let config = CacheConfig {
        capacity: cli.capacity,
        writeback_interval: Duration::from_secs(cli.interval),
        readahead: cli.readahead,
    };
    let cache = BufferCache::initialize(
        config,
        Arc::new(BlockFile::new(fd)),
        Arc::new(ThreadScheduler),
    )
    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    replay(&cache, &ops);
    log::info!("replayed {} operations", ops.len());

    let dir = cache.directory();
    cache.shutdown();

    let stats = cache.stats();
    println!(
        "hits={} misses={} ghost_hits={} evictions={}",
        stats.hits, stats.misses, stats.ghost_hits, stats.evictions
    );
    println!("disk reads={} writes={}", stats.reads, stats.writes);
    println!(
        "p={} |T1|={} |T2|={} |B1|={} |B2|={}",
        dir.p,
        dir.t1.len(),
        dir.t2.len(),
        dir.b1.len(),
        dir.b2.len()
    );

    Ok(())
}
