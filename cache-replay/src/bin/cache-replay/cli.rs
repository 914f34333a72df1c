use std::path::PathBuf;

use buffer_cache::CacheConfig;
use clap::Parser;

#[derive(Parser)]
pub struct Cli {
    /// Disk image backing the cache, created if missing
    #[arg(long, short)]
    pub image: PathBuf,

    /// Access trace, read from stdin if omitted
    #[arg(long, short)]
    pub trace: Option<PathBuf>,

    /// Number of cache slots
    #[arg(long, short, default_value_t = CacheConfig::DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Writeback interval in seconds
    #[arg(long, default_value_t = CacheConfig::DEFAULT_WRITEBACK_INTERVAL.as_secs())]
    pub interval: u64,

    /// Read the next sector ahead on every cold miss
    #[arg(long)]
    pub readahead: bool,

    /// Image size in sectors
    #[arg(long, short, default_value_t = 2048)]
    pub sectors: usize,
}
