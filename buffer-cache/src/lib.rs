#![no_std]

extern crate alloc;

/* 缓冲区缓存的整体架构，自上而下 */

// 缓存层：块句柄的获取、读写与释放
mod cache;
pub use cache::{BlockHandle, BufferCache, CacheStats};

// 后台任务层：定期写回脏块、预读
mod daemon;

// 目录层：CAR 的 T1/T2/B1/B2 四张表与自适应目标 p
mod car;
pub use car::DirectorySnapshot;

// 缓存项层：扇区元数据与访问协议
mod entry;
pub use entry::Mode;

// 槽池层：定长扇区缓冲区与占用位图
mod pool;

mod config;
mod error;
mod sched;

pub use self::{config::CacheConfig, error::Error, sched::Scheduler};

use derive_more::{Display, From, Into};

/// 扇区大小，与后备块设备约定一致
pub const SECTOR_SIZE: usize = 512;

/// 后备存储上的扇区编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[repr(transparent)]
pub struct SectorId(usize);

impl SectorId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }
}

impl core::ops::Add<usize> for SectorId {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}
