//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，例如磁盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 缓冲区缓存通过块设备驱动读写后备存储。

#![no_std]

/// 块设备驱动特质
///
/// 读写均为阻塞调用，且假定一定成功：驱动遇到无法恢复的错误时应直接panic，
/// 上层不存在“写了一半”的扇区。
pub trait BlockDevice: Send + Sync {
    /// 把`block_id`号扇区读入`buf`，`buf`长度为一个扇区
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 把`buf`写入`block_id`号扇区，`buf`长度为一个扇区
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
