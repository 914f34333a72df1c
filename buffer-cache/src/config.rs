use core::time::Duration;

use crate::Error;

/// 缓存的配置
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 槽池容量，即最多驻留的扇区数 N
    pub capacity: usize,
    /// 写回任务的唤醒周期
    pub writeback_interval: Duration,
    /// 冷缺失时是否预读下一个扇区
    pub readahead: bool,
}

impl CacheConfig {
    pub const DEFAULT_CAPACITY: usize = 32;

    pub const DEFAULT_WRITEBACK_INTERVAL: Duration = Duration::from_secs(30);

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.writeback_interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            writeback_interval: Self::DEFAULT_WRITEBACK_INTERVAL,
            readahead: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate() {
        assert_eq!(Ok(()), CacheConfig::default().validate());
        assert_eq!(
            Err(Error::ZeroCapacity),
            CacheConfig::with_capacity(0).validate()
        );

        let config = CacheConfig {
            writeback_interval: Duration::ZERO,
            ..CacheConfig::default()
        };
        assert_eq!(Err(Error::ZeroInterval), config.validate());
    }
}
