use derive_more::Display;

/// 构造缓存时可恢复的错误。
///
/// 运行期的错误（槽耗尽、重复释放、关闭后继续使用）都意味着内部记账已经损坏，
/// 一律直接panic。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Error {
    #[display(fmt = "cache capacity must be positive")]
    ZeroCapacity,
    #[display(fmt = "writeback interval must be positive")]
    ZeroInterval,
}

impl core::error::Error for Error {}
