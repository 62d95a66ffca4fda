/// Errors raised by the readiness multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// `poll` was called with every output sink disabled.
    #[error("no readiness sink configured")]
    NoTarget,

    /// The endpoint is already tracked by this selector.
    #[error("descriptor {descriptor} is already tracked")]
    AlreadyTracked { descriptor: i32 },

    /// The descriptor cannot be represented in an `fd_set`.
    #[error("descriptor {descriptor} is outside the select range (limit {limit})")]
    DescriptorOutOfRange { descriptor: i32, limit: usize },

    /// The OS readiness call failed.
    #[error("select failed: {0}")]
    Poll(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SelectError>;
