//! # Cosave Error Types
//!
//! All errors that can occur while encoding or decoding cosave records.

use thiserror::Error;

/// Errors raised by the cosave codec.
///
/// These are confined to the record being processed: the caller logs them and
/// moves on to the next record, it never aborts the whole save or load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CosaveError {
    /// The host declined to open a record for writing.
    #[error("the host refused to open record {type_id:#010x} v{version}")]
    OpenRecord {
        /// Record type that was requested.
        type_id: u32,
        /// Record version that was requested.
        version: u32,
    },

    /// The host reported a failure while flushing record data.
    #[error("failed to write to the open record's data")]
    WriteFailed,

    /// A refill of the read buffer did not land on the expected alignment.
    #[error("record payload is misaligned (remaining: {remaining})")]
    Misaligned {
        /// Bytes delivered by the offending refill.
        remaining: usize,
    },

    /// The record payload ended before the format said it would.
    #[error("record payload was prematurely terminated")]
    Truncated,

    /// An identity entry carried an index at or above the persisted counter.
    #[error("persisted index {index} is outside the allocated range ({ceiling})")]
    IndexOutOfRange {
        /// The offending entry's index.
        index: u32,
        /// The persisted allocation counter.
        ceiling: u32,
    },
}
