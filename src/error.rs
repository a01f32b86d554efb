//! Error types for hash index operations
//!
//! Control-flow outcomes (found / not found) are expressed through the
//! structured results of the lookup engine; only hard failures surface here.

use thiserror::Error;

/// Hard failures of the hash index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The DRAM budget could not satisfy a bucket-growth request.
    ///
    /// Fatal for the in-flight write; the caller decides whether to retry
    /// after freeing space or abort. The index does not retry allocation.
    #[error("dram budget exhausted while growing bucket {bucket}")]
    MemoryOverflow {
        /// Bucket whose chain growth failed
        bucket: u64,
    },

    /// The table configuration failed validation.
    #[error("invalid hash table config: {0}")]
    InvalidConfig(&'static str),
}
