//! # error
//!
//! why: give the consensus driver structured results it can act on
//! relations: returned by every log.rs / pipeline.rs / compaction.rs operation, StorageError by engines
//! what: LogError (recoverable vs fatal), StorageError, CompactionRejection

use std::io;

use thiserror::Error;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors returned by the replicated log
///
/// The log never retries. Recoverable errors tell the driver what to resend;
/// fatal ones mean the node must stop and recover from storage.
#[derive(Debug, Error)]
pub enum LogError {
    // -------------------------------------------------------------------------
    // Recoverable
    // -------------------------------------------------------------------------
    #[error("index gap: expected index {expected}, got {got}")]
    IndexGap { expected: u64, got: u64 },

    #[error("consistency check failed at index {prev_index}: expected term {prev_term}, found {local_term:?}")]
    ConsistencyCheckFailed {
        prev_index: u64,
        prev_term: u64,
        local_term: Option<u64>,
    },

    #[error("cannot compact up to index {upto_index}: {reason}")]
    Compaction {
        upto_index: u64,
        reason: CompactionRejection,
    },

    #[error("state machine failed to apply index {index}: {source}")]
    Apply {
        index: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // -------------------------------------------------------------------------
    // Fatal
    // -------------------------------------------------------------------------
    #[error("term regression: last term is {last_term}, entry has term {term}")]
    StaleTerm { last_term: u64, term: u64 },

    #[error("refusing to truncate after index {index}: entries up to {commit_index} are committed")]
    CommittedTruncation { index: u64, commit_index: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LogError {
    /// Whether the node has to stop and restart from durable state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LogError::StaleTerm { .. } | LogError::CommittedTruncation { .. } | LogError::Storage(_)
        )
    }
}

/// Why a compaction request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompactionRejection {
    #[error("entries after last applied index {last_applied} have not reached the state machine")]
    NotApplied { last_applied: u64 },

    #[error("log is already compacted up to index {start_index}")]
    AlreadyCompacted { start_index: u64 },

    #[error("entry at that index has term {actual}, not {expected}")]
    TermMismatch { expected: u64, actual: u64 },
}

/// Errors reported by a storage engine
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted log state: {reason}")]
    Corrupted { reason: String },
}

impl StorageError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        StorageError::Corrupted {
            reason: reason.into(),
        }
    }
}
