//! # raftlog-core
//!
//! why: the replicated log is the part of a raft node that must never lose or reorder committed entries
//! relations: raftlog-storage supplies the durable engine; a consensus driver (out of scope) calls in
//! what: entry model, storage engine trait, log core, commit/apply pipeline, compaction, shared handle

pub mod compaction;
pub mod entry;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod shared;
pub mod storage;

pub use entry::{EntryType, LogEntry, LogId, Proposal};
pub use error::{CompactionRejection, LogError, Result, StorageError};
pub use log::{AppendOutcome, RaftLog};
pub use pipeline::{Applied, StateMachine};
pub use shared::SharedLog;
pub use storage::{InMemoryStorage, LogMetadata, StorageEngine};
