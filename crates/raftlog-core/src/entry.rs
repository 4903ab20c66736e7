//! # entry
//!
//! why: define the immutable record the log replicates
//! relations: built by log.rs on append, persisted by storage engines, consumed by state machines
//! what: EntryType, LogEntry, LogId, Proposal (an entry before it has an index)

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a log entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// An opaque command for the state machine
    Command,
    /// A cluster configuration record
    Configuration,
    /// A no-op, typically appended by a new leader to commit its term
    NoOp,
}

impl Default for EntryType {
    fn default() -> Self {
        Self::Command
    }
}

/// The `(term, index)` pair identifying a log position
///
/// Also used for the boundary sentinel left behind by compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    /// The implicit "entry zero" of a log that was never compacted
    pub const ZERO: LogId = LogId { term: 0, index: 0 };

    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Command, configuration or no-op
    #[serde(rename = "type", default)]
    pub entry_type: EntryType,
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The payload handed to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new command entry
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self::with_type(EntryType::Command, term, index, command)
    }

    /// Create an entry of any kind, e.g. one received from a leader
    pub fn with_type(entry_type: EntryType, term: u64, index: u64, command: Vec<u8>) -> Self {
        Self {
            entry_type,
            term,
            index,
            command,
        }
    }

    pub fn log_id(&self) -> LogId {
        LogId::new(self.term, self.index)
    }
}

/// An entry that has not been placed in the log yet
///
/// Proposals never carry an index: the log assigns it at append time, under
/// its write lock, so concurrent submissions stay contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(rename = "type", default)]
    pub entry_type: EntryType,
    pub term: u64,
    pub command: Vec<u8>,
}

impl Proposal {
    pub fn new(term: u64, entry_type: EntryType, command: Vec<u8>) -> Self {
        Self {
            entry_type,
            term,
            command,
        }
    }

    /// A state machine command proposed in `term`
    pub fn command(term: u64, command: impl Into<Vec<u8>>) -> Self {
        Self::new(term, EntryType::Command, command.into())
    }

    /// An empty entry, used by a fresh leader to commit entries of its term
    pub fn noop(term: u64) -> Self {
        Self::new(term, EntryType::NoOp, Vec::new())
    }

    /// Place the proposal at `index`
    pub fn into_entry(self, index: u64) -> LogEntry {
        LogEntry::with_type(self.entry_type, self.term, index, self.command)
    }
}
