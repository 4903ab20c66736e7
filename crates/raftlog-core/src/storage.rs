//! # storage
//!
//! why: the log must not care which durable backend sits underneath it
//! relations: consumed by log.rs; FileStorage in raftlog-storage implements it too
//! what: StorageEngine trait, LogMetadata, InMemoryStorage

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entry::LogEntry;
use crate::error::StorageError;

/// The scalars persisted next to the entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub commit_index: u64,
    pub last_applied: u64,
    pub start_index: u64,
    pub start_term: u64,
}

/// trait for durable storage of the replicated log
///
/// every call blocks until the engine has acknowledged the write; the log
/// only changes its in-memory view after a call returns `Ok`.
/// ranges are inclusive on both ends.
pub trait StorageEngine {
    /// durably write one entry
    fn persist_entry(&mut self, entry: &LogEntry) -> Result<(), StorageError>;

    /// entries with `from <= index <= to`, in index order
    fn read_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, StorageError>;

    /// durably write commit index, applied index and compaction boundary
    fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<(), StorageError>;

    /// the last persisted metadata, or zeros for a fresh engine
    fn load_metadata(&self) -> Result<LogMetadata, StorageError>;

    /// remove entries with `from <= index <= to`
    fn discard_range(&mut self, from: u64, to: u64) -> Result<(), StorageError>;
}

impl<S: StorageEngine + ?Sized> StorageEngine for Box<S> {
    fn persist_entry(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        (**self).persist_entry(entry)
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, StorageError> {
        (**self).read_range(from, to)
    }

    fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<(), StorageError> {
        (**self).persist_metadata(meta)
    }

    fn load_metadata(&self) -> Result<LogMetadata, StorageError> {
        (**self).load_metadata()
    }

    fn discard_range(&mut self, from: u64, to: u64) -> Result<(), StorageError> {
        (**self).discard_range(from, to)
    }
}

impl<S: StorageEngine + ?Sized> StorageEngine for &mut S {
    fn persist_entry(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        (**self).persist_entry(entry)
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, StorageError> {
        (**self).read_range(from, to)
    }

    fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<(), StorageError> {
        (**self).persist_metadata(meta)
    }

    fn load_metadata(&self) -> Result<LogMetadata, StorageError> {
        (**self).load_metadata()
    }

    fn discard_range(&mut self, from: u64, to: u64) -> Result<(), StorageError> {
        (**self).discard_range(from, to)
    }
}

// -- in-memory storage implementation --

/// in-memory storage engine
///
/// stores all state in memory, no persistence across process restarts.
/// cloning gives a snapshot of the "disk", which tests use to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    entries: BTreeMap<u64, LogEntry>,
    meta: LogMetadata,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageEngine for InMemoryStorage {
    fn persist_entry(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        self.entries.insert(entry.index, entry.clone());
        Ok(())
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.entries.range(from..=to).map(|(_, e)| e.clone()).collect())
    }

    fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<(), StorageError> {
        self.meta = *meta;
        Ok(())
    }

    fn load_metadata(&self) -> Result<LogMetadata, StorageError> {
        Ok(self.meta)
    }

    fn discard_range(&mut self, from: u64, to: u64) -> Result<(), StorageError> {
        if from > to {
            return Ok(());
        }
        self.entries.retain(|&index, _| index < from || index > to);
        Ok(())
    }
}
