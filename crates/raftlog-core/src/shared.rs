//! # shared
//!
//! why: a node mutates its log from peer RPC handlers and client submissions at the same time
//! relations: wraps RaftLog (log.rs, pipeline.rs, compaction.rs) behind parking_lot locks
//! what: SharedLog: single writer, concurrent readers, apply as a separate task gated against compaction

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::entry::{LogEntry, LogId, Proposal};
use crate::error::{LogError, Result};
use crate::log::{AppendOutcome, RaftLog};
use crate::pipeline::{Applied, StateMachine};
use crate::storage::{LogMetadata, StorageEngine};

/// Thread-safe handle to a [`RaftLog`]
///
/// ## Concurrency model
///
/// - **Mutations** hold the write lock for the whole call, so appends,
///   truncations, commit advances and compactions never interleave.
/// - **Queries** hold the read lock and see a consistent log.
/// - **Apply** holds the apply gate for the whole pass but no log lock
///   while the state machine runs. `compact` takes the gate first, so it
///   waits for an in-flight apply.
pub struct SharedLog<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    log: RwLock<RaftLog<S>>,
    apply_gate: Mutex<()>,
}

impl<S> Clone for SharedLog<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StorageEngine> SharedLog<S> {
    pub fn new(log: RaftLog<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                log: RwLock::new(log),
                apply_gate: Mutex::new(()),
            }),
        }
    }

    /// Read access for queries not mirrored here
    pub fn read(&self) -> RwLockReadGuard<'_, RaftLog<S>> {
        self.inner.log.read()
    }

    pub fn last(&self) -> LogId {
        self.inner.log.read().last()
    }

    pub fn matches(&self, prev_index: u64, prev_term: u64) -> bool {
        self.inner.log.read().matches(prev_index, prev_term)
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.inner.log.read().term_at(index)
    }

    pub fn entries(&self, from: u64, to: u64) -> Vec<LogEntry> {
        self.inner.log.read().entries(from, to)
    }

    pub fn metadata(&self) -> LogMetadata {
        self.inner.log.read().metadata()
    }

    pub fn append(&self, entry: LogEntry) -> Result<()> {
        self.inner.log.write().append(entry)
    }

    pub fn truncate_after(&self, index: u64) -> Result<()> {
        self.inner.log.write().truncate_after(index)
    }

    pub fn append_entries(
        &self,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<LogEntry>,
    ) -> Result<AppendOutcome> {
        self.inner
            .log
            .write()
            .append_entries(prev_index, prev_term, entries)
    }

    pub fn commit_local(&self, proposal: Proposal) -> Result<LogEntry> {
        self.inner.log.write().commit_local(proposal)
    }

    pub fn advance_commit_index(&self, candidate: u64) -> Result<u64> {
        self.inner.log.write().advance_commit_index(candidate)
    }

    /// Apply committed entries without blocking replication
    ///
    /// Entries committed while the pass runs are left for the next call.
    pub fn apply_committed<M: StateMachine>(
        &self,
        state_machine: &mut M,
    ) -> Result<Vec<Applied<M::Output>>> {
        let _gate = self.inner.apply_gate.lock();
        let pending = self.inner.log.read().pending_apply();

        let mut applied = Vec::with_capacity(pending.len());
        let mut failure = None;
        for entry in &pending {
            match state_machine.apply(entry) {
                Ok(output) => applied.push(Applied {
                    index: entry.index,
                    term: entry.term,
                    output,
                }),
                Err(e) => {
                    tracing::warn!(index = entry.index, error = %e, "state machine rejected entry");
                    failure = Some(LogError::Apply {
                        index: entry.index,
                        source: Box::new(e),
                    });
                    break;
                }
            }
        }

        if let Some(last) = applied.last() {
            self.inner.log.write().record_applied(last.index)?;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Compact once no apply pass is running
    pub fn compact(&self, upto_index: u64, term: u64) -> Result<()> {
        let _gate = self.inner.apply_gate.lock();
        self.inner.log.write().compact(upto_index, term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::thread;

    #[test]
    fn concurrent_submissions_stay_contiguous() {
        let log = SharedLog::new(RaftLog::new(InMemoryStorage::new()));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        log.commit_local(Proposal::command(1, format!("{}-{}", t, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = log.entries(1, u64::MAX);
        assert_eq!(entries.len(), 100);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.index, i as u64 + 1);
        }
        assert_eq!(log.last(), LogId::new(1, 100));
    }
}
