//! # pipeline
//!
//! why: separate "appended locally" from "committed" and hand committed commands to the state machine in order
//! relations: extends RaftLog from log.rs; SharedLog in shared.rs splits apply into lock-free steps
//! what: StateMachine trait, Applied, commit_local, advance_commit_index, apply_committed

use crate::entry::{LogEntry, Proposal};
use crate::error::{LogError, Result, StorageError};
use crate::log::{fatal, RaftLog};
use crate::storage::{LogMetadata, StorageEngine};

/// The application the committed commands are fed to
///
/// Called exactly once per committed index within a run, strictly in index
/// order. Deduplication across restarts is up to the implementation.
pub trait StateMachine {
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    fn apply(&mut self, entry: &LogEntry) -> std::result::Result<Self::Output, Self::Error>;
}

/// One entry the state machine has consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<O> {
    pub index: u64,
    pub term: u64,
    pub output: O,
}

impl<S: StorageEngine> RaftLog<S> {
    /// Append a locally originated entry at the next index
    ///
    /// This is a local, unreplicated append: the entry is durable on this
    /// node only and the commit index is left alone.
    pub fn commit_local(&mut self, proposal: Proposal) -> Result<LogEntry> {
        let entry = proposal.into_entry(self.last().index + 1);
        self.append(entry.clone())?;
        Ok(entry)
    }

    /// Raise the commit index towards `candidate`
    ///
    /// Never lowers it and never moves it past the last stored entry. The new
    /// value is persisted before it becomes visible. Returns the commit index
    /// after the call.
    pub fn advance_commit_index(&mut self, candidate: u64) -> Result<u64> {
        let target = candidate.min(self.last().index);
        if target <= self.commit_index {
            return Ok(self.commit_index);
        }

        let meta = LogMetadata {
            commit_index: target,
            ..self.metadata()
        };
        self.persist_metadata(&meta)?;

        tracing::debug!(from = self.commit_index, to = target, "advanced commit index");
        self.commit_index = target;
        Ok(target)
    }

    /// Deliver every committed but unapplied entry to `state_machine`
    ///
    /// Stops at the first entry the state machine rejects; everything before
    /// it stays applied and `last_applied` is persisted either way.
    pub fn apply_committed<M: StateMachine>(
        &mut self,
        state_machine: &mut M,
    ) -> Result<Vec<Applied<M::Output>>> {
        let mut applied = Vec::new();
        let mut failure = None;

        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let entry = self.entry(index).ok_or_else(|| {
                fatal(StorageError::corrupted(format!("committed entry {} is not stored", index)).into())
            })?;
            let term = entry.term;

            match state_machine.apply(entry) {
                Ok(output) => {
                    applied.push(Applied {
                        index,
                        term,
                        output,
                    });
                    self.last_applied = index;
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "state machine rejected entry");
                    failure = Some(LogError::Apply {
                        index,
                        source: Box::new(e),
                    });
                    break;
                }
            }
        }

        if !applied.is_empty() {
            let meta = self.metadata();
            self.persist_metadata(&meta)?;
            tracing::debug!(count = applied.len(), last_applied = self.last_applied, "applied committed entries");
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Clones of the entries in `(last_applied, commit_index]`
    pub(crate) fn pending_apply(&self) -> Vec<LogEntry> {
        self.entries(self.last_applied + 1, self.commit_index)
    }

    /// Record that everything up to `index` reached the state machine
    pub(crate) fn record_applied(&mut self, index: u64) -> Result<()> {
        if index <= self.last_applied {
            return Ok(());
        }
        if index > self.commit_index {
            return Err(fatal(
                StorageError::corrupted(format!(
                    "applied index {} beyond commit index {}",
                    index, self.commit_index
                ))
                .into(),
            ));
        }

        let meta = LogMetadata {
            last_applied: index,
            ..self.metadata()
        };
        self.persist_metadata(&meta)?;
        self.last_applied = index;
        Ok(())
    }
}
