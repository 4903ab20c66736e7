//! # compaction
//!
//! why: bound the log's memory and disk use once a snapshot covers a prefix
//! relations: extends RaftLog from log.rs; moves the boundary sentinel used by last() and matches()
//! what: RaftLog::compact

use crate::error::{CompactionRejection, LogError, Result};
use crate::log::{fatal, RaftLog};
use crate::storage::{LogMetadata, StorageEngine};

impl<S: StorageEngine> RaftLog<S> {
    /// Discard every entry up to and including `upto_index`
    ///
    /// `(term, upto_index)` becomes the new boundary sentinel. Only applied
    /// entries can be discarded, and `term` must be the term of the entry
    /// being replaced by the sentinel.
    pub fn compact(&mut self, upto_index: u64, term: u64) -> Result<()> {
        let reject = |reason| LogError::Compaction { upto_index, reason };

        if upto_index < self.start_index {
            return Err(reject(CompactionRejection::AlreadyCompacted {
                start_index: self.start_index,
            }));
        }
        if upto_index > self.last_applied {
            return Err(reject(CompactionRejection::NotApplied {
                last_applied: self.last_applied,
            }));
        }
        // last_applied <= last index, so the entry (or the sentinel) exists
        if let Some(actual) = self.term_at(upto_index) {
            if actual != term {
                return Err(reject(CompactionRejection::TermMismatch {
                    expected: term,
                    actual,
                }));
            }
        }
        if upto_index == self.start_index {
            return Ok(());
        }

        // metadata first: after a crash between the two writes the restored
        // log starts at the new boundary and ignores the leftover prefix
        let meta = LogMetadata {
            start_index: upto_index,
            start_term: term,
            ..self.metadata()
        };
        self.persist_metadata(&meta)?;
        self.storage
            .discard_range(1, upto_index)
            .map_err(|e| fatal(e.into()))?;

        let discarded = (upto_index - self.start_index) as usize;
        self.entries.drain(..discarded);
        self.start_index = upto_index;
        self.start_term = term;

        tracing::info!(start_index = upto_index, start_term = term, discarded, "compacted log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogEntry, LogId};
    use crate::storage::InMemoryStorage;

    fn applied_log(terms: &[u64]) -> RaftLog<InMemoryStorage> {
        let mut log = RaftLog::new(InMemoryStorage::new());
        for (i, &term) in terms.iter().enumerate() {
            log.append(LogEntry::new(term, i as u64 + 1, vec![])).unwrap();
        }
        let last = log.last().index;
        log.advance_commit_index(last).unwrap();
        log.record_applied(last).unwrap();
        log
    }

    #[test]
    fn compact_moves_the_sentinel() {
        let mut log = applied_log(&[1, 1, 2]);
        log.compact(3, 2).unwrap();

        assert!(log.is_empty());
        assert_eq!(log.last(), LogId::new(2, 3));
        assert!(log.matches(3, 2));
        assert_eq!(log.first_index(), 4);
        assert!(log.storage().is_empty());
    }

    #[test]
    fn compact_with_wrong_term_is_rejected() {
        let mut log = applied_log(&[1, 1, 2]);
        let err = log.compact(2, 2).unwrap_err();
        assert!(matches!(
            err,
            LogError::Compaction {
                upto_index: 2,
                reason: CompactionRejection::TermMismatch { expected: 2, actual: 1 }
            }
        ));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn compacting_at_the_boundary_is_a_noop() {
        let mut log = applied_log(&[1, 1]);
        log.compact(1, 1).unwrap();
        log.compact(1, 1).unwrap();
        assert_eq!(log.start_index(), 1);
        assert_eq!(log.len(), 1);
    }
}
