//! # log
//!
//! why: keep the ordered, contiguous record of entries and reconcile it with a leader's stream
//! relations: writes through storage.rs before mutating memory; pipeline.rs and compaction.rs extend it
//! what: RaftLog, AppendOutcome, restore from storage, append / truncate / appendEntries, queries

use std::collections::VecDeque;

use crate::entry::{LogEntry, LogId};
use crate::error::{LogError, Result, StorageError};
use crate::storage::{LogMetadata, StorageEngine};

/// Result of accepting a leader's replication batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Index of the last stored entry after the batch
    pub last_index: u64,
    /// Highest index known to agree with the leader (`prev_index + batch length`)
    pub match_index: u64,
}

/// The replicated log of one node
///
/// Holds the stored entries in memory and writes every change through the
/// storage engine first. Mutators take `&mut self`; wrap the log in a
/// [`SharedLog`](crate::SharedLog) to share it between threads.
#[derive(Debug)]
pub struct RaftLog<S> {
    pub(crate) storage: S,
    /// entries `start_index + 1 ..= last().index`, in order
    pub(crate) entries: VecDeque<LogEntry>,
    pub(crate) commit_index: u64,
    pub(crate) last_applied: u64,
    pub(crate) start_index: u64,
    pub(crate) start_term: u64,
}

impl<S: StorageEngine> RaftLog<S> {
    /// Create an empty log on top of a fresh engine
    ///
    /// Nothing is read from `storage`; use [`RaftLog::open`] after a restart.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            entries: VecDeque::new(),
            commit_index: 0,
            last_applied: 0,
            start_index: 0,
            start_term: 0,
        }
    }

    /// Restore the log from whatever the engine has persisted
    ///
    /// Fails with [`StorageError::Corrupted`] if the persisted entries and
    /// metadata do not form a valid log.
    pub fn open(storage: S) -> Result<Self> {
        let meta = storage.load_metadata()?;
        let entries = storage.read_range(meta.start_index.saturating_add(1), u64::MAX)?;
        validate(&meta, &entries)?;

        let log = Self {
            storage,
            entries: entries.into(),
            commit_index: meta.commit_index,
            last_applied: meta.last_applied,
            start_index: meta.start_index,
            start_term: meta.start_term,
        };

        tracing::info!(
            start = %LogId::new(log.start_term, log.start_index),
            last = %log.last(),
            commit_index = log.commit_index,
            last_applied = log.last_applied,
            "restored replicated log"
        );

        Ok(log)
    }

    // -- queries --

    /// The last stored entry's id, or the boundary sentinel if nothing is stored
    pub fn last(&self) -> LogId {
        self.entries
            .back()
            .map(LogEntry::log_id)
            .unwrap_or(LogId::new(self.start_term, self.start_index))
    }

    /// The last stored entry itself, if any
    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// The stored entry at `index`
    ///
    /// `None` for compacted indices, the sentinel itself, and indices past the tail.
    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        let offset = index.checked_sub(self.start_index)?.checked_sub(1)?;
        self.entries.get(usize::try_from(offset).ok()?)
    }

    /// Clones of the stored entries with `from <= index <= to`
    ///
    /// The range is clamped to what is stored; a leader uses this to build batches.
    pub fn entries(&self, from: u64, to: u64) -> Vec<LogEntry> {
        let from = from.max(self.first_index());
        let to = to.min(self.last().index);
        (from..=to).filter_map(|index| self.entry(index).cloned()).collect()
    }

    /// Term at `index`, including the boundary sentinel
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.start_index {
            return Some(self.start_term);
        }
        self.entry(index).map(|e| e.term)
    }

    /// Log Matching check for a replication batch
    ///
    /// True iff the entry at `prev_index` (or the sentinel when
    /// `prev_index == start_index`) has term `prev_term`.
    pub fn matches(&self, prev_index: u64, prev_term: u64) -> bool {
        self.term_at(prev_index) == Some(prev_term)
    }

    /// Index the first stored entry has, or would have
    pub fn first_index(&self) -> u64 {
        self.start_index + 1
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    pub fn start_term(&self) -> u64 {
        self.start_term
    }

    /// The scalars as they are (or are about to be) persisted
    pub fn metadata(&self) -> LogMetadata {
        LogMetadata {
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            start_index: self.start_index,
            start_term: self.start_term,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // -- mutation --

    /// Append one entry at the tail
    ///
    /// The entry is durably written before it becomes visible.
    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        let last = self.last();
        let expected = last.index + 1;
        if entry.index != expected {
            return Err(LogError::IndexGap {
                expected,
                got: entry.index,
            });
        }
        if entry.term < last.term {
            return Err(fatal(LogError::StaleTerm {
                last_term: last.term,
                term: entry.term,
            }));
        }

        self.storage
            .persist_entry(&entry)
            .map_err(|e| fatal(e.into()))?;

        tracing::debug!(log_id = %entry.log_id(), kind = ?entry.entry_type, "appended entry");
        self.entries.push_back(entry);
        Ok(())
    }

    /// Discard every entry after `index`
    ///
    /// Truncating below the commit index means the caller is trying to roll
    /// back committed history; that is reported as a fatal error and nothing
    /// is touched.
    pub fn truncate_after(&mut self, index: u64) -> Result<()> {
        if index < self.commit_index {
            return Err(fatal(LogError::CommittedTruncation {
                index,
                commit_index: self.commit_index,
            }));
        }

        let last = self.last().index;
        if index >= last {
            return Ok(());
        }

        self.storage
            .discard_range(index + 1, last)
            .map_err(|e| fatal(e.into()))?;

        // commit_index >= start_index, so index is never below the boundary here
        let keep = (index - self.start_index) as usize;
        self.entries.truncate(keep);

        tracing::debug!(after = index, discarded = last - index, "truncated log suffix");
        Ok(())
    }

    /// Accept a replication batch from the leader
    ///
    /// `entries` must be contiguous starting at `prev_index + 1`. Entries the
    /// log already holds with the same term are kept; the stored suffix is
    /// discarded from the first entry whose term differs, and the rest of the
    /// batch is appended.
    ///
    /// When `prev_index` lies below the compaction boundary the compacted
    /// prefix is committed and agrees with any correct leader, so entries up
    /// to the boundary are skipped instead of checked.
    ///
    /// The whole batch is validated before anything is truncated or appended,
    /// so a rejected batch leaves the log as it was.
    pub fn append_entries(
        &mut self,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<LogEntry>,
    ) -> Result<AppendOutcome> {
        let mut match_index = prev_index;
        let mut last_term = prev_term;
        for entry in &entries {
            // no index follows u64::MAX, so nothing here can ever match
            let Some(expected) = match_index.checked_add(1) else {
                return Err(self.reject(prev_index, prev_term));
            };
            if entry.index != expected {
                return Err(LogError::IndexGap {
                    expected,
                    got: entry.index,
                });
            }
            if entry.term < last_term {
                return Err(fatal(LogError::StaleTerm {
                    last_term,
                    term: entry.term,
                }));
            }
            match_index = expected;
            last_term = entry.term;
        }

        let boundary = self.start_index;
        if prev_index >= boundary {
            if !self.matches(prev_index, prev_term) {
                return Err(self.reject(prev_index, prev_term));
            }
        } else if let Some(first) = entries.iter().find(|e| e.index > boundary) {
            if first.term < self.start_term {
                return Err(fatal(LogError::StaleTerm {
                    last_term: self.start_term,
                    term: first.term,
                }));
            }
        }

        let mut pending = entries
            .into_iter()
            .skip_while(|e| e.index <= boundary)
            .peekable();

        // skip what we already have, stop at the first conflict
        while let Some(&LogEntry { index, term, .. }) = pending.peek() {
            match self.term_at(index) {
                Some(local) if local == term => {
                    pending.next();
                }
                Some(_) => {
                    self.truncate_after(index - 1)?;
                    break;
                }
                None => break,
            }
        }

        for entry in pending {
            self.append(entry)?;
        }

        Ok(AppendOutcome {
            last_index: self.last().index,
            match_index,
        })
    }

    fn reject(&self, prev_index: u64, prev_term: u64) -> LogError {
        let local_term = self.term_at(prev_index);
        tracing::warn!(prev_index, prev_term, ?local_term, "rejected replication batch");
        LogError::ConsistencyCheckFailed {
            prev_index,
            prev_term,
            local_term,
        }
    }

    /// Write the current scalars through the engine
    pub(crate) fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<()> {
        self.storage
            .persist_metadata(meta)
            .map_err(|e| fatal(e.into()))
    }
}

/// Log a fatal error once, where it is detected, and hand it back
pub(crate) fn fatal(err: LogError) -> LogError {
    tracing::error!(error = %err, "fatal replicated log error");
    err
}

/// Check persisted state against the log invariants before trusting it
fn validate(meta: &LogMetadata, entries: &[LogEntry]) -> std::result::Result<(), StorageError> {
    let mut prev = LogId::new(meta.start_term, meta.start_index);
    for entry in entries {
        if entry.index != prev.index + 1 {
            return Err(StorageError::corrupted(format!(
                "entry {} follows {}",
                entry.log_id(),
                prev
            )));
        }
        if entry.term < prev.term {
            return Err(StorageError::corrupted(format!(
                "term regresses from {} to {}",
                prev,
                entry.log_id()
            )));
        }
        prev = entry.log_id();
    }

    if !(meta.start_index <= meta.last_applied
        && meta.last_applied <= meta.commit_index
        && meta.commit_index <= prev.index)
    {
        return Err(StorageError::corrupted(format!(
            "start {} / applied {} / commit {} / last {} out of order",
            meta.start_index, meta.last_applied, meta.commit_index, prev.index
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn log_with_terms(terms: &[u64]) -> RaftLog<InMemoryStorage> {
        let mut log = RaftLog::new(InMemoryStorage::new());
        for (i, &term) in terms.iter().enumerate() {
            log.append(LogEntry::new(term, i as u64 + 1, vec![i as u8])).unwrap();
        }
        log
    }

    #[test]
    fn empty_log_returns_zero_sentinel() {
        let log = RaftLog::new(InMemoryStorage::new());
        assert_eq!(log.last(), LogId::ZERO);
        assert!(log.matches(0, 0));
        assert!(!log.matches(0, 1));
        assert_eq!(log.first_index(), 1);
    }

    #[test]
    fn append_persists_before_returning() {
        let log = log_with_terms(&[1, 1]);
        assert_eq!(log.storage().len(), 2);
        assert_eq!(log.last(), LogId::new(1, 2));
    }

    #[test]
    fn append_rejects_gap() {
        let mut log = log_with_terms(&[1]);
        let err = log.append(LogEntry::new(1, 3, vec![])).unwrap_err();
        assert!(matches!(err, LogError::IndexGap { expected: 2, got: 3 }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn append_rejects_term_regression() {
        let mut log = log_with_terms(&[2]);
        let err = log.append(LogEntry::new(1, 2, vec![])).unwrap_err();
        assert!(matches!(err, LogError::StaleTerm { last_term: 2, term: 1 }));
        assert!(err.is_fatal());
        assert_eq!(log.storage().len(), 1);
    }

    #[test]
    fn entries_are_clamped_to_stored_range() {
        let log = log_with_terms(&[1, 1, 2]);
        let batch = log.entries(0, 10);
        assert_eq!(batch.len(), 3);
        assert_eq!(log.entries(2, 2)[0].index, 2);
        assert!(log.entries(3, 2).is_empty());
    }

    #[test]
    fn truncate_after_tail_is_noop() {
        let mut log = log_with_terms(&[1, 1]);
        log.truncate_after(2).unwrap();
        log.truncate_after(7).unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn open_rejects_non_contiguous_storage() {
        let mut storage = InMemoryStorage::new();
        storage.persist_entry(&LogEntry::new(1, 1, vec![])).unwrap();
        storage.persist_entry(&LogEntry::new(1, 3, vec![])).unwrap();

        let err = RaftLog::open(storage).unwrap_err();
        assert!(matches!(err, LogError::Storage(StorageError::Corrupted { .. })));
    }

    #[test]
    fn open_rejects_commit_beyond_last_entry() {
        let mut storage = InMemoryStorage::new();
        storage.persist_entry(&LogEntry::new(1, 1, vec![])).unwrap();
        storage
            .persist_metadata(&LogMetadata {
                commit_index: 4,
                ..LogMetadata::default()
            })
            .unwrap();

        assert!(RaftLog::open(storage).is_err());
    }
}
