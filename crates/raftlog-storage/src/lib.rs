//! # raftlog-storage
//!
//! why: provide durable persistence for the replicated log using standard rust fs apis
//! relations: implements raftlog_core::StorageEngine; config.rs picks a backend at startup
//! what: FileStorage (checksummed append-only log + atomic metadata file), backend selection

mod config;

pub use config::{open_storage, Backend, StorageConfig, StorageConfigBuilder, SyncPolicy};
pub use raftlog_core::{InMemoryStorage, StorageEngine};

use raftlog_core::{LogEntry, LogMetadata, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

// -- file storage implementation --

/// file-based storage engine using std::fs
///
/// stores the log in a directory with:
/// - meta.json: commit index, applied index and compaction boundary
/// - log.jsonl: one record per entry, `<crc32 hex> <entry json>\n`
///
/// entries are appended in place; discarding a range rewrites the file.
/// a torn record at the end of log.jsonl (crash mid-append) is dropped on open.
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
    /// append handle on log.jsonl
    log: File,
    sync: SyncPolicy,
    /// records written since the last fsync
    unsynced: usize,
}

impl FileStorage {
    const META_FILE: &'static str = "meta.json";
    const LOG_FILE: &'static str = "log.jsonl";

    /// open or create a filestorage at the given directory, syncing every write
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_sync(dir, SyncPolicy::EveryWrite)
    }

    /// open or create a filestorage with an explicit sync policy
    ///
    /// creates the directory if it doesn't exist and repairs a torn tail record
    pub fn with_sync(dir: impl Into<PathBuf>, sync: SyncPolicy) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let log_path = dir.join(Self::LOG_FILE);
        if log_path.exists() {
            recover(&log_path)?;
        }
        let log = open_append(&log_path)?;

        Ok(Self {
            dir,
            log,
            sync,
            unsynced: 0,
        })
    }

    /// directory holding the state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// force appended records to disk
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.log.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// remove all persisted state (for testing)
    pub fn clear(&mut self) -> Result<(), StorageError> {
        let _ = fs::remove_file(self.meta_path());
        let _ = fs::remove_file(self.log_path());
        self.log = open_append(&self.log_path())?;
        self.unsynced = 0;
        Ok(())
    }

    /// get the path to the metadata file
    fn meta_path(&self) -> PathBuf {
        self.dir.join(Self::META_FILE)
    }

    /// get the path to the log file
    fn log_path(&self) -> PathBuf {
        self.dir.join(Self::LOG_FILE)
    }

    /// every valid entry in log.jsonl, in file order
    fn load_entries(&self) -> Result<Vec<LogEntry>, StorageError> {
        let contents = read_file(&self.log_path())?;
        let scan = scan(&contents)?;
        Ok(scan.entries)
    }

    /// atomic write: write to temp file, fsync, then rename over `target`
    fn write_atomic(&self, target: &Path, tmp_name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.dir.join(tmp_name);
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, target)?;
        Ok(())
    }
}

impl StorageEngine for FileStorage {
    fn persist_entry(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        let record = encode_record(entry)?;
        self.log.write_all(&record)?;

        self.unsynced += 1;
        let due = match self.sync {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, StorageError> {
        let mut entries = self.load_entries()?;
        entries.retain(|e| e.index >= from && e.index <= to);
        entries.sort_by_key(|e| e.index);
        Ok(entries)
    }

    fn persist_metadata(&mut self, meta: &LogMetadata) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(meta).map_err(serialization)?;
        self.write_atomic(&self.meta_path(), "meta.tmp", json.as_bytes())
    }

    fn load_metadata(&self) -> Result<LogMetadata, StorageError> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(LogMetadata::default()); // default for new nodes
        }

        let contents = read_file(&path)?;
        serde_json::from_slice(&contents).map_err(serialization)
    }

    fn discard_range(&mut self, from: u64, to: u64) -> Result<(), StorageError> {
        if from > to {
            return Ok(());
        }

        let entries = self.load_entries()?;
        let (keep, discard): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.index < from || e.index > to);
        if discard.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for entry in &keep {
            buf.extend_from_slice(&encode_record(entry)?);
        }

        self.write_atomic(&self.log_path(), "log.tmp", &buf)?;
        self.log = open_append(&self.log_path())?;
        self.unsynced = 0;

        tracing::debug!(from, to, discarded = discard.len(), "rewrote log file without discarded range");
        Ok(())
    }
}

// -- record format --

/// outcome of scanning log.jsonl
struct Scan {
    entries: Vec<LogEntry>,
    /// length of the prefix made of complete, valid records
    valid_len: usize,
}

fn encode_record(entry: &LogEntry) -> Result<Vec<u8>, StorageError> {
    let json = serde_json::to_vec(entry).map_err(serialization)?;
    let crc = crc32fast::hash(&json);

    let mut record = Vec::with_capacity(json.len() + 10);
    record.extend_from_slice(format!("{:08x} ", crc).as_bytes());
    record.extend_from_slice(&json);
    record.push(b'\n');
    Ok(record)
}

/// decode one line (without its newline); None if it fails the checksum or does not parse
fn decode_record(line: &[u8]) -> Option<LogEntry> {
    let split = line.iter().position(|&b| b == b' ')?;
    let (crc_hex, json) = (&line[..split], &line[split + 1..]);

    let crc = u32::from_str_radix(std::str::from_utf8(crc_hex).ok()?, 16).ok()?;
    if crc32fast::hash(json) != crc {
        return None;
    }
    serde_json::from_slice(json).ok()
}

/// parse every record; only the final record may be damaged
fn scan(contents: &[u8]) -> Result<Scan, StorageError> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < contents.len() {
        let Some(newline) = contents[pos..].iter().position(|&b| b == b'\n') else {
            break; // partial record without its newline
        };
        let end = pos + newline;

        match decode_record(&contents[pos..end]) {
            Some(entry) => entries.push(entry),
            None if end + 1 == contents.len() => break,
            None => {
                return Err(StorageError::corrupted(format!(
                    "damaged record at byte {} is followed by more records",
                    pos
                )))
            }
        }
        pos = end + 1;
    }

    Ok(Scan {
        entries,
        valid_len: pos,
    })
}

/// drop a torn tail record left behind by a crash mid-append
fn recover(path: &Path) -> Result<(), StorageError> {
    let contents = read_file(path)?;
    let scan = scan(&contents)?;

    if scan.valid_len < contents.len() {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = contents.len() - scan.valid_len,
            recovered = scan.entries.len(),
            "truncating torn record at end of log file"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(scan.valid_len as u64)?;
        file.sync_all()?;
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn open_append(path: &Path) -> Result<File, StorageError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn serialization(e: serde_json::Error) -> StorageError {
    StorageError::Serialization(e.to_string())
}
