//! # config
//!
//! why: let a node choose where its log lives without code changes
//! relations: builds FileStorage (lib.rs) or raftlog_core::InMemoryStorage behind one trait object
//! what: StorageConfig, Backend, SyncPolicy, builder, from_json, open_storage

use std::path::PathBuf;

use raftlog_core::{InMemoryStorage, StorageEngine, StorageError};
use serde::{Deserialize, Serialize};

use crate::FileStorage;

/// Storage configuration for one node's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // -------------------------------------------------------------------------
    // Backend
    // -------------------------------------------------------------------------
    /// Where entries and metadata live
    pub backend: Backend,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// How often the file backend fsyncs appended entries
    pub sync: SyncPolicy,
}

/// Storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Process memory only; everything is lost on restart
    Memory,

    /// Files under `dir`:
    ///   {dir}/
    ///     ├── meta.json   (commit index, applied index, compaction boundary)
    ///     └── log.jsonl   (checksummed entries)
    File { dir: PathBuf },
}

/// Fsync strategy for appended entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncPolicy {
    /// fsync after every entry; an acknowledged append is durable
    EveryWrite,

    /// fsync after N entries; a crash can lose up to N-1 acknowledged entries
    EveryNEntries { count: usize },
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Memory
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::EveryWrite
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sync: SyncPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Create a new config builder
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder::default()
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Builder for StorageConfig
#[derive(Default)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    /// Keep the log in memory
    pub fn memory(mut self) -> Self {
        self.config.backend = Backend::Memory;
        self
    }

    /// Persist the log under `dir`
    pub fn file(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.backend = Backend::File { dir: dir.into() };
        self
    }

    /// Set the fsync strategy
    pub fn sync_policy(mut self, sync: SyncPolicy) -> Self {
        self.config.sync = sync;
        self
    }

    pub fn build(self) -> StorageConfig {
        self.config
    }
}

/// Open the engine the config asks for
pub fn open_storage(config: &StorageConfig) -> Result<Box<dyn StorageEngine + Send>, StorageError> {
    match &config.backend {
        Backend::Memory => {
            tracing::info!("using in-memory log storage");
            Ok(Box::new(InMemoryStorage::new()))
        }
        Backend::File { dir } => {
            tracing::info!(dir = %dir.display(), sync = ?config.sync, "using file log storage");
            Ok(Box::new(FileStorage::with_sync(dir.clone(), config.sync)?))
        }
    }
}
