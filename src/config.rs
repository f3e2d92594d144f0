//! Configuration for the token scan store
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of entity a store indexes.
///
/// The two store flavours share one engine; only the file name and the
/// human readable name differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Nodes, indexed by label id
    Node,

    /// Relationships, indexed by relationship type id
    Relationship,
}

impl EntityType {
    /// File name of the store inside the database directory
    pub fn file_name(self) -> &'static str {
        match self {
            EntityType::Node => "labelscanstore.db",
            EntityType::Relationship => "relationshiptypescanstore.db",
        }
    }

    /// Name used in log lines and error messages
    pub fn store_name(self) -> &'static str {
        match self {
            EntityType::Node => "Label scan store",
            EntityType::Relationship => "Relationship type scan store",
        }
    }
}

/// Main configuration for a token scan store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Database directory holding the store file and its write log
    /// Internal structure:
    ///   {store_dir}/
    ///     ├── labelscanstore.db                  (tree file)
    ///     ├── labelscanstore.db.writelog         (live write log)
    ///     └── labelscanstore.db.writelog-<ms>    (rotated write logs)
    pub store_dir: PathBuf,

    /// Which entity kind this store indexes
    pub entity_type: EntityType,

    /// Serve reads only; writers are refused and nothing is rebuilt
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Write Log Configuration
    // -------------------------------------------------------------------------
    pub write_log: WriteLogConfig,
}

/// Settings for the diagnostic write log
#[derive(Debug, Clone, Copy)]
pub struct WriteLogConfig {
    /// Record every low-level write to `<store>.writelog`
    pub enabled: bool,

    /// Rotate the live file at session end once it grows past this (bytes)
    pub rotation_threshold: u64,

    /// Delete rotated files older than this
    pub prune_threshold: Duration,
}

impl Default for WriteLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_threshold: 200 * 1024 * 1024, // 200 MB
            prune_threshold: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./tokenscan_data"),
            entity_type: EntityType::Node,
            read_only: false,
            write_log: WriteLogConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the tree file
    pub fn store_file(&self) -> PathBuf {
        self.store_dir.join(self.entity_type.file_name())
    }

    /// Path of the store file for a given directory and entity type
    pub fn store_file_in(dir: &Path, entity_type: EntityType) -> PathBuf {
        dir.join(entity_type.file_name())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database directory
    pub fn store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_dir = path.into();
        self
    }

    /// Set the indexed entity type
    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.config.entity_type = entity_type;
        self
    }

    /// Open the store read only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Enable or disable the write log
    pub fn write_log_enabled(mut self, enabled: bool) -> Self {
        self.config.write_log.enabled = enabled;
        self
    }

    /// Set the write log rotation threshold (in bytes)
    pub fn write_log_rotation_threshold(mut self, bytes: u64) -> Self {
        self.config.write_log.rotation_threshold = bytes;
        self
    }

    /// Set the maximum age of rotated write log files
    pub fn write_log_prune_threshold(mut self, age: Duration) -> Self {
        self.config.write_log.prune_threshold = age;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
