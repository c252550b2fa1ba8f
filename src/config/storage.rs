use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid_config;
use super::validate_directory;
use crate::Result;

/// Embedded database settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the sled database
    #[serde(default = "default_db_root_dir")]
    pub db_root_dir: PathBuf,

    /// Page cache size handed to sled
    #[serde(default = "default_cache_capacity_bytes")]
    pub cache_capacity_bytes: u64,

    /// Background flush interval; 0 leaves flushing to explicit calls
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_root_dir: default_db_root_dir(),
            cache_capacity_bytes: default_cache_capacity_bytes(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.db_root_dir, "db_root_dir")?;
        if self.cache_capacity_bytes == 0 {
            return Err(invalid_config("storage.cache_capacity_bytes must be > 0"));
        }
        Ok(())
    }
}

fn default_db_root_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_cache_capacity_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_flush_every_ms() -> u64 {
    500
}
