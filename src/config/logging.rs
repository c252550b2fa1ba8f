use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for the rolling log file written by the binary
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.log_dir, "log_dir")
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
