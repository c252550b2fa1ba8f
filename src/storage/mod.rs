mod keys;
mod sensitive;
mod sled_store;
mod sled_store_rollout;
mod store;

#[cfg(test)]
mod sensitive_test;

use std::path::Path;

pub use sled_store::*;
pub use store::*;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::StorageConfig;
use crate::StorageError;

/// Opens the control-plane database under `config.db_root_dir`.
pub fn init_sled_db(config: &StorageConfig) -> Result<sled::Db> {
    init_sled_db_at(&config.db_root_dir, config)
}

pub(crate) fn init_sled_db_at(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug,
    config: &StorageConfig,
) -> Result<sled::Db> {
    debug!("init_sled_db from path: {:?}", &sled_db_root_path);

    let db_path = sled_db_root_path.as_ref().join("control_plane");
    let flush_every_ms = (config.flush_every_ms > 0).then_some(config.flush_every_ms);

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(config.cache_capacity_bytes)
        .flush_every_ms(flush_every_ms)
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", db_path, e);
            StorageError::IoError(std::io::Error::other(e)).into()
        })
}
