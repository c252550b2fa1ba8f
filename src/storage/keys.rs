//! Key encoding for the three sled trees.
//!
//! | tree         | key                   |
//! |--------------|-----------------------|
//! | `_resources` | `Kind|Name`           |
//! | `_agents`    | `Agent|ID`            |
//! | `_archive`   | `Kind|Name|000042`    |
//!
//! Archive versions are zero-padded to a fixed width so that a prefix scan
//! over `Kind|Name|` yields versions in ascending order.

use crate::constants::AGENT_KEY_PREFIX;
use crate::constants::ARCHIVE_VERSION_WIDTH;
use crate::constants::KEY_SEPARATOR;
use crate::constants::MAX_ARCHIVED_VERSION;
use crate::Error;
use crate::Kind;
use crate::Result;

pub(crate) fn resource_key(
    kind: Kind,
    name: &str,
) -> Vec<u8> {
    format!("{kind}{KEY_SEPARATOR}{name}").into_bytes()
}

pub(crate) fn resource_prefix(kind: Kind) -> Vec<u8> {
    format!("{kind}{KEY_SEPARATOR}").into_bytes()
}

pub(crate) fn agent_key(id: &str) -> Vec<u8> {
    format!("{AGENT_KEY_PREFIX}{KEY_SEPARATOR}{id}").into_bytes()
}

pub(crate) fn agent_prefix() -> Vec<u8> {
    format!("{AGENT_KEY_PREFIX}{KEY_SEPARATOR}").into_bytes()
}

pub(crate) fn archive_key(
    kind: Kind,
    name: &str,
    version: u64,
) -> Result<Vec<u8>> {
    if version > MAX_ARCHIVED_VERSION {
        return Err(Error::invalid(format!(
            "{kind} {name} reached the maximum archived version {MAX_ARCHIVED_VERSION}"
        )));
    }
    Ok(format!(
        "{kind}{KEY_SEPARATOR}{name}{KEY_SEPARATOR}{version:0width$}",
        width = ARCHIVE_VERSION_WIDTH
    )
    .into_bytes())
}

pub(crate) fn archive_prefix(
    kind: Kind,
    name: &str,
) -> Vec<u8> {
    format!("{kind}{KEY_SEPARATOR}{name}{KEY_SEPARATOR}").into_bytes()
}

/// Human-readable form of a key for log fields.
pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
