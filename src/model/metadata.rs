use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::KEY_SEPARATOR;
use crate::constants::MAX_NAME_LENGTH;
use crate::constants::SELECTOR_CURRENT;
use crate::constants::SELECTOR_LATEST;
use crate::constants::SELECTOR_PENDING;
use crate::Error;
use crate::Result;

pub type Labels = BTreeMap<String, String>;

/// Fields shared by every resource kind.
///
/// `id`, `version`, `date_modified` and `hash` are managed by the store and
/// ignored when comparing an incoming resource against the stored one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub labels: Labels,
    pub version: u64,
    /// Unix epoch milliseconds
    pub date_modified: u64,
    /// sha256 hex digest of the encoded spec
    pub hash: String,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Copy with every system-managed field cleared.
    pub(crate) fn canonical(&self) -> Self {
        Self {
            id: String::new(),
            version: 0,
            date_modified: 0,
            hash: String::new(),
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        for key in self.labels.keys() {
            if key.is_empty() || key.contains(KEY_SEPARATOR) {
                return Err(Error::invalid(format!(
                    "label key {key:?} on {} is not valid",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::invalid(format!(
            "name {name} exceeds {MAX_NAME_LENGTH} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(Error::invalid(format!(
            "name {name} may only contain alphanumerics, '-', '_' and '.'"
        )));
    }
    Ok(())
}

/// A `name` or `name:version` reference to another resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub version: Option<u64>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(
        name: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            name: name.into(),
            version: Some(version),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            None => Ok(Self::new(s)),
            Some((name, version)) => {
                let version = version
                    .parse::<u64>()
                    .map_err(|_| Error::invalid(format!("invalid version in reference {s}")))?;
                Ok(Self::pinned(name, version))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}:{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Version part of a `name[:selector]` lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Current,
    Pending,
    Version(u64),
}

/// Splits `name[:selector]` into the name and the requested version.
pub fn parse_name_selector(key: &str) -> Result<(&str, VersionSelector)> {
    let Some((name, selector)) = key.split_once(':') else {
        return Ok((key, VersionSelector::Latest));
    };
    let selector = match selector {
        "" | SELECTOR_LATEST => VersionSelector::Latest,
        SELECTOR_CURRENT => VersionSelector::Current,
        SELECTOR_PENDING => VersionSelector::Pending,
        other => VersionSelector::Version(
            other
                .parse::<u64>()
                .map_err(|_| Error::invalid(format!("invalid version selector {other}")))?,
        ),
    };
    Ok((name, selector))
}

/// Strips the `:version` suffix from a `name:version` reference.
pub fn base_name(reference: &str) -> &str {
    reference.split_once(':').map(|(name, _)| name).unwrap_or(reference)
}

/// Formats the `name:version` reference used in agent configuration status.
pub fn versioned_name(
    name: &str,
    version: u64,
) -> String {
    format!("{name}:{version}")
}
