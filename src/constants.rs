// -
// Database namespaces

/// Sled database tree namespaces
pub(crate) const RESOURCES_TREE: &str = "_resources";
pub(crate) const AGENTS_TREE: &str = "_agents";
pub(crate) const ARCHIVE_TREE: &str = "_archive";

/// Key layout: `Kind|Name`, `Agent|ID`, `Kind|Name|000042`
pub(crate) const KEY_SEPARATOR: char = '|';
pub(crate) const AGENT_KEY_PREFIX: &str = "Agent";

/// Width of the zero-padded version suffix on archive keys.
/// Range scans rely on it to return versions in ascending order.
pub(crate) const ARCHIVE_VERSION_WIDTH: usize = 6;
pub(crate) const MAX_ARCHIVED_VERSION: u64 = 999_999;

/// Placeholder written over sensitive parameter values on every read
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive)";

/// Version selectors accepted after `name:`
pub(crate) const SELECTOR_LATEST: &str = "latest";
pub(crate) const SELECTOR_CURRENT: &str = "current";
pub(crate) const SELECTOR_PENDING: &str = "pending";

/// Synthetic agent index fields
pub const FIELD_CONFIGURATION_CURRENT: &str = "configuration-current";
pub const FIELD_CONFIGURATION_PENDING: &str = "configuration-pending";
pub const FIELD_CONFIGURATION_FUTURE: &str = "configuration-future";
pub const FIELD_ROLLOUT_COMPLETE: &str = "rollout-complete";
pub const FIELD_ROLLOUT_ERROR: &str = "rollout-error";
pub const FIELD_ROLLOUT_PENDING: &str = "rollout-pending";
pub const FIELD_ROLLOUT_WAITING: &str = "rollout-waiting";

pub(crate) const MAX_NAME_LENGTH: usize = 253;
