use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;

/// Type discriminator for stored resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    SourceType,
    ProcessorType,
    DestinationType,
    Source,
    Processor,
    Destination,
    Configuration,
    AgentVersion,
}

impl Kind {
    pub const ALL: [Kind; 8] = [
        Kind::SourceType,
        Kind::ProcessorType,
        Kind::DestinationType,
        Kind::Source,
        Kind::Processor,
        Kind::Destination,
        Kind::Configuration,
        Kind::AgentVersion,
    ];

    /// Order in which dependents are re-applied: later kinds may embed
    /// references to earlier ones.
    pub const DEPENDENT_ORDER: [Kind; 4] = [
        Kind::Processor,
        Kind::Source,
        Kind::Destination,
        Kind::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::SourceType => "SourceType",
            Kind::ProcessorType => "ProcessorType",
            Kind::DestinationType => "DestinationType",
            Kind::Source => "Source",
            Kind::Processor => "Processor",
            Kind::Destination => "Destination",
            Kind::Configuration => "Configuration",
            Kind::AgentVersion => "AgentVersion",
        }
    }

    /// Whether changes to this kind keep an archive of prior versions.
    pub fn is_versioned(&self) -> bool {
        !matches!(self, Kind::AgentVersion)
    }

    /// Downstream kinds whose resources may reference a resource of this kind.
    pub fn could_affect(&self) -> &'static [Kind] {
        match self {
            Kind::SourceType => &[Kind::Source, Kind::Configuration],
            Kind::ProcessorType => &[
                Kind::Processor,
                Kind::Source,
                Kind::Configuration,
            ],
            Kind::DestinationType => &[Kind::Destination, Kind::Configuration],
            Kind::Processor => &[Kind::Source, Kind::Configuration],
            Kind::Source | Kind::Destination => &[Kind::Configuration],
            Kind::Configuration | Kind::AgentVersion => &[],
        }
    }

    /// Kind of the resource a `type` reference on this kind points to.
    pub fn type_kind(&self) -> Option<Kind> {
        match self {
            Kind::Source => Some(Kind::SourceType),
            Kind::Processor => Some(Kind::ProcessorType),
            Kind::Destination => Some(Kind::DestinationType),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| Error::invalid(format!("unknown resource kind: {s}")))
    }
}
