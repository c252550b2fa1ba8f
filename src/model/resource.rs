//! Closed set of stored resource kinds.
//!
//! Every kind is a variant of [`Resource`]; kind-specific behaviour
//! (references, parameters, validation) is dispatched with exhaustive
//! matches so adding a kind is a compile error until every table handles it.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use super::Configuration;
use super::Kind;
use super::Metadata;
use super::Parameter;
use super::ParameterDefinition;
use super::ResourceRef;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeSpec {
    pub parameters: Vec<ParameterDefinition>,
    /// Telemetry the type produces or accepts (logs, metrics, traces)
    pub telemetry_types: Vec<String>,
}

/// SourceType, ProcessorType and DestinationType share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub metadata: Metadata,
    pub spec: ResourceTypeSpec,
}

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(name),
            ..Default::default()
        }
    }

    pub fn with_parameter(
        mut self,
        definition: ParameterDefinition,
    ) -> Self {
        self.spec.parameters.push(definition);
        self
    }

    pub fn definition(
        &self,
        name: &str,
    ) -> Option<&ParameterDefinition> {
        self.spec.parameters.iter().find(|d| d.name == name)
    }
}

/// Entry in a configuration or component that either names a stored
/// component (`name`) or inlines a type with parameters (`type_name`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    pub name: String,
    pub type_name: String,
    pub parameters: Vec<Parameter>,
    pub processors: Vec<ResourceConfiguration>,
    pub disabled: bool,
}

impl ResourceConfiguration {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn inline(
        type_name: impl Into<String>,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            parameters,
            ..Default::default()
        }
    }

    pub fn with_processor(
        mut self,
        processor: ResourceConfiguration,
    ) -> Self {
        self.processors.push(processor);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub type_name: String,
    pub parameters: Vec<Parameter>,
    /// Only meaningful on sources
    pub processors: Vec<ResourceConfiguration>,
    pub disabled: bool,
}

/// Source, Processor and Destination share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub metadata: Metadata,
    pub spec: ComponentSpec,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: Metadata::new(name),
            spec: ComponentSpec {
                type_name: type_name.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_parameter(
        mut self,
        parameter: Parameter,
    ) -> Self {
        self.spec.parameters.push(parameter);
        self
    }

    pub fn with_processor(
        mut self,
        processor: ResourceConfiguration,
    ) -> Self {
        self.spec.processors.push(processor);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentVersionSpec {
    pub version: String,
    /// Platform (e.g. `linux-amd64`) to download URL
    pub downloads: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub metadata: Metadata,
    pub spec: AgentVersionSpec,
}

/// A reference found in a resource: the kind it points at and the raw
/// `name[:version]` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub kind: Kind,
    pub reference: ResourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    SourceType(ResourceType),
    ProcessorType(ResourceType),
    DestinationType(ResourceType),
    Source(Component),
    Processor(Component),
    Destination(Component),
    Configuration(Configuration),
    AgentVersion(AgentVersion),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Resource::SourceType(_) => Kind::SourceType,
            Resource::ProcessorType(_) => Kind::ProcessorType,
            Resource::DestinationType(_) => Kind::DestinationType,
            Resource::Source(_) => Kind::Source,
            Resource::Processor(_) => Kind::Processor,
            Resource::Destination(_) => Kind::Destination,
            Resource::Configuration(_) => Kind::Configuration,
            Resource::AgentVersion(_) => Kind::AgentVersion,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Resource::SourceType(r) | Resource::ProcessorType(r) | Resource::DestinationType(r) => {
                &r.metadata
            }
            Resource::Source(c) | Resource::Processor(c) | Resource::Destination(c) => &c.metadata,
            Resource::Configuration(c) => &c.metadata,
            Resource::AgentVersion(a) => &a.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Resource::SourceType(r) | Resource::ProcessorType(r) | Resource::DestinationType(r) => {
                &mut r.metadata
            }
            Resource::Source(c) | Resource::Processor(c) | Resource::Destination(c) => {
                &mut c.metadata
            }
            Resource::Configuration(c) => &mut c.metadata,
            Resource::AgentVersion(a) => &mut a.metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn version(&self) -> u64 {
        self.metadata().version
    }

    pub fn as_configuration(&self) -> Option<&Configuration> {
        match self {
            Resource::Configuration(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_configuration(self) -> Option<Configuration> {
        match self {
            Resource::Configuration(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_resource_type(&self) -> Option<&ResourceType> {
        match self {
            Resource::SourceType(r) | Resource::ProcessorType(r) | Resource::DestinationType(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    /// Encoded spec, the input to the spec digest and to spec comparison.
    pub(crate) fn encoded_spec(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Resource::SourceType(r) | Resource::ProcessorType(r) | Resource::DestinationType(r) => {
                bincode::serialize(&r.spec)?
            }
            Resource::Source(c) | Resource::Processor(c) | Resource::Destination(c) => {
                bincode::serialize(&c.spec)?
            }
            Resource::Configuration(c) => bincode::serialize(&c.spec)?,
            Resource::AgentVersion(a) => bincode::serialize(&a.spec)?,
        };
        Ok(bytes)
    }

    pub(crate) fn spec_digest(&self) -> Result<String> {
        let bytes = self.encoded_spec()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Copy with system-managed metadata and status cleared, used to decide
    /// whether an apply changed anything.
    pub(crate) fn canonical(&self) -> Resource {
        let mut canonical = self.clone();
        *canonical.metadata_mut() = self.metadata().canonical();
        if let Resource::Configuration(c) = &mut canonical {
            c.status = Default::default();
        }
        canonical
    }

    /// Every reference to another resource.
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut clone = self.clone();
        let mut dependencies = Vec::new();
        clone.visit_references_mut(&mut |kind: Kind, reference: &mut String| {
            if let Ok(reference) = ResourceRef::parse(reference.as_str()) {
                if !reference.is_empty() {
                    dependencies.push(Dependency { kind, reference });
                }
            }
        });
        dependencies
    }

    /// Visits every reference slot with the kind it points at.
    pub(crate) fn visit_references_mut(
        &mut self,
        f: &mut dyn FnMut(Kind, &mut String),
    ) {
        let kind = self.kind();
        match self {
            Resource::Source(c) | Resource::Processor(c) | Resource::Destination(c) => {
                if let Some(type_kind) = kind.type_kind() {
                    if !c.spec.type_name.is_empty() {
                        f(type_kind, &mut c.spec.type_name);
                    }
                }
                for processor in &mut c.spec.processors {
                    visit_entry_references(processor, Kind::Processor, f);
                }
            }
            Resource::Configuration(c) => {
                for source in &mut c.spec.sources {
                    visit_entry_references(source, Kind::Source, f);
                }
                for destination in &mut c.spec.destinations {
                    visit_entry_references(destination, Kind::Destination, f);
                }
            }
            Resource::SourceType(_)
            | Resource::ProcessorType(_)
            | Resource::DestinationType(_)
            | Resource::AgentVersion(_) => {}
        }
    }

    /// Visits every parameter list with a stable slot path and the type
    /// reference that defines its parameters.
    pub(crate) fn visit_parameters_mut(
        &mut self,
        f: &mut dyn FnMut(&str, Kind, &str, &mut Vec<Parameter>),
    ) {
        let kind = self.kind();
        match self {
            Resource::Source(c) | Resource::Processor(c) | Resource::Destination(c) => {
                if let Some(type_kind) = kind.type_kind() {
                    f("spec", type_kind, &c.spec.type_name, &mut c.spec.parameters);
                }
                for (i, processor) in c.spec.processors.iter_mut().enumerate() {
                    visit_entry_parameters(&format!("processors/{i}"), processor, Kind::Processor, f);
                }
            }
            Resource::Configuration(c) => {
                for (i, source) in c.spec.sources.iter_mut().enumerate() {
                    visit_entry_parameters(&format!("sources/{i}"), source, Kind::Source, f);
                }
                for (i, destination) in c.spec.destinations.iter_mut().enumerate() {
                    visit_entry_parameters(
                        &format!("destinations/{i}"),
                        destination,
                        Kind::Destination,
                        f,
                    );
                }
            }
            Resource::SourceType(_)
            | Resource::ProcessorType(_)
            | Resource::DestinationType(_)
            | Resource::AgentVersion(_) => {}
        }
    }
}

fn visit_entry_references(
    entry: &mut ResourceConfiguration,
    component_kind: Kind,
    f: &mut dyn FnMut(Kind, &mut String),
) {
    if !entry.name.is_empty() {
        f(component_kind, &mut entry.name);
    } else if let Some(type_kind) = component_kind.type_kind() {
        if !entry.type_name.is_empty() {
            f(type_kind, &mut entry.type_name);
        }
    }
    for processor in &mut entry.processors {
        visit_entry_references(processor, Kind::Processor, f);
    }
}

fn visit_entry_parameters(
    path: &str,
    entry: &mut ResourceConfiguration,
    component_kind: Kind,
    f: &mut dyn FnMut(&str, Kind, &str, &mut Vec<Parameter>),
) {
    // Named entries take their parameters from the stored component.
    if entry.name.is_empty() {
        if let Some(type_kind) = component_kind.type_kind() {
            f(path, type_kind, &entry.type_name, &mut entry.parameters);
        }
    }
    for (i, processor) in entry.processors.iter_mut().enumerate() {
        visit_entry_parameters(
            &format!("{path}/processors/{i}"),
            processor,
            Kind::Processor,
            f,
        );
    }
}
