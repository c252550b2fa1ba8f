use crate::Component;
use crate::Configuration;
use crate::Parameter;
use crate::ParameterDefinition;
use crate::ParameterKind;
use crate::Resource;
use crate::ResourceConfiguration;
use crate::ResourceType;

/// Source type with an integer `interval` and a sensitive `password`.
pub(crate) fn source_type(name: &str) -> Resource {
    Resource::SourceType(
        ResourceType::new(name)
            .with_parameter(ParameterDefinition::new("interval", ParameterKind::Int))
            .with_parameter(ParameterDefinition::new("password", ParameterKind::String).sensitive()),
    )
}

pub(crate) fn destination_type(name: &str) -> Resource {
    Resource::DestinationType(
        ResourceType::new(name)
            .with_parameter(ParameterDefinition::new("endpoint", ParameterKind::String).required()),
    )
}

pub(crate) fn source(
    name: &str,
    type_ref: &str,
) -> Resource {
    Resource::Source(Component::new(name, type_ref))
}

pub(crate) fn source_with(
    name: &str,
    type_ref: &str,
    parameters: Vec<Parameter>,
) -> Resource {
    let mut component = Component::new(name, type_ref);
    component.spec.parameters = parameters;
    Resource::Source(component)
}

pub(crate) fn destination(
    name: &str,
    type_ref: &str,
    endpoint: &str,
) -> Resource {
    Resource::Destination(
        Component::new(name, type_ref).with_parameter(Parameter::new("endpoint", endpoint)),
    )
}

/// Configuration selecting `env=<env>` agents and naming the given sources.
pub(crate) fn configuration(
    name: &str,
    env: &str,
    sources: &[&str],
) -> Resource {
    let mut configuration = Configuration::new(name).with_selector([("env", env)]);
    for source in sources {
        configuration = configuration.with_source(ResourceConfiguration::named(*source));
    }
    Resource::Configuration(configuration)
}

/// Same configuration with a different description, a metadata-only edit.
pub(crate) fn described(
    mut resource: Resource,
    description: &str,
) -> Resource {
    resource.metadata_mut().description = description.to_string();
    resource
}
