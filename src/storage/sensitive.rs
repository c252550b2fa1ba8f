//! Sensitive parameter handling at the store boundary.
//!
//! Type definitions decide which parameters are sensitive; the flag is
//! stamped on every write. Reads replace sensitive values with
//! [`SENSITIVE_PLACEHOLDER`](crate::SENSITIVE_PLACEHOLDER); writes put the
//! stored value back wherever the caller echoed the placeholder.

use std::collections::HashMap;

use tracing::trace;

use crate::Error;
use crate::Kind;
use crate::Parameter;
use crate::Resource;
use crate::ResourceType;
use crate::Result;

/// Masks every sensitive parameter value.
pub(crate) fn mask(resource: &mut Resource) {
    resource.visit_parameters_mut(&mut |_path: &str, _kind: Kind, _type_ref: &str, parameters: &mut Vec<Parameter>| {
        for parameter in parameters.iter_mut() {
            parameter.mask();
        }
    });
}

pub(crate) fn masked(mut resource: Resource) -> Resource {
    mask(&mut resource);
    resource
}

/// Replaces placeholders in `incoming` with the values stored in `prior`,
/// matched by parameter name within the same slot. Returns the number of
/// values restored.
pub(crate) fn restore(
    incoming: &mut Resource,
    prior: &Resource,
) -> usize {
    let mut stored: HashMap<String, Vec<Parameter>> = HashMap::new();
    let mut prior = prior.clone();
    prior.visit_parameters_mut(&mut |path: &str, _kind: Kind, _type_ref: &str, parameters: &mut Vec<Parameter>| {
        stored.insert(path.to_string(), parameters.clone());
    });

    let mut restored = 0;
    incoming.visit_parameters_mut(&mut |path: &str, _kind: Kind, _type_ref: &str, parameters: &mut Vec<Parameter>| {
        let Some(previous) = stored.get(path) else {
            return;
        };
        for parameter in parameters.iter_mut().filter(|p| p.is_masked()) {
            if let Some(original) = previous.iter().find(|p| p.name == parameter.name && !p.is_masked()) {
                parameter.value = original.value.clone();
                restored += 1;
            }
        }
    });

    if restored > 0 {
        trace!(kind = %incoming.kind(), name = incoming.name(), restored, "restored sensitive values");
    }
    restored
}

/// Checks every parameter slot against its type definition and stamps the
/// sensitive flags. `lookup` resolves a pinned `name:version` type reference.
pub(crate) fn apply_type_definitions(
    resource: &mut Resource,
    lookup: &dyn Fn(Kind, &str) -> Result<Option<ResourceType>>,
) -> Result<()> {
    let mut failure: Option<Error> = None;

    resource.visit_parameters_mut(&mut |path: &str, type_kind: Kind, type_ref: &str, parameters: &mut Vec<Parameter>| {
        if failure.is_some() {
            return;
        }
        if type_ref.is_empty() {
            failure = Some(Error::invalid(format!("{path} names neither a component nor a {type_kind}")));
            return;
        }
        match lookup(type_kind, type_ref) {
            Ok(Some(definition)) => {
                if let Err(e) = check_parameters(path, &definition, parameters) {
                    failure = Some(e);
                }
            }
            Ok(None) => failure = Some(Error::invalid(format!("{type_kind} {type_ref} not found"))),
            Err(e) => failure = Some(e),
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn check_parameters(
    path: &str,
    definition: &ResourceType,
    parameters: &mut [Parameter],
) -> Result<()> {
    for parameter in parameters.iter_mut() {
        let Some(spec) = definition.definition(&parameter.name) else {
            continue;
        };
        parameter.sensitive = spec.sensitive;
        if !parameter.is_masked() && !spec.kind.accepts(&parameter.value) {
            return Err(Error::invalid(format!(
                "{path}: parameter {} of {} must be {:?}",
                parameter.name,
                definition.metadata.name,
                spec.kind
            )));
        }
    }

    for spec in definition.spec.parameters.iter().filter(|d| d.required && d.default.is_none()) {
        if !parameters.iter().any(|p| p.name == spec.name) {
            return Err(Error::invalid(format!(
                "{path}: missing required parameter {} of {}",
                spec.name, definition.metadata.name
            )));
        }
    }
    Ok(())
}
