use super::sensitive::*;
use crate::test_utils::source_type;
use crate::test_utils::source_with;
use crate::Configuration;
use crate::Kind;
use crate::Parameter;
use crate::ParameterValue;
use crate::Resource;
use crate::ResourceConfiguration;
use crate::ResourceType;
use crate::Result;
use crate::SENSITIVE_PLACEHOLDER;

fn lookup(
    kind: Kind,
    reference: &str,
) -> Result<Option<ResourceType>> {
    match (kind, reference) {
        (Kind::SourceType, "macos:1") => Ok(source_type("macos").as_resource_type().cloned()),
        _ => Ok(None),
    }
}

fn parameter<'a>(
    resource: &'a Resource,
    name: &str,
) -> &'a Parameter {
    match resource {
        Resource::Source(c) => c.spec.parameters.iter().find(|p| p.name == name).unwrap(),
        _ => panic!("not a source"),
    }
}

fn secret_source() -> Resource {
    source_with(
        "s1",
        "macos:1",
        vec![Parameter::new("interval", 30i64), Parameter::new("password", "hunter2")],
    )
}

#[test]
fn apply_type_definitions_should_stamp_sensitive_flags() {
    let mut resource = secret_source();
    apply_type_definitions(&mut resource, &lookup).unwrap();

    assert!(parameter(&resource, "password").sensitive);
    assert!(!parameter(&resource, "interval").sensitive);
}

#[test]
fn mask_should_replace_only_sensitive_values() {
    let mut resource = secret_source();
    apply_type_definitions(&mut resource, &lookup).unwrap();

    let masked = masked(resource);

    assert!(parameter(&masked, "password").is_masked());
    assert_eq!(parameter(&masked, "interval").value, ParameterValue::Int(30));
}

#[test]
fn restore_should_put_back_stored_values_for_placeholders() {
    let mut stored = secret_source();
    apply_type_definitions(&mut stored, &lookup).unwrap();
    let mut incoming = masked(stored.clone());

    assert_eq!(restore(&mut incoming, &stored), 1);
    assert_eq!(
        parameter(&incoming, "password").value,
        ParameterValue::String("hunter2".into())
    );
}

#[test]
fn restore_should_keep_new_values() {
    let mut stored = secret_source();
    apply_type_definitions(&mut stored, &lookup).unwrap();
    let mut incoming = source_with("s1", "macos:1", vec![Parameter::new("password", "rotated")]);

    assert_eq!(restore(&mut incoming, &stored), 0);
    assert_eq!(
        parameter(&incoming, "password").value,
        ParameterValue::String("rotated".into())
    );
}

#[test]
fn restore_should_match_by_slot() {
    let inline = |value: &str| {
        Resource::Configuration(
            Configuration::new("c1")
                .with_source(ResourceConfiguration::inline("macos:1", vec![Parameter::new("password", "a")]))
                .with_source(ResourceConfiguration::inline("macos:1", vec![Parameter::new("password", value)])),
        )
    };
    let mut stored = inline("b");
    apply_type_definitions(&mut stored, &lookup).unwrap();
    let mut incoming = masked(stored.clone());

    assert_eq!(restore(&mut incoming, &stored), 2);
    let Resource::Configuration(c) = incoming else {
        panic!("not a configuration");
    };
    assert_eq!(c.spec.sources[0].parameters[0].value, ParameterValue::String("a".into()));
    assert_eq!(c.spec.sources[1].parameters[0].value, ParameterValue::String("b".into()));
}

#[test]
fn apply_type_definitions_should_reject_wrong_value_kind() {
    let mut resource = source_with("s1", "macos:1", vec![Parameter::new("interval", "soon")]);
    let e = apply_type_definitions(&mut resource, &lookup).unwrap_err();
    assert!(e.is_invalid());
    assert!(e.to_string().contains("interval"), "{e}");
}

#[test]
fn apply_type_definitions_should_accept_placeholder_for_any_kind() {
    let mut resource = source_with(
        "s1",
        "macos:1",
        vec![Parameter::new("interval", SENSITIVE_PLACEHOLDER)],
    );
    assert!(apply_type_definitions(&mut resource, &lookup).is_ok());
}

#[test]
fn apply_type_definitions_should_reject_unknown_type() {
    let mut resource = source_with("s1", "linux:1", vec![]);
    let e = apply_type_definitions(&mut resource, &lookup).unwrap_err();
    assert!(e.is_invalid());
}

#[test]
fn apply_type_definitions_should_require_required_parameters() {
    let lookup = |_: Kind, _: &str| -> Result<Option<ResourceType>> {
        Ok(crate::test_utils::destination_type("otlp").as_resource_type().cloned())
    };
    let mut resource = Resource::Destination(crate::Component::new("d1", "otlp:1"));

    let e = apply_type_definitions(&mut resource, &lookup).unwrap_err();

    assert!(e.to_string().contains("endpoint"), "{e}");
}
