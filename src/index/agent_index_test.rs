use super::*;
use crate::Agent;
use crate::AgentStatus;
use crate::Labels;
use crate::RolloutProgress;

fn agent(
    id: &str,
    env: &str,
) -> Agent {
    Agent::new(id).with_labels([("env", env)])
}

#[test]
fn select_should_return_ids_in_lexicographic_order() {
    let index = AgentIndex::new();
    for id in ["c", "a", "b"] {
        index.upsert(&agent(id, "prod"));
    }
    index.upsert(&agent("d", "dev"));

    let selector: Labels = [("env".to_string(), "prod".to_string())].into();
    assert_eq!(index.select(&selector), vec!["a", "b", "c"]);
    assert_eq!(index.select(&Labels::new()).len(), 4);
}

#[test]
fn synthetic_fields_should_follow_configuration_status() {
    let index = AgentIndex::new();

    let mut complete = agent("a1", "prod");
    complete.configuration_status.current = "cfg:1".into();

    let mut pending = agent("a2", "prod");
    pending.configuration_status.current = "cfg:1".into();
    pending.configuration_status.pending = "cfg:2".into();

    let mut errored = agent("a3", "prod");
    errored.configuration_status.pending = "cfg:2".into();
    errored.status = AgentStatus::Error;

    let mut waiting = agent("a4", "prod");
    waiting.configuration_status.future = "cfg:2".into();

    for a in [&complete, &pending, &errored, &waiting] {
        index.upsert(a);
    }

    assert_eq!(
        index.rollout_progress("cfg:2"),
        RolloutProgress {
            completed: 0,
            errors: 1,
            pending: 1,
            waiting: 1,
        }
    );
    assert_eq!(index.rollout_progress("cfg:1").completed, 1);
    assert_eq!(index.enrolled("cfg:2"), vec!["a2", "a3", "a4"]);

    let query = Query::parse("env=prod configuration-current=cfg:1").unwrap();
    assert_eq!(index.search(&query), vec!["a1", "a2"]);
}

#[test]
fn upsert_should_replace_previous_fields() {
    let index = AgentIndex::new();
    let mut a = agent("a1", "prod");
    a.configuration_status.future = "cfg:1".into();
    index.upsert(&a);
    assert_eq!(index.rollout_progress("cfg:1").waiting, 1);

    a.promote_future();
    index.upsert(&a);
    let progress = index.rollout_progress("cfg:1");
    assert_eq!(progress.waiting, 0);
    assert_eq!(progress.pending, 1);

    index.remove("a1");
    assert!(index.is_empty());
}

#[test]
fn suggestions_should_be_distinct_and_prefixed() {
    let index = AgentIndex::new();
    index.upsert(&agent("a1", "prod"));
    index.upsert(&agent("a2", "prod"));
    index.upsert(&agent("a3", "preview"));
    index.upsert(&agent("a4", "dev"));

    assert_eq!(index.suggestions("env", "pr"), vec!["preview", "prod"]);
    assert!(index.suggestions("missing", "").is_empty());
}

#[test]
fn query_parse_should_reject_malformed_terms() {
    assert!(Query::parse("env").unwrap_err().is_invalid());
    assert!(Query::parse("=prod").unwrap_err().is_invalid());
    assert!(Query::parse("  ").unwrap().is_empty());
}
