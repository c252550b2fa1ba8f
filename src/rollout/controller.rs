//! Phased rollout state machine.
//!
//! State per configuration version:
//!
//! ```text
//! Pending --start--> Started --pause--> Paused --resume--> Started
//!                    Started --errors > MaxErrors--> Error --resume--> Started
//!                    Started --nothing pending or waiting--> Stable
//! any active version --another version started--> Replaced
//! ```
//!
//! Functions here only edit the configuration and agent values they are
//! handed; the store runs them inside its writer lock and commits every
//! edit in one transaction.

use tracing::debug;
use tracing::info;

use crate::metrics::ROLLOUT_TRANSITIONS;
use crate::Agent;
use crate::AgentRolloutState;
use crate::Configuration;
use crate::Result;
use crate::RolloutError;
use crate::RolloutOptions;
use crate::RolloutProgress;
use crate::RolloutStatus;

/// Result of one recompute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecomputeOutcome {
    /// New status when the recompute changed it
    pub transition: Option<RolloutStatus>,
    /// Agents moved from waiting to pending, in promotion order
    pub promoted: Vec<String>,
}

/// Agents moved to pending in `phase` (1-based).
///
/// Phase 1 moves `initial`; every later phase moves the previous size times
/// `multiplier`, rounded up and capped at `maximum`.
pub fn phase_size(
    options: &RolloutOptions,
    phase: u64,
) -> u64 {
    let maximum = options.maximum.max(1);
    let mut size = options.initial.clamp(1, maximum);
    for _ in 1..phase {
        if size == maximum {
            break;
        }
        let next = (size as f64 * options.multiplier).ceil();
        size = if next >= maximum as f64 {
            maximum
        } else {
            (next as u64).max(size)
        };
    }
    size
}

/// `Pending -> Started`. Returns false when already started.
pub(crate) fn start(
    configuration: &mut Configuration,
    options: Option<RolloutOptions>,
) -> Result<bool> {
    match configuration.rollout_status() {
        RolloutStatus::Pending => {}
        RolloutStatus::Started => return Ok(false),
        from => return Err(transition_error(configuration, from, "start")),
    }
    if let Some(options) = options {
        options.validate()?;
        configuration.status.rollout.options = options;
    }
    configuration.status.rollout.phase = 0;
    transition(configuration, RolloutStatus::Started);
    Ok(true)
}

/// `Started -> Paused`. Returns false when already paused.
pub(crate) fn pause(configuration: &mut Configuration) -> Result<bool> {
    match configuration.rollout_status() {
        RolloutStatus::Started => {
            transition(configuration, RolloutStatus::Paused);
            Ok(true)
        }
        RolloutStatus::Paused => Ok(false),
        from => Err(transition_error(configuration, from, "pause")),
    }
}

/// `Paused -> Started` or `Error -> Started`; resuming from error raises the
/// error budget above the errors already seen.
pub(crate) fn resume(configuration: &mut Configuration) -> Result<bool> {
    match configuration.rollout_status() {
        RolloutStatus::Paused => {}
        RolloutStatus::Error => {
            let errors = configuration.status.rollout.progress.errors;
            configuration.status.rollout.options.max_errors = errors + 1;
        }
        RolloutStatus::Started => return Ok(false),
        from => return Err(transition_error(configuration, from, "resume")),
    }
    transition(configuration, RolloutStatus::Started);
    Ok(true)
}

/// Marks an active version as superseded by another version's rollout.
pub(crate) fn replace(configuration: &mut Configuration) {
    if configuration.rollout_status().is_active() {
        transition(configuration, RolloutStatus::Replaced);
    }
}

/// Drops pending and future references to replaced versions so the new
/// rollout can enroll those agents.
pub(crate) fn retarget(
    agents: &mut [Agent],
    replaced: &[String],
) {
    for agent in agents.iter_mut() {
        let status = &mut agent.configuration_status;
        if replaced.contains(&status.pending) {
            status.pending.clear();
        }
        if replaced.contains(&status.future) {
            status.future.clear();
        }
    }
}

/// Clears the future reference of every agent still waiting on `reference`.
pub(crate) fn release_waiting(
    reference: &str,
    agents: &mut [Agent],
) -> usize {
    let mut released = 0;
    for agent in agents.iter_mut() {
        if agent.configuration_status.future == reference {
            agent.configuration_status.future.clear();
            released += 1;
        }
    }
    released
}

/// Counts `agents` by their state in the rollout of `configuration`.
///
/// Agents that no longer match the selector are only counted while pending.
pub(crate) fn count(
    configuration: &Configuration,
    agents: &[Agent],
) -> RolloutProgress {
    let reference = configuration.reference();
    let selector = &configuration.spec.selector.match_labels;
    let mut progress = RolloutProgress::default();

    for agent in agents {
        let state = agent.rollout_state(&reference);
        let matches = agent.matches(selector);
        match state {
            Some(AgentRolloutState::Complete) if matches => progress.completed += 1,
            Some(AgentRolloutState::Waiting) if matches => progress.waiting += 1,
            Some(AgentRolloutState::Pending) => progress.pending += 1,
            Some(AgentRolloutState::Error) => progress.errors += 1,
            _ => {}
        }
    }
    progress
}

/// Recomputes progress and, for a started rollout, enrolls matching agents,
/// applies the error budget and advances the phase.
pub(crate) fn recompute(
    configuration: &mut Configuration,
    agents: &mut [Agent],
) -> RecomputeOutcome {
    let mut outcome = RecomputeOutcome::default();
    let reference = configuration.reference();

    if configuration.rollout_status() != RolloutStatus::Started {
        configuration.status.rollout.progress = count(configuration, agents);
        return outcome;
    }

    agents.sort_by(|a, b| a.id.cmp(&b.id));
    enroll(configuration, &reference, agents);

    let mut progress = count(configuration, agents);
    let options = configuration.status.rollout.options.clone();

    if progress.errors > options.max_errors {
        transition(configuration, RolloutStatus::Error);
        outcome.transition = Some(RolloutStatus::Error);
    } else if progress.pending == 0 && progress.waiting == 0 {
        transition(configuration, RolloutStatus::Stable);
        outcome.transition = Some(RolloutStatus::Stable);
    } else if progress.pending == 0 {
        let phase = configuration.status.rollout.phase + 1;
        let size = phase_size(&options, phase);
        let selector = configuration.spec.selector.match_labels.clone();

        for agent in agents.iter_mut() {
            if outcome.promoted.len() as u64 >= size {
                break;
            }
            if agent.configuration_status.future == reference && agent.matches(&selector) {
                agent.promote_future();
                outcome.promoted.push(agent.id.clone());
            }
        }

        configuration.status.rollout.phase = phase;
        progress = count(configuration, agents);
        debug!(
            name = configuration.name(),
            version = configuration.version(),
            phase,
            promoted = outcome.promoted.len(),
            "rollout phase advanced"
        );
    }

    configuration.status.rollout.progress = progress;
    outcome
}

/// Points every matching agent without a state in this rollout at it, and
/// drops waiting agents that stopped matching.
fn enroll(
    configuration: &Configuration,
    reference: &str,
    agents: &mut [Agent],
) {
    let selector = &configuration.spec.selector.match_labels;
    for agent in agents.iter_mut() {
        let matches = agent.matches(selector);
        match agent.rollout_state(reference) {
            None if matches => agent.configuration_status.future = reference.to_string(),
            Some(AgentRolloutState::Waiting) if !matches => {
                agent.configuration_status.future.clear()
            }
            _ => {}
        }
    }
}

fn transition(
    configuration: &mut Configuration,
    to: RolloutStatus,
) {
    let from = configuration.rollout_status();
    configuration.status.rollout.status = to;
    ROLLOUT_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
    info!(
        name = configuration.name(),
        version = configuration.version(),
        %from,
        %to,
        "rollout status changed"
    );
}

fn transition_error(
    configuration: &Configuration,
    from: RolloutStatus,
    action: &'static str,
) -> crate::Error {
    RolloutError::InvalidTransition {
        name: configuration.reference(),
        from: from.to_string(),
        action,
    }
    .into()
}
