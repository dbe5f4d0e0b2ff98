//! Trigger decision engine
//!
//! [`decide`] is a pure function of the event and the job's trigger settings. The
//! checks run in a fixed order, and the first failing check names the rejection:
//!
//! 1. event routing (branch deletion, merge request action)
//! 2. `[ci-skip]` marker
//! 3. branch filter
//! 4. per-event on/off switch
//! 5. revision resolution

use std::collections::BTreeSet;
use std::fmt;

use crate::cause::BuildCause;
use crate::event::{CanonicalEvent, EventPayload, EventType, shorten_ref};
use crate::filter::BranchFilter;

pub const CI_SKIP_MARKER: &str = "[ci-skip]";

/// Per-job trigger settings.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub webhook_secret: String,
    pub trigger_on_push: bool,
    pub trigger_on_merge_request: bool,
    /// Empty allows every action.
    pub allowed_merge_request_actions: BTreeSet<String>,
    pub ci_skip: bool,
    pub branch_filter: BranchFilter,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            trigger_on_push: true,
            trigger_on_merge_request: true,
            allowed_merge_request_actions: BTreeSet::new(),
            ci_skip: true,
            branch_filter: BranchFilter::All,
        }
    }
}

impl TriggerConfig {
    pub fn allows_action(&self, action: &str) -> bool {
        self.allowed_merge_request_actions.is_empty()
            || self.allowed_merge_request_actions.contains(action)
    }
}

/// Policy reasons for not building. None of these are delivery failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BranchDeleted,
    ActionNotAllowed { action: String },
    CiSkip,
    BranchNotAllowed { branch: String },
    TriggerDisabled { action_type: EventType },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BranchDeleted => write!(f, "push deletes the branch"),
            Rejection::ActionNotAllowed { action } => {
                write!(f, "merge request action '{action}' is not enabled")
            }
            Rejection::CiSkip => write!(f, "found {CI_SKIP_MARKER} marker"),
            Rejection::BranchNotAllowed { branch } => {
                write!(f, "branch '{branch}' is not allowed by the branch filter")
            }
            Rejection::TriggerDisabled { action_type } => {
                write!(f, "triggering on {action_type} events is disabled")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Build,
    Rejected(Rejection),
    /// Passed every policy check but has nothing to build.
    NoRevision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    pub should_build: bool,
    pub action_type: EventType,
    /// Shortened branch the filter was evaluated against.
    pub branch: Option<String>,
    pub revision_to_build: Option<String>,
    pub outcome: Outcome,
    /// Filled in whatever the outcome.
    pub cause: BuildCause,
}

impl TriggerDecision {
    fn rejected(
        event: &CanonicalEvent,
        branch: Option<String>,
        revision: Option<String>,
        reason: Rejection,
    ) -> Self {
        Self {
            should_build: false,
            action_type: event.event_type(),
            cause: BuildCause::from_event(event, revision.as_deref()),
            branch,
            revision_to_build: revision,
            outcome: Outcome::Rejected(reason),
        }
    }
}

/// Decides whether `event` should start a build of the job configured by `config`.
pub fn decide(event: &CanonicalEvent, config: &TriggerConfig) -> TriggerDecision {
    let revision = resolve_revision(event);

    let (branch, gate, message) = match &event.payload {
        EventPayload::Push(push) => {
            let branch = shorten_ref(&push.ref_name).to_string();
            if push.is_branch_deletion() {
                return TriggerDecision::rejected(
                    event,
                    Some(branch),
                    None,
                    Rejection::BranchDeleted,
                );
            }
            let message = push.last_commit().and_then(|c| c.message.as_deref());
            (branch, config.trigger_on_push, message)
        }
        EventPayload::MergeRequest(mr) | EventPayload::PullRequest(mr) => {
            let branch = shorten_ref(&mr.target_ref).to_string();
            if !config.allows_action(&mr.action) {
                return TriggerDecision::rejected(
                    event,
                    Some(branch),
                    revision,
                    Rejection::ActionNotAllowed {
                        action: mr.action.clone(),
                    },
                );
            }
            (branch, config.trigger_on_merge_request, Some(mr.title.as_str()))
        }
    };

    if config.ci_skip && message.is_some_and(has_ci_skip) {
        return TriggerDecision::rejected(event, Some(branch), revision, Rejection::CiSkip);
    }

    if !config.branch_filter.is_allowed(&branch) {
        let reason = Rejection::BranchNotAllowed {
            branch: branch.clone(),
        };
        return TriggerDecision::rejected(event, Some(branch), revision, reason);
    }

    if !gate {
        let reason = Rejection::TriggerDisabled {
            action_type: event.event_type(),
        };
        return TriggerDecision::rejected(event, Some(branch), revision, reason);
    }

    let outcome = if revision.is_some() {
        Outcome::Build
    } else {
        Outcome::NoRevision
    };
    TriggerDecision {
        should_build: outcome == Outcome::Build,
        action_type: event.event_type(),
        cause: BuildCause::from_event(event, revision.as_deref()),
        branch: Some(branch),
        revision_to_build: revision,
        outcome,
    }
}

/// Case-insensitive search for the skip marker.
pub fn has_ci_skip(message: &str) -> bool {
    message.to_lowercase().contains(CI_SKIP_MARKER)
}

fn resolve_revision(event: &CanonicalEvent) -> Option<String> {
    match &event.payload {
        EventPayload::Push(push) => match push.last_commit() {
            Some(commit) if !commit.sha.is_empty() => Some(commit.sha.clone()),
            Some(_) => None,
            None if push.is_branch_deletion() => None,
            None => Some(push.after.clone()),
        },
        EventPayload::MergeRequest(mr) | EventPayload::PullRequest(mr) => mr
            .merge_commit_sha
            .clone()
            .filter(|sha| !sha.is_empty()),
    }
}
