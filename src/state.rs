// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status state machine with hysteresis.
//!
//! Consumes classifier output plus the namespace's persisted status and
//! returns the next status, honoring the dwell-time windows that keep the
//! classification from oscillating under flaky health signals.
//!
//! The failure track progresses monotonically `ok -> unstable -> failing ->
//! failed`; recovery to `ok` is allowed from `unstable` and `failing` only.
//! `failed`, `stale` and `terminating` are terminal here; only the action
//! controller moves a namespace out of them, by deleting it. `stale` outranks
//! `failed` because TTL eviction is unconditional.

use crate::classifier::{Classification, StatusCandidate};
use crate::config::MatchRule;
use crate::constants::DEFAULT_RECOVERY_WINDOW;
use crate::namespace::{ManagedNamespace, NamespaceStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

// ============================================================================
// Parameters
// ============================================================================

/// Hysteresis windows applied to transitions.
#[derive(Clone, Copy, Debug)]
pub struct StateParams {
    /// Dwell a recovering namespace must hold before returning to `ok`
    pub recovery_window: Duration,
    /// Dwell in `unstable` before failure signals escalate to `failing`
    pub unstable_to_failing: Duration,
    /// Dwell in `failing` before escalating to `failed`
    pub grace_period: Duration,
}

impl StateParams {
    /// Derive the windows from a match rule.
    #[must_use]
    pub fn from_rule(rule: &MatchRule) -> Self {
        StateParams {
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            unstable_to_failing: rule.settling_period,
            grace_period: rule.grace_period,
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// A status change on one namespace; the unit of notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionEvent {
    /// Namespace name
    pub namespace: String,
    /// Previous status, absent on first classification
    pub old: Option<NamespaceStatus>,
    /// New status
    pub new: NamespaceStatus,
}

/// Compute the next status for `current` given candidate `candidate` and
/// dwell time `dwell` in the current status.
#[must_use]
pub fn next_status(
    current: Option<NamespaceStatus>,
    dwell: Duration,
    candidate: StatusCandidate,
    params: &StateParams,
) -> NamespaceStatus {
    use NamespaceStatus as S;
    use StatusCandidate as C;

    let Some(current) = current else {
        // First classification of a namespace with no persisted status.
        return match candidate {
            C::Ok => S::Ok,
            C::Failing => S::Unstable,
            C::Stale => S::Stale,
        };
    };

    match (current, candidate) {
        // Terminal states. Stale wins over failed because TTL eviction is
        // unconditional; terminating never changes.
        (S::Terminating, _) => S::Terminating,
        (S::Stale, _) => S::Stale,
        (S::Failed, C::Stale) => S::Stale,
        (S::Failed, _) => S::Failed,

        (_, C::Stale) => S::Stale,

        (S::Ok, C::Ok) => S::Ok,
        (S::Ok, C::Failing) => S::Unstable,

        (S::Unstable, C::Ok) => {
            if dwell >= params.recovery_window {
                S::Ok
            } else {
                S::Unstable
            }
        }
        (S::Unstable, C::Failing) => {
            if dwell >= params.unstable_to_failing {
                S::Failing
            } else {
                S::Unstable
            }
        }

        (S::Failing, C::Ok) => {
            if dwell >= params.recovery_window {
                S::Ok
            } else {
                S::Failing
            }
        }
        (S::Failing, C::Failing) => {
            if dwell >= params.grace_period {
                S::Failed
            } else {
                S::Failing
            }
        }
    }
}

/// Apply a classification to the in-memory namespace view.
///
/// Updates `status`, `status_since`, `status_last_seen` and
/// `failing_resources`, and returns the transition event when the status
/// changed. `status_since` never decreases.
pub fn apply(
    ns: &mut ManagedNamespace,
    classification: &Classification,
    params: &StateParams,
    now: DateTime<Utc>,
) -> Option<TransitionEvent> {
    let old = ns.status;
    let new = next_status(old, ns.dwell(now), classification.candidate, params);

    let changed = old != Some(new);
    if changed {
        let since = ns.status_since.map_or(now, |previous| previous.max(now));
        ns.status = Some(new);
        ns.status_since = Some(since);
    }

    // `failing_resources` is empty exactly for the healthy and age-evicted
    // states; the failure track always carries the current offender list.
    match new {
        NamespaceStatus::Ok | NamespaceStatus::Stale => ns.failing_resources.clear(),
        NamespaceStatus::Unstable | NamespaceStatus::Failing | NamespaceStatus::Failed => {
            if !classification.failing_resources.is_empty() {
                ns.failing_resources = classification.failing_resources.clone();
            }
        }
        NamespaceStatus::Terminating => {}
    }

    // The classifier output produced `new`, so it agrees with it either way.
    ns.status_last_seen = Some(now);

    if !changed {
        return None;
    }

    Some(TransitionEvent {
        namespace: ns.name.clone(),
        old,
        new,
    })
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod state_tests;
