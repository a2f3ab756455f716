// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the status state machine

#[cfg(test)]
mod tests {
    use super::super::{apply, next_status, StateParams, TransitionEvent};
    use crate::classifier::{Classification, StatusCandidate};
    use crate::namespace::{FailingResource, ManagedNamespace, NamespaceStatus};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn params() -> StateParams {
        StateParams {
            recovery_window: Duration::from_secs(120),
            unstable_to_failing: Duration::from_secs(120),
            grace_period: Duration::from_secs(120),
        }
    }

    fn test_namespace(status: Option<NamespaceStatus>, since: DateTime<Utc>) -> ManagedNamespace {
        ManagedNamespace {
            name: "ci-test".to_string(),
            created_at: since - ChronoDuration::hours(1),
            phase: Some("Active".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            status,
            status_since: status.map(|_| since),
            status_last_seen: None,
            failing_resources: Vec::new(),
            owner: None,
            notified_for: BTreeSet::new(),
        }
    }

    fn failing_resource() -> FailingResource {
        FailingResource {
            kind: "Pod".to_string(),
            name: "web-0".to_string(),
            reason: "CrashLoopBackOff".to_string(),
            message: "Pod is in CrashLoopBackOff".to_string(),
            first_seen: Utc::now(),
        }
    }

    fn failing_classification() -> Classification {
        Classification {
            candidate: StatusCandidate::Failing,
            failing_resources: vec![failing_resource()],
        }
    }

    fn ok_classification() -> Classification {
        Classification {
            candidate: StatusCandidate::Ok,
            failing_resources: Vec::new(),
        }
    }

    // ========================================================================
    // Transition Table Tests
    // ========================================================================

    #[test]
    fn test_first_classification_lands_directly() {
        let p = params();
        assert_eq!(
            next_status(None, Duration::ZERO, StatusCandidate::Ok, &p),
            NamespaceStatus::Ok
        );
        assert_eq!(
            next_status(None, Duration::ZERO, StatusCandidate::Failing, &p),
            NamespaceStatus::Unstable,
            "First failure signal should land in unstable, not failing"
        );
        assert_eq!(
            next_status(None, Duration::ZERO, StatusCandidate::Stale, &p),
            NamespaceStatus::Stale
        );
    }

    #[test]
    fn test_ok_with_failure_becomes_unstable() {
        let next = next_status(
            Some(NamespaceStatus::Ok),
            Duration::from_secs(600),
            StatusCandidate::Failing,
            &params(),
        );
        assert_eq!(next, NamespaceStatus::Unstable);
    }

    #[test]
    fn test_unstable_escalates_only_after_dwell() {
        let p = params();
        assert_eq!(
            next_status(
                Some(NamespaceStatus::Unstable),
                Duration::from_secs(30),
                StatusCandidate::Failing,
                &p
            ),
            NamespaceStatus::Unstable,
            "Dwell below the window should not escalate"
        );
        assert_eq!(
            next_status(
                Some(NamespaceStatus::Unstable),
                Duration::from_secs(120),
                StatusCandidate::Failing,
                &p
            ),
            NamespaceStatus::Failing
        );
    }

    #[test]
    fn test_recovery_honors_recovery_window() {
        let p = params();
        for current in [NamespaceStatus::Unstable, NamespaceStatus::Failing] {
            assert_eq!(
                next_status(Some(current), Duration::from_secs(30), StatusCandidate::Ok, &p),
                current,
                "Recovery below the window should hold {current}"
            );
            assert_eq!(
                next_status(Some(current), Duration::from_secs(121), StatusCandidate::Ok, &p),
                NamespaceStatus::Ok,
                "Recovery past the window should return {current} to ok"
            );
        }
    }

    #[test]
    fn test_failing_to_failed_only_after_grace_period() {
        let p = params();
        assert_eq!(
            next_status(
                Some(NamespaceStatus::Failing),
                Duration::from_secs(119),
                StatusCandidate::Failing,
                &p
            ),
            NamespaceStatus::Failing
        );
        assert_eq!(
            next_status(
                Some(NamespaceStatus::Failing),
                Duration::from_secs(121),
                StatusCandidate::Failing,
                &p
            ),
            NamespaceStatus::Failed
        );
    }

    #[test]
    fn test_failed_never_recovers() {
        let p = params();
        for dwell_secs in [0u64, 60, 3600, 86400] {
            assert_eq!(
                next_status(
                    Some(NamespaceStatus::Failed),
                    Duration::from_secs(dwell_secs),
                    StatusCandidate::Ok,
                    &p
                ),
                NamespaceStatus::Failed,
                "failed -> ok must never happen"
            );
        }
    }

    #[test]
    fn test_stale_outranks_failed() {
        let next = next_status(
            Some(NamespaceStatus::Failed),
            Duration::from_secs(60),
            StatusCandidate::Stale,
            &params(),
        );
        assert_eq!(
            next,
            NamespaceStatus::Stale,
            "TTL eviction is unconditional, stale wins over failed"
        );
    }

    #[test]
    fn test_stale_and_terminating_are_terminal() {
        let p = params();
        for candidate in [
            StatusCandidate::Ok,
            StatusCandidate::Failing,
            StatusCandidate::Stale,
        ] {
            assert_eq!(
                next_status(Some(NamespaceStatus::Stale), Duration::ZERO, candidate, &p),
                NamespaceStatus::Stale
            );
            assert_eq!(
                next_status(
                    Some(NamespaceStatus::Terminating),
                    Duration::ZERO,
                    candidate,
                    &p
                ),
                NamespaceStatus::Terminating
            );
        }
    }

    #[test]
    fn test_no_sequence_of_candidates_escapes_failed_except_stale() {
        // Property: for all candidate sequences, failed only ever moves to
        // stale (TTL override) and stale never moves at all.
        let p = params();
        let candidates = [
            StatusCandidate::Ok,
            StatusCandidate::Failing,
            StatusCandidate::Stale,
        ];

        let mut current = NamespaceStatus::Failed;
        for step in 0..200 {
            let candidate = candidates[step % candidates.len()];
            let next = next_status(Some(current), Duration::from_secs(600), candidate, &p);
            assert!(
                matches!(next, NamespaceStatus::Failed | NamespaceStatus::Stale),
                "failed escaped to {next} on step {step}"
            );
            if current == NamespaceStatus::Stale {
                assert_eq!(next, NamespaceStatus::Stale);
            }
            current = next;
        }
    }

    // ========================================================================
    // Apply Tests
    // ========================================================================

    #[test]
    fn test_apply_emits_transition_event_on_change() {
        let now = Utc::now();
        let mut ns = test_namespace(Some(NamespaceStatus::Ok), now - ChronoDuration::minutes(10));

        let event = apply(&mut ns, &failing_classification(), &params(), now);

        assert_eq!(
            event,
            Some(TransitionEvent {
                namespace: "ci-test".to_string(),
                old: Some(NamespaceStatus::Ok),
                new: NamespaceStatus::Unstable,
            })
        );
        assert_eq!(ns.status, Some(NamespaceStatus::Unstable));
        assert_eq!(ns.status_since, Some(now));
        assert!(!ns.failing_resources.is_empty());
    }

    #[test]
    fn test_apply_refreshes_last_seen_without_change() {
        let now = Utc::now();
        let since = now - ChronoDuration::seconds(30);
        let mut ns = test_namespace(Some(NamespaceStatus::Ok), since);

        let event = apply(&mut ns, &ok_classification(), &params(), now);

        assert!(event.is_none(), "No transition expected");
        assert_eq!(ns.status, Some(NamespaceStatus::Ok));
        assert_eq!(ns.status_since, Some(since), "status_since must not move");
        assert_eq!(ns.status_last_seen, Some(now));
    }

    #[test]
    fn test_apply_keeps_status_since_monotonic() {
        let now = Utc::now();
        let future_since = now + ChronoDuration::seconds(30);
        let mut ns = test_namespace(Some(NamespaceStatus::Ok), future_since);

        // A clock skew between replicas must never decrease status_since.
        apply(&mut ns, &failing_classification(), &params(), now);
        assert_eq!(ns.status, Some(NamespaceStatus::Unstable));
        assert_eq!(ns.status_since, Some(future_since));
    }

    #[test]
    fn test_apply_clears_failing_resources_on_recovery() {
        let now = Utc::now();
        let mut ns = test_namespace(
            Some(NamespaceStatus::Failing),
            now - ChronoDuration::minutes(5),
        );
        ns.failing_resources = vec![failing_resource()];

        let event = apply(&mut ns, &ok_classification(), &params(), now);

        assert_eq!(
            event.map(|e| e.new),
            Some(NamespaceStatus::Ok),
            "Five minutes in failing exceeds the recovery window"
        );
        assert!(
            ns.failing_resources.is_empty(),
            "failing-resources must be empty when status is ok"
        );
    }

    #[test]
    fn test_apply_clears_failing_resources_on_stale() {
        let now = Utc::now();
        let mut ns = test_namespace(
            Some(NamespaceStatus::Failing),
            now - ChronoDuration::minutes(1),
        );
        ns.failing_resources = vec![failing_resource()];

        let stale = Classification {
            candidate: StatusCandidate::Stale,
            failing_resources: Vec::new(),
        };
        apply(&mut ns, &stale, &params(), now);

        assert_eq!(ns.status, Some(NamespaceStatus::Stale));
        assert!(
            ns.failing_resources.is_empty(),
            "failing-resources must be empty when status is stale"
        );
    }
}
