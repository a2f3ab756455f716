// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the action controller's deletion decisions

#[cfg(test)]
mod tests {
    use super::super::{delete_reason, DeleteReason};
    use crate::config::MatchRule;
    use crate::namespace::{ManagedNamespace, NamespaceStatus};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn rule() -> MatchRule {
        MatchRule {
            name_globs: vec!["ci-*".to_string()],
            ttl: Duration::from_secs(5 * 60),
            settling_period: Duration::from_secs(60),
            grace_period: Duration::from_secs(120),
            tasks: BTreeMap::new(),
            compiled: Vec::new(),
        }
    }

    fn namespace(status: Option<NamespaceStatus>, age: ChronoDuration) -> ManagedNamespace {
        let now = Utc::now();
        ManagedNamespace {
            name: "ci-abc".to_string(),
            created_at: now - age,
            phase: Some("Active".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            status,
            status_since: status.map(|_| now),
            status_last_seen: None,
            failing_resources: Vec::new(),
            owner: None,
            notified_for: BTreeSet::new(),
        }
    }

    #[test]
    fn test_healthy_namespace_is_not_deleted() {
        let ns = namespace(Some(NamespaceStatus::Ok), ChronoDuration::minutes(1));
        assert_eq!(delete_reason(&ns, &rule(), Utc::now()), None);
    }

    #[test]
    fn test_failing_namespace_is_not_deleted() {
        // Failing is not terminal; only failed and stale are eligible.
        for status in [
            NamespaceStatus::Unstable,
            NamespaceStatus::Failing,
        ] {
            let ns = namespace(Some(status), ChronoDuration::minutes(1));
            assert_eq!(
                delete_reason(&ns, &rule(), Utc::now()),
                None,
                "{status} must not be deleted"
            );
        }
    }

    #[test]
    fn test_stale_namespace_is_deleted() {
        let ns = namespace(Some(NamespaceStatus::Stale), ChronoDuration::minutes(1));
        assert_eq!(
            delete_reason(&ns, &rule(), Utc::now()),
            Some(DeleteReason::Stale)
        );
    }

    #[test]
    fn test_failed_namespace_is_deleted() {
        let ns = namespace(Some(NamespaceStatus::Failed), ChronoDuration::minutes(1));
        assert_eq!(
            delete_reason(&ns, &rule(), Utc::now()),
            Some(DeleteReason::Failed)
        );
    }

    #[test]
    fn test_ttl_overrun_deletes_regardless_of_status() {
        // Even a namespace annotated ok (or never classified) is evicted once
        // past its TTL; eviction is unconditional.
        for status in [None, Some(NamespaceStatus::Ok), Some(NamespaceStatus::Failing)] {
            let ns = namespace(status, ChronoDuration::minutes(10));
            assert_eq!(
                delete_reason(&ns, &rule(), Utc::now()),
                Some(DeleteReason::Ttl)
            );
        }
    }

    #[test]
    fn test_stale_outranks_ttl_reason() {
        let ns = namespace(Some(NamespaceStatus::Stale), ChronoDuration::minutes(10));
        assert_eq!(
            delete_reason(&ns, &rule(), Utc::now()),
            Some(DeleteReason::Stale),
            "The stale classification is the primary reason"
        );
    }
}
