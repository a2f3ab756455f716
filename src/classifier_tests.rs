// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for namespace health classification

#[cfg(test)]
mod tests {
    use super::super::{
        classify, DeploymentObservation, FiringAlert, PodObservation, StatefulSetObservation,
        StatusCandidate, WorkloadSnapshot,
    };
    use crate::config::MatchRule;
    use crate::namespace::ManagedNamespace;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn rule() -> MatchRule {
        MatchRule {
            name_globs: vec!["ci-*".to_string()],
            ttl: Duration::from_secs(2 * 60 * 60),
            settling_period: Duration::from_secs(120),
            grace_period: Duration::from_secs(120),
            tasks: BTreeMap::new(),
            compiled: Vec::new(),
        }
    }

    fn namespace(name: &str, age: ChronoDuration, now: DateTime<Utc>) -> ManagedNamespace {
        ManagedNamespace {
            name: name.to_string(),
            created_at: now - age,
            phase: Some("Active".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            status: None,
            status_since: None,
            status_last_seen: None,
            failing_resources: Vec::new(),
            owner: None,
            notified_for: BTreeSet::new(),
        }
    }

    fn crashing_pod(name: &str, reason: &str, started_at: DateTime<Utc>) -> PodObservation {
        PodObservation {
            name: name.to_string(),
            phase: "Pending".to_string(),
            waiting_reason: Some(reason.to_string()),
            owner_replicaset: None,
            started_at,
        }
    }

    fn alert(namespace: &str, kind: &str, name: &str, severity: &str) -> FiringAlert {
        FiringAlert {
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            reason: "KubePodCrashLooping".to_string(),
            message: "Pod is crash looping".to_string(),
            severity: severity.to_string(),
            active_at: Utc::now(),
        }
    }

    // ========================================================================
    // Settling and TTL Tests
    // ========================================================================

    #[test]
    fn test_newborn_namespace_is_ok_despite_failures() {
        // A 30 second old namespace with a crashing pod stays ok while it
        // settles.
        let now = Utc::now();
        let ns = namespace("ci-xyz", ChronoDuration::seconds(30), now);
        let workloads = WorkloadSnapshot {
            pods: vec![crashing_pod("web-0", "CrashLoopBackOff", now)],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);

        assert_eq!(result.candidate, StatusCandidate::Ok);
        assert!(
            result.failing_resources.is_empty(),
            "Settling namespaces carry no failing resources"
        );
    }

    #[test]
    fn test_namespace_past_ttl_is_stale() {
        let now = Utc::now();
        let ns = namespace("ci-abc", ChronoDuration::hours(3), now);

        let result = classify(&ns, &rule(), None, &WorkloadSnapshot::default(), now);

        assert_eq!(result.candidate, StatusCandidate::Stale);
        assert!(result.failing_resources.is_empty());
    }

    #[test]
    fn test_stale_wins_over_failure_signals() {
        let now = Utc::now();
        let ns = namespace("ci-abc", ChronoDuration::hours(3), now);
        let workloads = WorkloadSnapshot {
            pods: vec![crashing_pod("web-0", "CrashLoopBackOff", now)],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);
        assert_eq!(result.candidate, StatusCandidate::Stale);
    }

    // ========================================================================
    // Healthy Path
    // ========================================================================

    #[test]
    fn test_settled_healthy_namespace_is_ok() {
        let now = Utc::now();
        let ns = namespace("ci-ok", ChronoDuration::minutes(10), now);

        let result = classify(&ns, &rule(), Some(&[]), &WorkloadSnapshot::default(), now);

        assert_eq!(result.candidate, StatusCandidate::Ok);
        assert!(result.failing_resources.is_empty());
    }

    // ========================================================================
    // Alert Signals
    // ========================================================================

    #[test]
    fn test_alerts_scoped_to_namespace() {
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(10), now);
        let alerts = vec![
            alert("ci-a", "Pod", "web-0", "warning"),
            alert("ci-b", "Pod", "web-1", "critical"),
        ];

        let result = classify(&ns, &rule(), Some(&alerts), &WorkloadSnapshot::default(), now);

        assert_eq!(result.candidate, StatusCandidate::Failing);
        assert_eq!(result.failing_resources.len(), 1);
        assert_eq!(result.failing_resources[0].name, "web-0");
    }

    #[test]
    fn test_duplicate_alerts_keep_highest_severity() {
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(10), now);
        let mut warning = alert("ci-a", "Pod", "web-0", "warning");
        warning.reason = "KubePodNotReady".to_string();
        let critical = alert("ci-a", "Pod", "web-0", "critical");

        let result = classify(
            &ns,
            &rule(),
            Some(&[warning, critical]),
            &WorkloadSnapshot::default(),
            now,
        );

        assert_eq!(result.failing_resources.len(), 1, "Deduplicated by (kind, name)");
        assert_eq!(
            result.failing_resources[0].reason, "KubePodCrashLooping",
            "The critical alert's reason wins"
        );
    }

    #[test]
    fn test_empty_alerts_fall_back_to_workloads() {
        // The Prometheus query succeeded but returned nothing; the workload
        // fallback must still engage.
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(10), now);
        let workloads = WorkloadSnapshot {
            deployments: vec![DeploymentObservation {
                name: "api".to_string(),
                unavailable_replicas: 1,
                created_at: now - ChronoDuration::minutes(10),
            }],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), Some(&[]), &workloads, now);

        assert_eq!(result.candidate, StatusCandidate::Failing);
        assert_eq!(result.failing_resources[0].kind, "Deployment");
        assert_eq!(result.failing_resources[0].reason, "UnavailableReplicas");
    }

    // ========================================================================
    // Workload Fallback
    // ========================================================================

    #[test]
    fn test_prometheus_down_fallback_lists_pods_by_first_seen() {
        // Prometheus is down (alerts = None); three pods in ImagePullBackOff
        // must come back sorted by first_seen ascending.
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(30), now);
        let workloads = WorkloadSnapshot {
            pods: vec![
                crashing_pod("web-2", "ImagePullBackOff", now - ChronoDuration::minutes(5)),
                crashing_pod("web-0", "ImagePullBackOff", now - ChronoDuration::minutes(20)),
                crashing_pod("web-1", "ImagePullBackOff", now - ChronoDuration::minutes(10)),
            ],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);

        assert_eq!(result.candidate, StatusCandidate::Failing);
        let names: Vec<&str> = result
            .failing_resources
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["web-0", "web-1", "web-2"],
            "Ordered by first_seen ascending"
        );
        assert!(result
            .failing_resources
            .iter()
            .all(|r| r.reason == "ImagePullBackOff"));
    }

    #[test]
    fn test_deployment_within_settling_period_is_ignored() {
        // A deployment younger than the settling period is still rolling out.
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(30), now);
        let workloads = WorkloadSnapshot {
            deployments: vec![DeploymentObservation {
                name: "api".to_string(),
                unavailable_replicas: 1,
                created_at: now - ChronoDuration::seconds(30),
            }],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);
        assert_eq!(result.candidate, StatusCandidate::Ok);
    }

    #[test]
    fn test_statefulset_ready_mismatch_is_failing() {
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(30), now);
        let workloads = WorkloadSnapshot {
            statefulsets: vec![StatefulSetObservation {
                name: "db".to_string(),
                replicas: 3,
                ready_replicas: 1,
                created_at: now - ChronoDuration::minutes(20),
            }],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);

        assert_eq!(result.candidate, StatusCandidate::Failing);
        assert_eq!(result.failing_resources[0].reason, "ReadyReplicasMismatch");
        assert!(
            result.failing_resources[0].message.contains("1/3"),
            "Message should carry the ready count"
        );
    }

    #[test]
    fn test_failed_pod_phase_is_failing() {
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(30), now);
        let workloads = WorkloadSnapshot {
            pods: vec![PodObservation {
                name: "job-runner".to_string(),
                phase: "Failed".to_string(),
                waiting_reason: None,
                owner_replicaset: None,
                started_at: now - ChronoDuration::minutes(5),
            }],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);

        assert_eq!(result.candidate, StatusCandidate::Failing);
        assert_eq!(result.failing_resources[0].reason, "Failed");
    }

    #[test]
    fn test_dedup_keeps_highest_severity_fallback_reason() {
        // The same pod is both crash looping and Failed; the higher-severity
        // reason must be retained.
        let now = Utc::now();
        let ns = namespace("ci-a", ChronoDuration::minutes(30), now);
        let workloads = WorkloadSnapshot {
            pods: vec![
                crashing_pod("web-0", "ImagePullBackOff", now - ChronoDuration::minutes(5)),
                PodObservation {
                    name: "web-0".to_string(),
                    phase: "Failed".to_string(),
                    waiting_reason: None,
                    owner_replicaset: None,
                    started_at: now - ChronoDuration::minutes(5),
                },
            ],
            ..Default::default()
        };

        let result = classify(&ns, &rule(), None, &workloads, now);

        assert_eq!(result.failing_resources.len(), 1);
        assert_eq!(result.failing_resources[0].reason, "Failed");
    }
}
