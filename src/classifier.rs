// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pure namespace health classification.
//!
//! `classify` maps observations (firing alerts, workload state, age,
//! annotations) to a status candidate plus the failing resources backing it.
//! It performs no I/O; the gateways produce the observation structs and the
//! state machine consumes the output. Keeping this a pure function is what
//! makes the lifecycle properties testable.

use crate::config::MatchRule;
use crate::namespace::{FailingResource, ManagedNamespace};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// ============================================================================
// Observations
// ============================================================================

/// One firing alert scoped to a managed namespace, as parsed from the
/// Prometheus query response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiringAlert {
    /// Namespace the alert is labeled with
    pub namespace: String,
    /// Offending resource kind, from the alert labels
    pub kind: String,
    /// Offending resource name, from the alert labels
    pub name: String,
    /// Alert name, used as the failure reason
    pub reason: String,
    /// Alert summary or description
    pub message: String,
    /// Alert severity label (`critical`, `warning`, ...)
    pub severity: String,
    /// When the alert started firing
    pub active_at: DateTime<Utc>,
}

/// Workload state of one namespace, for the Kubernetes fallback path.
#[derive(Clone, Debug, Default)]
pub struct WorkloadSnapshot {
    pub deployments: Vec<DeploymentObservation>,
    pub statefulsets: Vec<StatefulSetObservation>,
    pub replicasets: Vec<ReplicaSetObservation>,
    pub pods: Vec<PodObservation>,
}

/// Deployment state relevant to classification.
#[derive(Clone, Debug)]
pub struct DeploymentObservation {
    pub name: String,
    pub unavailable_replicas: i32,
    pub created_at: DateTime<Utc>,
}

/// StatefulSet state relevant to classification.
#[derive(Clone, Debug)]
pub struct StatefulSetObservation {
    pub name: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub created_at: DateTime<Utc>,
}

/// ReplicaSet state relevant to classification.
#[derive(Clone, Debug)]
pub struct ReplicaSetObservation {
    pub name: String,
    pub owner_deployment: Option<String>,
    pub desired: i32,
    pub created_at: DateTime<Utc>,
}

/// Pod state relevant to classification.
#[derive(Clone, Debug)]
pub struct PodObservation {
    pub name: String,
    pub phase: String,
    pub waiting_reason: Option<String>,
    pub owner_replicaset: Option<String>,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Classification Output
// ============================================================================

/// What the classifier proposes for a namespace; the state machine decides
/// how it lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCandidate {
    /// No failure signals (or still settling)
    Ok,
    /// Failure signals present; may become unstable, failing or failed
    Failing,
    /// TTL exceeded; unconditional
    Stale,
}

/// Classifier output.
#[derive(Clone, Debug)]
pub struct Classification {
    pub candidate: StatusCandidate,
    pub failing_resources: Vec<FailingResource>,
}

// ============================================================================
// Classification
// ============================================================================

/// Classify one namespace from its observations.
///
/// Priority order:
///
/// 1. Newborn grace: namespaces younger than the rule's settling period are
///    always `Ok`.
/// 2. TTL: namespaces older than the rule's TTL are `Stale`.
/// 3. Firing alerts labeled with this namespace; when the Prometheus query
///    failed (`alerts` is `None`) or returned nothing, the Kubernetes
///    workload fallback synthesizes failure signals instead.
///
/// Signals are deduplicated by `(kind, name)` keeping the highest-severity
/// reason, and ordered by `first_seen` ascending.
#[must_use]
pub fn classify(
    ns: &ManagedNamespace,
    rule: &MatchRule,
    alerts: Option<&[FiringAlert]>,
    workloads: &WorkloadSnapshot,
    now: DateTime<Utc>,
) -> Classification {
    let age = ns.age(now);

    if age < rule.settling_period {
        return Classification {
            candidate: StatusCandidate::Ok,
            failing_resources: Vec::new(),
        };
    }

    if age > rule.ttl {
        return Classification {
            candidate: StatusCandidate::Stale,
            failing_resources: Vec::new(),
        };
    }

    let mut signals = alerts
        .map(|alerts| alert_signals(ns, alerts))
        .unwrap_or_default();
    if signals.is_empty() {
        signals = fallback_signals(rule, workloads, now);
    }

    let failing_resources = dedup_and_sort(signals);
    let candidate = if failing_resources.is_empty() {
        StatusCandidate::Ok
    } else {
        StatusCandidate::Failing
    };

    Classification {
        candidate,
        failing_resources,
    }
}

/// Failure signals from firing alerts labeled with this namespace.
///
/// Alerts sharing an offender are pre-deduplicated by their severity label so
/// a `critical` alert always wins over a `warning` one for the same resource.
fn alert_signals(ns: &ManagedNamespace, alerts: &[FiringAlert]) -> Vec<FailingResource> {
    let mut by_resource: BTreeMap<(String, String), &FiringAlert> = BTreeMap::new();

    for alert in alerts.iter().filter(|alert| alert.namespace == ns.name) {
        let key = (alert.kind.clone(), alert.name.clone());
        match by_resource.get(&key) {
            Some(existing)
                if alert_severity_rank(&existing.severity)
                    >= alert_severity_rank(&alert.severity) => {}
            _ => {
                by_resource.insert(key, alert);
            }
        }
    }

    by_resource
        .into_values()
        .map(|alert| FailingResource {
            kind: alert.kind.clone(),
            name: alert.name.clone(),
            reason: alert.reason.clone(),
            message: with_suggestion(&alert.reason, &alert.message),
            first_seen: alert.active_at,
        })
        .collect()
}

/// Rank of an alert severity label.
fn alert_severity_rank(severity: &str) -> u8 {
    match severity {
        "critical" => 3,
        "warning" => 2,
        "info" => 1,
        _ => 0,
    }
}

/// Failure signals synthesized from workload state when no alerts are
/// available.
fn fallback_signals(
    rule: &MatchRule,
    workloads: &WorkloadSnapshot,
    now: DateTime<Utc>,
) -> Vec<FailingResource> {
    let mut signals = Vec::new();
    let settled = |created_at: DateTime<Utc>| {
        (now - created_at).to_std().unwrap_or_default() > rule.settling_period
    };

    for deployment in &workloads.deployments {
        if deployment.unavailable_replicas > 0 && settled(deployment.created_at) {
            signals.push(FailingResource {
                kind: "Deployment".to_string(),
                name: deployment.name.clone(),
                reason: "UnavailableReplicas".to_string(),
                message: with_suggestion(
                    "KubeDeploymentReplicasMismatch",
                    &format!(
                        "Deployment has {} unavailable replica(s)",
                        deployment.unavailable_replicas
                    ),
                ),
                first_seen: deployment.created_at,
            });
        }
    }

    for statefulset in &workloads.statefulsets {
        if statefulset.ready_replicas < statefulset.replicas && settled(statefulset.created_at) {
            signals.push(FailingResource {
                kind: "StatefulSet".to_string(),
                name: statefulset.name.clone(),
                reason: "ReadyReplicasMismatch".to_string(),
                message: with_suggestion(
                    "KubeStatefulSetReplicasMismatch",
                    &format!(
                        "StatefulSet has {}/{} ready replicas",
                        statefulset.ready_replicas, statefulset.replicas
                    ),
                ),
                first_seen: statefulset.created_at,
            });
        }
    }

    for replicaset in &workloads.replicasets {
        let owned_by_active_deployment = replicaset.owner_deployment.as_ref().is_some_and(|owner| {
            workloads
                .deployments
                .iter()
                .any(|deployment| &deployment.name == owner)
        });
        if !owned_by_active_deployment {
            continue;
        }

        let failed_pods = workloads
            .pods
            .iter()
            .filter(|pod| {
                pod.owner_replicaset.as_deref() == Some(replicaset.name.as_str())
                    && pod.phase == "Failed"
            })
            .count();
        if failed_pods > 0 {
            signals.push(FailingResource {
                kind: "ReplicaSet".to_string(),
                name: replicaset.name.clone(),
                reason: "FailedPods".to_string(),
                message: format!("ReplicaSet has {failed_pods} failed pod(s)"),
                first_seen: replicaset.created_at,
            });
        }
    }

    for pod in &workloads.pods {
        let reason = match (pod.waiting_reason.as_deref(), pod.phase.as_str()) {
            (Some(reason @ ("CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull")), _) => {
                reason.to_string()
            }
            (_, "Failed") => "Failed".to_string(),
            _ => continue,
        };

        let suggestion_key = match reason.as_str() {
            "CrashLoopBackOff" => "KubePodCrashLooping",
            "ImagePullBackOff" | "ErrImagePull" => "KubeContainerWaiting",
            _ => "KubePodNotReady",
        };

        signals.push(FailingResource {
            kind: "Pod".to_string(),
            name: pod.name.clone(),
            message: with_suggestion(suggestion_key, &format!("Pod is in {reason}")),
            reason,
            first_seen: pod.started_at,
        });
    }

    signals
}

/// Deduplicate by `(kind, name)` keeping the highest-severity reason, then
/// order by `first_seen` ascending.
fn dedup_and_sort(signals: Vec<FailingResource>) -> Vec<FailingResource> {
    let mut by_resource: BTreeMap<(String, String), FailingResource> = BTreeMap::new();

    for signal in signals {
        let key = (signal.kind.clone(), signal.name.clone());
        match by_resource.get(&key) {
            Some(existing) if severity(&existing.reason) >= severity(&signal.reason) => {}
            _ => {
                by_resource.insert(key, signal);
            }
        }
    }

    let mut out: Vec<FailingResource> = by_resource.into_values().collect();
    out.sort_by_key(|signal| signal.first_seen);
    out
}

/// Relative severity of a failure reason, used only to break dedup ties.
fn severity(reason: &str) -> u8 {
    match reason {
        "Failed" | "KubeJobFailed" => 5,
        "CrashLoopBackOff" | "KubePodCrashLooping" => 4,
        "ImagePullBackOff" | "KubeContainerWaiting" => 3,
        "ErrImagePull" | "UnavailableReplicas" | "ReadyReplicasMismatch" | "FailedPods" => 2,
        _ => 1,
    }
}

/// Append the remediation suggestion for a known alert to a message.
fn with_suggestion(reason: &str, message: &str) -> String {
    match suggestion(reason) {
        Some(hint) => format!("{message}. {hint}"),
        None => message.to_string(),
    }
}

/// Remediation suggestions keyed by the well-known kube-prometheus alert
/// names, forwarded to owners inside notifications.
fn suggestion(reason: &str) -> Option<&'static str> {
    match reason {
        "KubePodNotReady" => Some(
            "If the pod is Running but not ready, its readiness probe is failing; \
             if it is Pending, it cannot be scheduled. Check the pod's logs and events.",
        ),
        "KubePodCrashLooping" => Some(
            "The container keeps dying and being restarted. Check the pod's logs for \
             configuration issues, missing dependencies or failing health checks.",
        ),
        "KubeDeploymentReplicasMismatch" => Some(
            "The deployment cannot reach its desired replica count. Check pod status \
             and events to understand why replicas are not coming up.",
        ),
        "KubeStatefulSetReplicasMismatch" => Some(
            "The statefulset cannot reach its desired replica count. Check pod \
             scheduling, readiness probes and volume claims.",
        ),
        "KubeContainerWaiting" => Some(
            "A container is stuck waiting, usually on a missing or unpullable image. \
             Verify the image reference and registry credentials.",
        ),
        "KubeJobNotCompleted" => Some(
            "The job did not complete within the expected time. Check the job's logs \
             and whether it is stuck pending on resources.",
        ),
        "KubeJobFailed" => Some("Check the job's logs and configuration for errors."),
        "CPUThrottlingHigh" => {
            Some("High CPU throttling; make sure CPU requests are set correctly.")
        }
        "KubeQuotaExceeded" => Some("The namespace exceeded its resource quota."),
        _ => None,
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod classifier_tests;
