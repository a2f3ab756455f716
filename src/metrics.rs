// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the namespace manager.
//!
//! All metrics carry the namespace prefix `manager_cicd_skao_int_`
//! (prometheus-safe version of "manager.cicd.skao.int").
//!
//! # Metrics Categories
//!
//! - **Pass Metrics** - Track reconciliation passes per controller
//! - **Namespace Metrics** - Track managed namespaces, transitions and deletions
//! - **Notification Metrics** - Track owner notification outcomes
//! - **Leader Election Metrics** - Track leadership state changes

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all manager metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "manager_cicd_skao_int";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via the `/metrics`
/// endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Pass Metrics
// ============================================================================

/// Total number of reconciliation passes by controller and outcome
///
/// Labels:
/// - `controller`: `collect` or `action`
/// - `status`: Outcome (`success`, `error`, `aborted`)
pub static PASSES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_passes_total"),
        "Total number of reconciliation passes by controller and outcome",
    );
    let counter = CounterVec::new(opts, &["controller", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliation passes in seconds
///
/// Labels:
/// - `controller`: `collect` or `action`
pub static PASS_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_pass_duration_seconds"),
        "Duration of reconciliation passes in seconds by controller",
    )
    .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]);
    let histogram = HistogramVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Namespace Metrics
// ============================================================================

/// Number of namespaces currently matched by the configured rules
///
/// Labels:
/// - `status`: Current status label
pub static NAMESPACES_MANAGED: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_namespaces_managed"),
        "Number of managed namespaces by status",
    );
    let gauge = GaugeVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total number of status transitions
///
/// Labels:
/// - `from`: Previous status
/// - `to`: New status
pub static TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_transitions_total"),
        "Total number of namespace status transitions",
    );
    let counter = CounterVec::new(opts, &["from", "to"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of namespace deletions issued
///
/// Labels:
/// - `reason`: `stale`, `failed` or `ttl`
pub static NAMESPACES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_namespaces_deleted_total"),
        "Total number of namespace deletions issued by reason",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of namespace deletes that failed to confirm twice
pub static DELETE_STUCK_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_delete_stuck_total"),
        "Total number of namespace deletes that failed to confirm twice",
    );
    let counter = CounterVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of child jobs reconciled
///
/// Labels:
/// - `action`: Task kind
/// - `operation`: `created`, `recreated` or `deleted`
pub static CHILD_JOBS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_child_jobs_total"),
        "Total number of child job operations by action and operation",
    );
    let counter = CounterVec::new(opts, &["action", "operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Notification Metrics
// ============================================================================

/// Total number of owner notifications by outcome
///
/// Labels:
/// - `status`: Transition status notified for
/// - `outcome`: `sent`, `skipped` or `failed`
pub static NOTIFICATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_notifications_total"),
        "Total number of owner notifications by status and outcome",
    );
    let counter = CounterVec::new(opts, &["status", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events
///
/// Labels:
/// - `status`: Event type (`acquired`, `lost`, `renewed`)
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status
///
/// Labels:
/// - `identity`: Replica holder identity
///
/// Value: 1 if leader, 0 if follower
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["identity"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a completed reconciliation pass
pub fn record_pass(controller: &str, status: &str, duration: Duration) {
    PASSES_TOTAL.with_label_values(&[controller, status]).inc();
    PASS_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a namespace status transition
pub fn record_transition(from: &str, to: &str) {
    TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
}

/// Record an issued namespace deletion
pub fn record_namespace_deleted(reason: &str) {
    NAMESPACES_DELETED_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a namespace delete that failed to confirm twice
pub fn record_delete_stuck(namespace: &str) {
    DELETE_STUCK_TOTAL.with_label_values(&[namespace]).inc();
}

/// Record a child job operation
pub fn record_child_job(action: &str, operation: &str) {
    CHILD_JOBS_TOTAL
        .with_label_values(&[action, operation])
        .inc();
}

/// Record an owner notification outcome
pub fn record_notification(status: &str, outcome: &str) {
    NOTIFICATIONS_TOTAL
        .with_label_values(&[status, outcome])
        .inc();
}

/// Record leader election acquired
pub fn record_leader_elected(identity: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[identity]).set(1.0);
}

/// Record leader election lost
pub fn record_leader_lost(identity: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[identity]).set(0.0);
}

/// Record leader election renewed
pub fn record_leader_renewed() {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["renewed"]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pass() {
        record_pass("collect", "success", Duration::from_millis(500));

        let counter = PASSES_TOTAL.with_label_values(&["collect", "success"]);
        assert!(counter.get() > 0.0);

        let histogram = PASS_DURATION_SECONDS.with_label_values(&["collect"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_transition() {
        record_transition("ok", "unstable");

        let counter = TRANSITIONS_TOTAL.with_label_values(&["ok", "unstable"]);
        assert!(counter.get() > 0.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_pass("action", "success", Duration::from_millis(100));

        let result = gather_metrics();
        assert!(result.is_ok(), "Gathering metrics should succeed");

        let metrics_text = result.unwrap();
        assert!(
            metrics_text.contains("manager_cicd_skao_int"),
            "Metrics should contain namespace prefix"
        );
        assert!(
            metrics_text.contains("passes_total"),
            "Metrics should contain pass counter"
        );
    }
}
