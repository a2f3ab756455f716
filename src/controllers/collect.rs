// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The collect controller.
//!
//! One pass: list namespaces, intersect with the match rules, classify each
//! matched namespace from alerts and workload state, run the state machine,
//! write the status annotations back and reconcile the collector tasks.
//! Namespaces reconcile concurrently under a bounded worker pool; the
//! Prometheus query is batched once per pass.

use crate::alerts::AlertGateway;
use crate::classifier::{classify, FiringAlert};
use crate::config::{Config, MatchRule};
use crate::constants::{
    CONTROLLER_COLLECT, FOLLOWER_POLL_INTERVAL, MAX_PASS_INTERVAL, PASS_BUDGET,
    RECONCILE_CONCURRENCY,
};
use crate::controllers::{finish_pass, PassOutcome};
use crate::kubernetes::KubeGateway;
use crate::leader::LeaderArbiter;
use crate::metrics;
use crate::namespace::{ManagedNamespace, NamespaceStatus};
use crate::scheduler::{next_tick, TaskScheduler};
use crate::state::{apply, StateParams};
use chrono::Utc;
use futures::{stream, StreamExt};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How one namespace reconciliation ended within a pass.
enum UnitOutcome {
    Reconciled,
    /// The namespace disappeared mid-pass; dropped without error.
    Gone,
    /// Budget exhausted before this unit started.
    Deferred,
    /// Leadership went stale before this unit started.
    Stale,
    Error,
}

/// Observes and classifies managed namespaces.
pub struct CollectController {
    config: Arc<Config>,
    gateway: KubeGateway,
    alerts: AlertGateway,
    scheduler: TaskScheduler,
    arbiter: Arc<LeaderArbiter>,
}

impl CollectController {
    /// Bind the controller to its gateways.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        gateway: KubeGateway,
        alerts: AlertGateway,
        arbiter: Arc<LeaderArbiter>,
    ) -> Self {
        let scheduler = TaskScheduler::new(gateway.clone(), config.context.clone());

        CollectController {
            config,
            gateway,
            alerts,
            scheduler,
            arbiter,
        }
    }

    /// Drive the pass loop until `shutdown` resolves. Passes only run while
    /// this replica holds leadership.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting collect controller");

        loop {
            if !self.arbiter.is_leader() {
                tokio::select! {
                    _ = tokio::time::sleep(FOLLOWER_POLL_INTERVAL) => continue,
                    _ = shutdown.changed() => return,
                }
            }

            let started = Instant::now();
            let outcome = self.pass().await;
            finish_pass(CONTROLLER_COLLECT, started, outcome);

            let sleep = self.sleep_until_next_tick();
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Sleep until the earliest of the next cron tick and the pass interval
    /// cap.
    fn sleep_until_next_tick(&self) -> Duration {
        let now = Utc::now();
        next_tick(&self.config, now)
            .and_then(|tick| (tick - now).to_std().ok())
            .map_or(MAX_PASS_INTERVAL, |until| until.min(MAX_PASS_INTERVAL))
    }

    /// One reconciliation pass over all matched namespaces.
    async fn pass(&self) -> PassOutcome {
        let snapshot = match self.gateway.list_namespaces().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Failed to list namespaces, skipping pass");
                return PassOutcome::Error;
            }
        };

        let matched: Vec<(ManagedNamespace, MatchRule)> = snapshot
            .items
            .iter()
            .filter_map(ManagedNamespace::from_kube)
            .filter_map(|ns| {
                self.config
                    .match_rule(&ns.name)
                    .map(|rule| (ns, rule.clone()))
            })
            .collect();

        debug!(
            matched = matched.len(),
            resource_version = ?snapshot.resource_version,
            "Listed namespaces"
        );

        let matched_names: Vec<String> = matched.iter().map(|(ns, _)| ns.name.clone()).collect();

        // One batched alerts query per pass; a failure engages the workload
        // fallback in the classifier rather than failing the pass.
        let alerts: Option<Vec<FiringAlert>> = if self.alerts.is_configured() {
            match self.alerts.firing_alerts(&matched_names).await {
                Ok(alerts) => Some(alerts),
                Err(err) => {
                    warn!(error = %err, "Prometheus query failed, falling back to workload signals");
                    None
                }
            }
        } else {
            None
        };

        let live_cron_jobs = match self.gateway.list_child_cron_jobs(None).await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "Failed to list collector cronjobs, skipping pass");
                return PassOutcome::Error;
            }
        };
        let live_jobs = match self.gateway.list_child_jobs(None).await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "Failed to list collector jobs, skipping pass");
                return PassOutcome::Error;
            }
        };

        update_managed_gauge(&matched);

        let deadline = Instant::now() + PASS_BUDGET;
        let outcomes: Vec<UnitOutcome> = stream::iter(matched.into_iter().map(|(ns, rule)| {
            self.reconcile_namespace(ns, rule, alerts.as_deref(), &live_cron_jobs, &live_jobs, deadline)
        }))
        .buffer_unordered(RECONCILE_CONCURRENCY)
        .collect()
        .await;

        if outcomes
            .iter()
            .any(|outcome| matches!(outcome, UnitOutcome::Stale))
        {
            warn!("Lost leadership mid-pass, aborting");
            return PassOutcome::Aborted;
        }

        let gc_matched: HashSet<String> = matched_names.into_iter().collect();
        if let Err(err) = self.scheduler.garbage_collect(&gc_matched).await {
            warn!(error = %err, "Failed to garbage-collect collector workloads");
        }

        PassOutcome::Success
    }

    /// Serialized per-namespace unit: classify, transition, write back,
    /// reconcile tasks.
    async fn reconcile_namespace(
        &self,
        mut ns: ManagedNamespace,
        rule: MatchRule,
        alerts: Option<&[FiringAlert]>,
        live_cron_jobs: &[CronJob],
        live_jobs: &[Job],
        deadline: Instant,
    ) -> UnitOutcome {
        if Instant::now() > deadline {
            debug!(namespace = %ns.name, "Pass budget exhausted, deferring namespace");
            return UnitOutcome::Deferred;
        }

        if self.arbiter.check().is_err() {
            return UnitOutcome::Stale;
        }

        // A namespace already being torn down only needs the action
        // controller; classification would fight the deletion.
        if ns.is_terminating() {
            return UnitOutcome::Reconciled;
        }

        let workloads = match self.gateway.workload_snapshot(&ns.name).await {
            Ok(workloads) => workloads,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %ns.name, "Namespace disappeared mid-pass, dropping");
                return UnitOutcome::Gone;
            }
            Err(err) => {
                warn!(namespace = %ns.name, error = %err, "Failed to snapshot workloads");
                return UnitOutcome::Error;
            }
        };

        let now = Utc::now();
        let classification = classify(&ns, &rule, alerts, &workloads, now);
        let params = StateParams::from_rule(&rule);
        let transition = apply(&mut ns, &classification, &params, now);

        if let Some(event) = &transition {
            info!(
                namespace = %ns.name,
                old = event.old.map_or("none", NamespaceStatus::as_str),
                new = %event.new,
                "Namespace status transition"
            );
            metrics::record_transition(
                event.old.map_or("none", NamespaceStatus::as_str),
                event.new.as_str(),
            );
        }

        if let Err(err) = self
            .gateway
            .annotate_namespace(&ns.name, &ns.status_annotations())
            .await
        {
            if err.is_not_found() {
                return UnitOutcome::Gone;
            }
            warn!(namespace = %ns.name, error = %err, "Failed to write status annotations");
            return UnitOutcome::Error;
        }

        if let Err(err) = self
            .scheduler
            .reconcile_namespace_tasks(&ns.name, &rule, live_cron_jobs, live_jobs)
            .await
        {
            warn!(namespace = %ns.name, error = %err, "Failed to reconcile collector tasks");
            return UnitOutcome::Error;
        }

        UnitOutcome::Reconciled
    }
}

/// Refresh the managed-namespaces gauge for every status label.
fn update_managed_gauge(matched: &[(ManagedNamespace, MatchRule)]) {
    for status in [
        NamespaceStatus::Ok,
        NamespaceStatus::Unstable,
        NamespaceStatus::Failing,
        NamespaceStatus::Failed,
        NamespaceStatus::Stale,
        NamespaceStatus::Terminating,
    ] {
        let count = matched
            .iter()
            .filter(|(ns, _)| ns.status == Some(status))
            .count();
        metrics::NAMESPACES_MANAGED
            .with_label_values(&[status.as_str()])
            .set(count as f64);
    }
}

#[cfg(test)]
#[path = "collect_tests.rs"]
mod collect_tests;
