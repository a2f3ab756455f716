// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-namespace task scheduling.
//!
//! For every matched namespace and configured task kind the scheduler
//! reconciles "a child workload exists and is fresh" against Kubernetes: a
//! `CronJob` when the task carries a schedule, a one-shot `Job` otherwise.
//! Child specs are immutable, so drift is resolved by delete-and-recreate.
//! Children whose target namespace no longer matches any rule are
//! garbage-collected.

use crate::annotations;
use crate::config::{Config, ContextConfig, MatchRule, TaskSettings};
use crate::kubernetes::{KubeGateway, Result};
use crate::metrics;
use crate::tasks::{build_cron_job, build_job, child_name, TaskKind};
use anyhow::Context;
use chrono::{DateTime, Utc};
use cron::Schedule;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::ResourceExt;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};

// ============================================================================
// Cron Expressions
// ============================================================================

/// Parse a five-field cron expression.
///
/// The `cron` crate expects a seconds field, while Kubernetes `CronJob`
/// schedules (and this configuration) are five-field; a zero seconds field is
/// prepended before parsing.
///
/// # Errors
///
/// Returns an error for expressions the cron parser rejects.
pub fn parse_cron(expression: &str) -> anyhow::Result<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized)
        .with_context(|| format!("Invalid cron expression '{expression}'"))
}

/// Earliest upcoming tick across every schedule in the configuration.
#[must_use]
pub fn next_tick(config: &Config, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    config
        .namespaces
        .iter()
        .flat_map(|rule| rule.tasks.values())
        .filter_map(|task| task.schedule.as_deref())
        .filter_map(|expression| parse_cron(expression).ok())
        .filter_map(|schedule| schedule.after(&now).next())
        .min()
}

// ============================================================================
// Scheduler
// ============================================================================

/// Reconciles child workloads for matched namespaces.
#[derive(Clone)]
pub struct TaskScheduler {
    gateway: KubeGateway,
    context: ContextConfig,
}

impl TaskScheduler {
    /// Build a scheduler rendering children into the controller's namespace.
    #[must_use]
    pub fn new(gateway: KubeGateway, context: ContextConfig) -> Self {
        TaskScheduler { gateway, context }
    }

    /// Reconcile all configured tasks for one namespace against the live
    /// child workloads listed this pass.
    ///
    /// # Errors
    ///
    /// Returns an error when a create or delete fails after retries.
    pub async fn reconcile_namespace_tasks(
        &self,
        namespace: &str,
        rule: &MatchRule,
        live_cron_jobs: &[CronJob],
        live_jobs: &[Job],
    ) -> Result<()> {
        for (kind, settings) in &rule.tasks {
            match settings.schedule.as_deref() {
                Some(schedule) => {
                    self.reconcile_cron_job(namespace, *kind, settings, schedule, live_cron_jobs)
                        .await?;
                }
                None => {
                    self.reconcile_job(namespace, *kind, settings, live_jobs)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn reconcile_cron_job(
        &self,
        namespace: &str,
        kind: TaskKind,
        settings: &TaskSettings,
        schedule: &str,
        live: &[CronJob],
    ) -> Result<()> {
        let desired = build_cron_job(&self.context, kind, namespace, settings, schedule);
        let name = child_name(kind, namespace);

        let Some(existing) = live.iter().find(|cron_job| cron_job.name_any() == name) else {
            info!(namespace, action = %kind, "Creating collector cronjob");
            self.gateway.create_cron_job(&desired).await?;
            metrics::record_child_job(kind.as_str(), "created");
            return Ok(());
        };

        if cron_job_differs(&desired, existing) {
            info!(
                namespace,
                action = %kind,
                "Collector cronjob drifted from the rendered spec, recreating"
            );
            self.gateway.delete_cron_job(&name).await?;
            self.gateway.create_cron_job(&desired).await?;
            metrics::record_child_job(kind.as_str(), "recreated");
        } else {
            debug!(namespace, action = %kind, "Collector cronjob is up to date");
        }

        Ok(())
    }

    async fn reconcile_job(
        &self,
        namespace: &str,
        kind: TaskKind,
        settings: &TaskSettings,
        live: &[Job],
    ) -> Result<()> {
        let name = child_name(kind, namespace);
        if live.iter().any(|job| job.name_any() == name) {
            return Ok(());
        }

        info!(namespace, action = %kind, "Creating one-shot collector job");
        let desired = build_job(&self.context, kind, namespace, settings);
        self.gateway.create_job(&desired).await?;
        metrics::record_child_job(kind.as_str(), "created");

        Ok(())
    }

    /// Delete children whose target namespace no longer matches any rule
    /// (namespace removed, or rules re-ordered).
    ///
    /// # Errors
    ///
    /// Returns an error when a list or delete fails after retries.
    pub async fn garbage_collect(&self, matched: &HashSet<String>) -> Result<()> {
        for cron_job in self.gateway.list_child_cron_jobs(None).await? {
            if let Some(target) = child_target(cron_job.annotations()) {
                if !matched.contains(&target) {
                    info!(
                        child = %cron_job.name_any(),
                        namespace = %target,
                        "Target namespace no longer matched, deleting collector cronjob"
                    );
                    self.gateway.delete_cron_job(&cron_job.name_any()).await?;
                    metrics::record_child_job(child_action(cron_job.annotations()), "deleted");
                }
            }
        }

        for job in self.gateway.list_child_jobs(None).await? {
            if let Some(target) = child_target(job.annotations()) {
                if !matched.contains(&target) {
                    info!(
                        child = %job.name_any(),
                        namespace = %target,
                        "Target namespace no longer matched, deleting collector job"
                    );
                    self.gateway.delete_job(&job.name_any()).await?;
                    metrics::record_child_job(child_action(job.annotations()), "deleted");
                }
            }
        }

        Ok(())
    }
}

/// Target namespace recorded on a child workload.
fn child_target(object_annotations: &std::collections::BTreeMap<String, String>) -> Option<String> {
    object_annotations.get(annotations::NAMESPACE).cloned()
}

/// Action recorded on a child workload, for metric labels.
fn child_action(object_annotations: &std::collections::BTreeMap<String, String>) -> &str {
    object_annotations
        .get(annotations::ACTION)
        .map_or("unknown", String::as_str)
}

/// Compare the fields of the rendered spec we own against the live object.
///
/// Live objects carry server-side defaults, so whole-spec equality would
/// always differ; only the rendered fields participate.
fn cron_job_differs(desired: &CronJob, live: &CronJob) -> bool {
    let desired_spec = desired.spec.as_ref();
    let live_spec = live.spec.as_ref();

    let schedule = |cron_job: Option<&k8s_openapi::api::batch::v1::CronJobSpec>| {
        cron_job.map(|spec| spec.schedule.clone())
    };
    if schedule(desired_spec) != schedule(live_spec) {
        return true;
    }

    let concurrency = |cron_job: Option<&k8s_openapi::api::batch::v1::CronJobSpec>| {
        cron_job.and_then(|spec| spec.concurrency_policy.clone())
    };
    if concurrency(desired_spec) != concurrency(live_spec) {
        return true;
    }

    fn job_spec(
        cron_job: Option<&k8s_openapi::api::batch::v1::CronJobSpec>,
    ) -> Option<&k8s_openapi::api::batch::v1::JobSpec> {
        cron_job.and_then(|spec| spec.job_template.spec.as_ref())
    }
    let (desired_job, live_job) = (job_spec(desired_spec), job_spec(live_spec));

    let deadline = |job: Option<&k8s_openapi::api::batch::v1::JobSpec>| {
        job.and_then(|spec| spec.active_deadline_seconds)
    };
    if deadline(desired_job) != deadline(live_job) {
        return true;
    }

    let backoff =
        |job: Option<&k8s_openapi::api::batch::v1::JobSpec>| job.and_then(|spec| spec.backoff_limit);
    if backoff(desired_job) != backoff(live_job) {
        return true;
    }

    fn container(
        job: Option<&k8s_openapi::api::batch::v1::JobSpec>,
    ) -> Option<&k8s_openapi::api::core::v1::Container> {
        job.and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.containers.first())
    }
    let (desired_container, live_container) = (container(desired_job), container(live_job));

    let image = desired_container.and_then(|c| c.image.clone())
        != live_container.and_then(|c| c.image.clone());
    let env = serde_json::to_value(desired_container.and_then(|c| c.env.clone()))
        .unwrap_or_default()
        != serde_json::to_value(live_container.and_then(|c| c.env.clone())).unwrap_or_default();

    image || env
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;
