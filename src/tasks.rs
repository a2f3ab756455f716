// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Child workload construction for per-namespace collector tasks.
//!
//! Each matched namespace gets, per configured task kind, either a `CronJob`
//! (when the task carries a schedule) or a one-shot `Job`, rendered into the
//! controller's own namespace. Children are named deterministically from the
//! task kind and a hash of the target namespace so that re-rendering collapses
//! duplicates.

use crate::annotations;
use crate::config::{ContextConfig, TaskSettings};
use crate::constants::{
    CHILD_JOB_BACKOFF_LIMIT, CHILD_JOB_DEADLINE_SECS, CHILD_NAME_HASH_LEN,
    FAILED_JOBS_HISTORY_LIMIT, SUCCESSFUL_JOBS_HISTORY_LIMIT,
};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Task Kinds
// ============================================================================

/// The kinds of per-namespace tasks the controllers materialize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Probe the target namespace's workloads from inside the cluster
    CheckNamespace,
    /// Resolve the namespace owner through the people API
    GetOwnerInfo,
    /// Delete the target namespace
    DeleteNamespace,
    /// Deliver a pending owner notification
    Notify,
}

impl TaskKind {
    /// The action string carried in child annotations and environment.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::CheckNamespace => "check-namespace",
            TaskKind::GetOwnerInfo => "get-owner-info",
            TaskKind::DeleteNamespace => "delete-namespace",
            TaskKind::Notify => "notify",
        }
    }

    /// Parse an action string back into a task kind.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "check-namespace" => Some(TaskKind::CheckNamespace),
            "get-owner-info" => Some(TaskKind::GetOwnerInfo),
            "delete-namespace" => Some(TaskKind::DeleteNamespace),
            "notify" => Some(TaskKind::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Deterministic Naming
// ============================================================================

/// Compute the truncated sha256 hex digest used in child names.
#[must_use]
pub fn sha256_hex(value: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let length = length.clamp(1, digest.len());
    digest[..length].to_string()
}

/// Deterministic child name for `(action, target_namespace)`.
///
/// The name is `{action}-{sha256(target_namespace)[:8]}`, so re-rendering the
/// same pair always collapses onto the same object.
#[must_use]
pub fn child_name(kind: TaskKind, target_namespace: &str) -> String {
    format!(
        "{}-{}",
        kind.as_str(),
        sha256_hex(target_namespace, CHILD_NAME_HASH_LEN)
    )
}

// ============================================================================
// Template Rendering
// ============================================================================

/// Shared metadata for a child workload.
fn child_metadata(ctx: &ContextConfig, kind: TaskKind, target_namespace: &str) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(
        annotations::MANAGED_BY_LABEL.to_string(),
        annotations::MANAGED_BY_VALUE.to_string(),
    );
    labels.insert(
        annotations::MANAGED_NAMESPACE_LABEL.to_string(),
        target_namespace.to_string(),
    );
    for (key, value) in &ctx.match_labels {
        labels.insert(key.clone(), value.clone());
    }

    let mut meta_annotations = BTreeMap::new();
    meta_annotations.insert(annotations::ACTION.to_string(), kind.to_string());
    meta_annotations.insert(
        annotations::NAMESPACE.to_string(),
        target_namespace.to_string(),
    );

    ObjectMeta {
        name: Some(child_name(kind, target_namespace)),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(labels),
        annotations: Some(meta_annotations),
        ..Default::default()
    }
}

/// Pod template executing the collector binary for one task.
fn child_pod_template(ctx: &ContextConfig, kind: TaskKind, target_namespace: &str) -> PodTemplateSpec {
    let env = vec![
        EnvVar {
            name: "COLLECTOR_ACTION".to_string(),
            value: Some(kind.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "COLLECTOR_NAMESPACE".to_string(),
            value: Some(target_namespace.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "CONFIG_PATH".to_string(),
            value: Some(ctx.config_path.clone()),
            ..Default::default()
        },
    ];

    let config_mount_path = std::path::Path::new(&ctx.config_path)
        .parent()
        .map_or_else(|| "/etc/namespace-manager".to_string(), |p| {
            p.to_string_lossy().to_string()
        });

    let container = Container {
        name: "collector".to_string(),
        image: Some(ctx.image.clone()),
        command: Some(vec!["collector".to_string()]),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: "config".to_string(),
            mount_path: config_mount_path,
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let mut pod_labels = BTreeMap::new();
    pod_labels.insert(
        annotations::MANAGED_NAMESPACE_LABEL.to_string(),
        target_namespace.to_string(),
    );

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(ctx.service_account.clone()),
            restart_policy: Some("Never".to_string()),
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: "config".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(ctx.config_secret.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Job spec shared by one-shot jobs and cron job templates.
fn child_job_spec(
    ctx: &ContextConfig,
    kind: TaskKind,
    target_namespace: &str,
    settings: &TaskSettings,
) -> JobSpec {
    JobSpec {
        active_deadline_seconds: Some(
            settings
                .deadline
                .map_or(CHILD_JOB_DEADLINE_SECS, |d| d.as_secs() as i64),
        ),
        backoff_limit: Some(settings.backoff_limit.unwrap_or(CHILD_JOB_BACKOFF_LIMIT)),
        template: child_pod_template(ctx, kind, target_namespace),
        ..Default::default()
    }
}

/// Render a one-shot `Job` for an unscheduled task.
#[must_use]
pub fn build_job(
    ctx: &ContextConfig,
    kind: TaskKind,
    target_namespace: &str,
    settings: &TaskSettings,
) -> Job {
    Job {
        metadata: child_metadata(ctx, kind, target_namespace),
        spec: Some(child_job_spec(ctx, kind, target_namespace, settings)),
        ..Default::default()
    }
}

/// Render a `CronJob` for a scheduled task.
///
/// Job specs are immutable, so drift against the live object is resolved by
/// delete-and-recreate, never an in-place patch.
#[must_use]
pub fn build_cron_job(
    ctx: &ContextConfig,
    kind: TaskKind,
    target_namespace: &str,
    settings: &TaskSettings,
    schedule: &str,
) -> CronJob {
    CronJob {
        metadata: child_metadata(ctx, kind, target_namespace),
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            concurrency_policy: Some(
                settings
                    .concurrency_policy
                    .clone()
                    .unwrap_or_else(|| "Forbid".to_string()),
            ),
            successful_jobs_history_limit: Some(SUCCESSFUL_JOBS_HISTORY_LIMIT),
            failed_jobs_history_limit: Some(FAILED_JOBS_HISTORY_LIMIT),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: Some(
                        [
                            (annotations::ACTION.to_string(), kind.to_string()),
                            (
                                annotations::NAMESPACE.to_string(),
                                target_namespace.to_string(),
                            ),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    ..Default::default()
                }),
                spec: Some(child_job_spec(ctx, kind, target_namespace, settings)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tasks_tests;
