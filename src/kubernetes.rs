// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed gateway over the Kubernetes API.
//!
//! Wraps the namespace, workload, event, job and cronjob operations both
//! controllers need, and owns the retry discipline:
//!
//! - transient errors (5xx, connection resets, timeouts) retry with jittered
//!   exponential backoff up to 30 seconds total
//! - optimistic-concurrency conflicts retry up to 3 times with a fixed
//!   backoff schedule, then surface as [`GatewayError::Conflict`]
//! - `NotFound` is never retried
//!
//! Reads run under a 10 second timeout, writes under 15 seconds.

use crate::annotations;
use crate::classifier::{
    DeploymentObservation, PodObservation, ReplicaSetObservation, StatefulSetObservation,
    WorkloadSnapshot,
};
use crate::constants::{
    CONFLICT_BACKOFF, FIELD_MANAGER, KUBE_READ_TIMEOUT, KUBE_WRITE_TIMEOUT,
    TRANSIENT_BACKOFF_INITIAL, TRANSIENT_BACKOFF_TOTAL,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use rand::Rng;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Errors
// ============================================================================

/// Gateway failure modes, aligned with the retry discipline above.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The object does not exist; never retried.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Optimistic-concurrency conflict that survived the retry budget.
    #[error("conflict writing {kind} '{name}' after retries")]
    Conflict { kind: &'static str, name: String },

    /// Transient API failure that survived the backoff budget.
    #[error("transient Kubernetes API error: {0}")]
    Transient(String),

    /// Non-retryable API error.
    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),
}

impl GatewayError {
    /// True for errors that mean "the object is gone", which is not an error
    /// at the namespace level.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }
}

/// Gateway result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Map a raw client error onto the gateway error kinds.
fn classify_error(err: kube::Error, kind: &'static str, name: &str) -> GatewayError {
    let code = match &err {
        kube::Error::Api(response) => Some(response.code),
        // Everything below the HTTP status layer is connection-shaped.
        _ => None,
    };

    match code {
        Some(404) => GatewayError::NotFound {
            kind,
            name: name.to_string(),
        },
        Some(409) => GatewayError::Conflict {
            kind,
            name: name.to_string(),
        },
        Some(429 | 500..=599) | None => GatewayError::Transient(err.to_string()),
        Some(_) => GatewayError::Api(err),
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// A list read plus the resource version it was taken at, so callers can
/// detect stale snapshots.
#[derive(Clone, Debug)]
pub struct ListSnapshot<T> {
    /// Listed objects
    pub items: Vec<T>,
    /// Monotonic resource version hint from the list response
    pub resource_version: Option<String>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Typed wrapper over the Kubernetes API used by both controllers and the
/// collector binary.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    own_namespace: String,
}

impl KubeGateway {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Client, own_namespace: &str) -> Self {
        KubeGateway {
            client,
            own_namespace: own_namespace.to_string(),
        }
    }

    /// Connect using the in-cluster or kubeconfig default.
    ///
    /// # Errors
    ///
    /// Returns an error when no client configuration can be inferred.
    pub async fn connect(own_namespace: &str) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, own_namespace))
    }

    /// The namespace the controller itself (and its children) run in.
    #[must_use]
    pub fn own_namespace(&self) -> &str {
        &self.own_namespace
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// List all namespaces in the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error when the list fails after retries.
    pub async fn list_namespaces(&self) -> Result<ListSnapshot<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = self
            .with_retries("list namespaces", "Namespace", "", KUBE_READ_TIMEOUT, || {
                let api = api.clone();
                async move { api.list(&ListParams::default()).await }
            })
            .await?;

        Ok(ListSnapshot {
            resource_version: list.metadata.resource_version,
            items: list.items,
        })
    }

    /// Fetch one namespace; `Ok(None)` when it was deleted externally.
    ///
    /// # Errors
    ///
    /// Returns an error when the read fails after retries.
    pub async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let result = self
            .with_retries("get namespace", "Namespace", name, KUBE_READ_TIMEOUT, || {
                let api = api.clone();
                let name = name.to_string();
                async move { api.get(&name).await }
            })
            .await;

        match result {
            Ok(ns) => Ok(Some(ns)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Merge the given annotations onto a namespace.
    ///
    /// Structured values must already be serialized as compact JSON strings.
    /// Writes are JSON merge patches; a conflict is re-read and retried up to
    /// 3 times before surfacing.
    ///
    /// # Errors
    ///
    /// Returns an error when the patch fails after retries.
    pub async fn annotate_namespace(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "annotations": annotations } });

        let mut attempt = 0;
        loop {
            let result = self
                .with_retries(
                    "annotate namespace",
                    "Namespace",
                    name,
                    KUBE_WRITE_TIMEOUT,
                    || {
                        let api = api.clone();
                        let name = name.to_string();
                        let patch = patch.clone();
                        async move {
                            api.patch(
                                &name,
                                &PatchParams::apply(FIELD_MANAGER),
                                &Patch::Merge(&patch),
                            )
                            .await
                        }
                    },
                )
                .await;

            match result {
                Ok(_) => return Ok(()),
                // A fourth conflict surfaces to the caller.
                Err(GatewayError::Conflict { .. }) if attempt < CONFLICT_BACKOFF.len() => {
                    debug!(
                        namespace = name,
                        attempt, "Annotation write conflicted, re-reading"
                    );
                    tokio::time::sleep(CONFLICT_BACKOFF[attempt]).await;
                    // Re-read so the next merge patch applies to the latest
                    // object generation.
                    let _ = self.get_namespace(name).await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Delete a namespace with foreground propagation.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails after retries; `NotFound` means
    /// the namespace is already gone and is surfaced for the caller to drop.
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.with_retries(
            "delete namespace",
            "Namespace",
            name,
            KUBE_WRITE_TIMEOUT,
            || {
                let api = api.clone();
                let name = name.to_string();
                async move { api.delete(&name, &DeleteParams::foreground()).await }
            },
        )
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Workload Observations
    // ------------------------------------------------------------------

    /// Snapshot the workload state of one namespace for the classifier
    /// fallback path.
    ///
    /// # Errors
    ///
    /// Returns an error when any of the four list reads fails after retries.
    pub async fn workload_snapshot(&self, namespace: &str) -> Result<WorkloadSnapshot> {
        let deployments = self.list_deployments(namespace).await?;
        let statefulsets = self.list_statefulsets(namespace).await?;
        let replicasets = self.list_replicasets(namespace).await?;
        let pods = self.list_pods(namespace).await?;

        Ok(WorkloadSnapshot {
            deployments,
            statefulsets,
            replicasets,
            pods,
        })
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentObservation>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .with_retries(
                "list deployments",
                "Deployment",
                namespace,
                KUBE_READ_TIMEOUT,
                || {
                    let api = api.clone();
                    async move { api.list(&ListParams::default()).await }
                },
            )
            .await?;

        Ok(list
            .items
            .iter()
            .filter_map(|deployment| {
                Some(DeploymentObservation {
                    name: deployment.metadata.name.clone()?,
                    created_at: creation_time(&deployment.metadata)?,
                    unavailable_replicas: deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.unavailable_replicas)
                        .unwrap_or(0),
                })
            })
            .collect())
    }

    async fn list_statefulsets(&self, namespace: &str) -> Result<Vec<StatefulSetObservation>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .with_retries(
                "list statefulsets",
                "StatefulSet",
                namespace,
                KUBE_READ_TIMEOUT,
                || {
                    let api = api.clone();
                    async move { api.list(&ListParams::default()).await }
                },
            )
            .await?;

        Ok(list
            .items
            .iter()
            .filter_map(|statefulset| {
                Some(StatefulSetObservation {
                    name: statefulset.metadata.name.clone()?,
                    created_at: creation_time(&statefulset.metadata)?,
                    replicas: statefulset
                        .spec
                        .as_ref()
                        .and_then(|s| s.replicas)
                        .unwrap_or(1),
                    ready_replicas: statefulset
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0),
                })
            })
            .collect())
    }

    async fn list_replicasets(&self, namespace: &str) -> Result<Vec<ReplicaSetObservation>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .with_retries(
                "list replicasets",
                "ReplicaSet",
                namespace,
                KUBE_READ_TIMEOUT,
                || {
                    let api = api.clone();
                    async move { api.list(&ListParams::default()).await }
                },
            )
            .await?;

        Ok(list
            .items
            .iter()
            .filter_map(|replicaset| {
                let owner_deployment = replicaset
                    .metadata
                    .owner_references
                    .as_ref()
                    .and_then(|owners| {
                        owners
                            .iter()
                            .find(|owner| owner.kind == "Deployment")
                            .map(|owner| owner.name.clone())
                    });

                Some(ReplicaSetObservation {
                    name: replicaset.metadata.name.clone()?,
                    created_at: creation_time(&replicaset.metadata)?,
                    owner_deployment,
                    desired: replicaset
                        .spec
                        .as_ref()
                        .and_then(|s| s.replicas)
                        .unwrap_or(0),
                })
            })
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .with_retries("list pods", "Pod", namespace, KUBE_READ_TIMEOUT, || {
                let api = api.clone();
                async move { api.list(&ListParams::default()).await }
            })
            .await?;

        Ok(list
            .items
            .iter()
            .filter_map(|pod| {
                let status = pod.status.as_ref();
                let waiting_reason = status
                    .and_then(|s| s.container_statuses.as_ref())
                    .and_then(|containers| {
                        containers.iter().find_map(|container| {
                            container
                                .state
                                .as_ref()
                                .and_then(|state| state.waiting.as_ref())
                                .and_then(|waiting| waiting.reason.clone())
                        })
                    });
                let owner_replicaset = pod.metadata.owner_references.as_ref().and_then(|owners| {
                    owners
                        .iter()
                        .find(|owner| owner.kind == "ReplicaSet")
                        .map(|owner| owner.name.clone())
                });
                let started_at = status
                    .and_then(|s| s.start_time.as_ref())
                    .map(|t| t.0)
                    .or_else(|| creation_time(&pod.metadata))?;

                Some(PodObservation {
                    name: pod.metadata.name.clone()?,
                    phase: status
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    waiting_reason,
                    owner_replicaset,
                    started_at,
                })
            })
            .collect())
    }

    /// List warning events in a namespace, most recent last.
    ///
    /// # Errors
    ///
    /// Returns an error when the list fails after retries.
    pub async fn list_warning_events(&self, namespace: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields("type=Warning");
        let list = self
            .with_retries("list events", "Event", namespace, KUBE_READ_TIMEOUT, || {
                let api = api.clone();
                let params = params.clone();
                async move { api.list(&params).await }
            })
            .await?;

        Ok(list.items)
    }

    // ------------------------------------------------------------------
    // Child Jobs
    // ------------------------------------------------------------------

    /// List all child cron jobs in the controller namespace, optionally
    /// restricted to one target namespace.
    ///
    /// # Errors
    ///
    /// Returns an error when the list fails after retries.
    pub async fn list_child_cron_jobs(&self, target: Option<&str>) -> Result<Vec<CronJob>> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let params = child_list_params(target);
        let list = self
            .with_retries(
                "list cronjobs",
                "CronJob",
                &self.own_namespace,
                KUBE_READ_TIMEOUT,
                || {
                    let api = api.clone();
                    let params = params.clone();
                    async move { api.list(&params).await }
                },
            )
            .await?;

        Ok(list.items)
    }

    /// List all child jobs in the controller namespace, optionally restricted
    /// to one target namespace.
    ///
    /// # Errors
    ///
    /// Returns an error when the list fails after retries.
    pub async fn list_child_jobs(&self, target: Option<&str>) -> Result<Vec<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let params = child_list_params(target);
        let list = self
            .with_retries(
                "list jobs",
                "Job",
                &self.own_namespace,
                KUBE_READ_TIMEOUT,
                || {
                    let api = api.clone();
                    let params = params.clone();
                    async move { api.list(&params).await }
                },
            )
            .await?;

        Ok(list.items)
    }

    /// Create a child cron job.
    ///
    /// # Errors
    ///
    /// Returns an error when the create fails after retries.
    pub async fn create_cron_job(&self, cron_job: &CronJob) -> Result<()> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let name = cron_job.name_any();
        self.with_retries("create cronjob", "CronJob", &name, KUBE_WRITE_TIMEOUT, || {
            let api = api.clone();
            let cron_job = cron_job.clone();
            async move { api.create(&PostParams::default(), &cron_job).await }
        })
        .await?;

        Ok(())
    }

    /// Delete a child cron job; already-gone objects are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails after retries.
    pub async fn delete_cron_job(&self, name: &str) -> Result<()> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let result = self
            .with_retries("delete cronjob", "CronJob", name, KUBE_WRITE_TIMEOUT, || {
                let api = api.clone();
                let name = name.to_string();
                async move { api.delete(&name, &DeleteParams::background()).await }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Create a one-shot child job.
    ///
    /// # Errors
    ///
    /// Returns an error when the create fails after retries.
    pub async fn create_job(&self, job: &Job) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let name = job.name_any();
        self.with_retries("create job", "Job", &name, KUBE_WRITE_TIMEOUT, || {
            let api = api.clone();
            let job = job.clone();
            async move { api.create(&PostParams::default(), &job).await }
        })
        .await?;

        Ok(())
    }

    /// Delete a child job; already-gone objects are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails after retries.
    pub async fn delete_job(&self, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &self.own_namespace);
        let result = self
            .with_retries("delete job", "Job", name, KUBE_WRITE_TIMEOUT, || {
                let api = api.clone();
                let name = name.to_string();
                async move { api.delete(&name, &DeleteParams::background()).await }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------
    // Retry Engine
    // ------------------------------------------------------------------

    async fn with_retries<T, F, Fut>(
        &self,
        op: &'static str,
        kind: &'static str,
        name: &str,
        per_call_timeout: Duration,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, kube::Error>>,
    {
        let mut elapsed = Duration::ZERO;
        let mut backoff = TRANSIENT_BACKOFF_INITIAL;

        loop {
            let attempt = tokio::time::timeout(per_call_timeout, call()).await;
            let result = match attempt {
                Ok(inner) => inner.map_err(|err| classify_error(err, kind, name)),
                Err(_) => Err(GatewayError::Transient(format!("{op} timed out"))),
            };

            match result {
                Err(GatewayError::Transient(reason)) if elapsed < TRANSIENT_BACKOFF_TOTAL => {
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    let delay = backoff + jitter;
                    warn!(
                        operation = op,
                        object = name,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "Transient Kubernetes error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    elapsed += delay;
                    backoff = (backoff * 2).min(Duration::from_secs(8));
                }
                other => return other,
            }
        }
    }
}

/// Label selector for child workloads, optionally narrowed to one target
/// namespace.
fn child_list_params(target: Option<&str>) -> ListParams {
    let selector = match target {
        Some(namespace) => format!(
            "{}={},{}={namespace}",
            annotations::MANAGED_BY_LABEL,
            annotations::MANAGED_BY_VALUE,
            annotations::MANAGED_NAMESPACE_LABEL,
        ),
        None => format!(
            "{}={}",
            annotations::MANAGED_BY_LABEL,
            annotations::MANAGED_BY_VALUE
        ),
    };

    ListParams::default().labels(&selector)
}

/// Creation timestamp of an object, if persisted.
fn creation_time(
    metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) -> Option<DateTime<Utc>> {
    metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// True when a job reached a terminal condition.
#[must_use]
pub fn job_is_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions.iter().any(|condition| {
                (condition.type_ == "Complete" || condition.type_ == "Failed")
                    && condition.status == "True"
            })
        })
}

/// When a finished job completed (or failed), from its status.
#[must_use]
pub fn job_finished_at(job: &Job) -> Option<DateTime<Utc>> {
    let status = job.status.as_ref()?;
    status
        .completion_time
        .as_ref()
        .map(|t| t.0)
        .or_else(|| {
            status
                .conditions
                .as_ref()?
                .iter()
                .find(|condition| condition.type_ == "Failed" && condition.status == "True")
                .and_then(|condition| condition.last_transition_time.as_ref())
                .map(|t| t.0)
        })
}
