// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The action controller.
//!
//! One pass: list matched namespaces, enqueue deletion for those whose status
//! is `failed` or `stale` or whose TTL has expired, drive pending owner
//! notifications, and garbage-collect finished collector jobs past their
//! history limits.
//!
//! Deletion is a confirm-and-retry flow across passes: the namespace is first
//! annotated `terminating` and deleted in the foreground; when it still exists
//! after the delete timeout the delete is re-issued once, and a second timeout
//! is recorded as a delete-stuck annotation and metric without terminating the
//! controller.

use crate::annotations;
use crate::config::{Config, MatchRule};
use crate::constants::{
    CONTROLLER_ACTION, DELETE_TIMEOUT, FAILED_JOBS_HISTORY_LIMIT, FOLLOWER_POLL_INTERVAL,
    MAX_PASS_INTERVAL, SUCCESSFUL_JOBS_HISTORY_LIMIT,
};
use crate::controllers::{finish_pass, PassOutcome};
use crate::kubernetes::{job_finished_at, job_is_finished, KubeGateway};
use crate::leader::LeaderArbiter;
use crate::metrics;
use crate::namespace::{format_rfc3339, parse_rfc3339, ManagedNamespace, NamespaceStatus};
use crate::notifier::{Notifier, NotifyOutcome};
use crate::tasks::TaskKind;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a namespace is being deleted, for logs and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeleteReason {
    Stale,
    Failed,
    Ttl,
}

impl DeleteReason {
    fn as_str(self) -> &'static str {
        match self {
            DeleteReason::Stale => "stale",
            DeleteReason::Failed => "failed",
            DeleteReason::Ttl => "ttl",
        }
    }
}

/// Enforces TTL and terminal-status deletion, and drives notifications.
pub struct ActionController {
    config: Arc<Config>,
    gateway: KubeGateway,
    notifier: Arc<Notifier>,
    arbiter: Arc<LeaderArbiter>,
}

impl ActionController {
    /// Bind the controller to its gateways.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        gateway: KubeGateway,
        notifier: Arc<Notifier>,
        arbiter: Arc<LeaderArbiter>,
    ) -> Self {
        ActionController {
            config,
            gateway,
            notifier,
            arbiter,
        }
    }

    /// Drive the pass loop until `shutdown` resolves. Passes only run while
    /// this replica holds leadership.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting action controller");

        loop {
            if !self.arbiter.is_leader() {
                tokio::select! {
                    _ = tokio::time::sleep(FOLLOWER_POLL_INTERVAL) => continue,
                    _ = shutdown.changed() => return,
                }
            }

            let started = Instant::now();
            let outcome = self.pass().await;
            finish_pass(CONTROLLER_ACTION, started, outcome);

            tokio::select! {
                _ = tokio::time::sleep(MAX_PASS_INTERVAL) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One pass over all matched namespaces.
    async fn pass(&self) -> PassOutcome {
        let snapshot = match self.gateway.list_namespaces().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Failed to list namespaces, skipping pass");
                return PassOutcome::Error;
            }
        };

        for ns in snapshot
            .items
            .iter()
            .filter_map(ManagedNamespace::from_kube)
        {
            if self.arbiter.check().is_err() {
                warn!("Lost leadership mid-pass, aborting");
                return PassOutcome::Aborted;
            }

            let Some(rule) = self.config.match_rule(&ns.name) else {
                continue;
            };

            // Per-namespace failures never abort the pass.
            if let Err(err) = self.process_namespace(&ns, rule).await {
                warn!(namespace = %ns.name, error = %err, "Failed to process namespace");
            }
        }

        if let Err(err) = self.prune_finished_jobs().await {
            warn!(error = %err, "Failed to prune finished collector jobs");
        }

        PassOutcome::Success
    }

    /// Notifications first, then the deletion decision, for one namespace.
    async fn process_namespace(
        &self,
        ns: &ManagedNamespace,
        rule: &MatchRule,
    ) -> anyhow::Result<()> {
        let now = Utc::now();

        self.dispatch_notification(ns).await?;

        if ns.is_terminating() {
            return self.confirm_deletion(ns, now).await;
        }

        if let Some(reason) = delete_reason(ns, rule, now) {
            self.delete_namespace(ns, reason, now).await?;
        }

        Ok(())
    }

    /// Deliver the pending notification for the namespace's current status,
    /// recording the dedup annotation after a successful send.
    async fn dispatch_notification(&self, ns: &ManagedNamespace) -> anyhow::Result<()> {
        let Some(status) = ns.status else {
            return Ok(());
        };

        if !matches!(
            status,
            NamespaceStatus::Failing | NamespaceStatus::Failed | NamespaceStatus::Stale
        ) || ns.notified_for.contains(&status)
        {
            return Ok(());
        }

        if self.notifier.notify(ns, status).await == NotifyOutcome::Sent {
            let mut notified = ns.notified_for.clone();
            notified.insert(status);
            let encoded: Vec<&str> = notified.iter().map(|s| s.as_str()).collect();

            let mut patch = BTreeMap::new();
            patch.insert(
                annotations::NOTIFIED_FOR.to_string(),
                serde_json::to_string(&encoded)?,
            );
            self.gateway.annotate_namespace(&ns.name, &patch).await?;
        }

        Ok(())
    }

    /// Annotate `terminating` and issue the foreground delete.
    async fn delete_namespace(
        &self,
        ns: &ManagedNamespace,
        reason: DeleteReason,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        info!(namespace = %ns.name, reason = reason.as_str(), "Deleting namespace");

        let mut patch = BTreeMap::new();
        patch.insert(
            annotations::STATUS.to_string(),
            NamespaceStatus::Terminating.to_string(),
        );
        patch.insert(annotations::STATUS_SINCE.to_string(), format_rfc3339(now));

        match self.gateway.annotate_namespace(&ns.name, &patch).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        match self.gateway.delete_namespace(&ns.name).await {
            Ok(()) => {
                metrics::record_namespace_deleted(reason.as_str());
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Confirm a delete issued on an earlier pass; re-issue once on timeout,
    /// then record the namespace as delete-stuck.
    async fn confirm_deletion(&self, ns: &ManagedNamespace, now: DateTime<Utc>) -> anyhow::Result<()> {
        if ns.annotations.contains_key(annotations::DELETE_STUCK) {
            return Ok(());
        }

        let issued_at = ns.status_since.unwrap_or(ns.created_at);
        let reissued_at = ns
            .annotations
            .get(annotations::DELETE_REISSUED_AT)
            .and_then(|v| parse_rfc3339(v));

        match reissued_at {
            None => {
                if (now - issued_at).to_std().unwrap_or_default() > DELETE_TIMEOUT {
                    warn!(
                        namespace = %ns.name,
                        "Namespace delete did not confirm in time, re-issuing"
                    );

                    let mut patch = BTreeMap::new();
                    patch.insert(
                        annotations::DELETE_REISSUED_AT.to_string(),
                        format_rfc3339(now),
                    );
                    self.gateway.annotate_namespace(&ns.name, &patch).await?;

                    match self.gateway.delete_namespace(&ns.name).await {
                        Ok(()) | Err(crate::kubernetes::GatewayError::NotFound { .. }) => {}
                        Err(err) => return Err(err.into()),
                    }
                } else {
                    debug!(namespace = %ns.name, "Namespace is still terminating");
                }
            }
            Some(reissued) => {
                if (now - reissued).to_std().unwrap_or_default() > DELETE_TIMEOUT {
                    warn!(
                        namespace = %ns.name,
                        "Namespace delete failed to confirm twice, marking delete-stuck"
                    );

                    let mut patch = BTreeMap::new();
                    patch.insert(annotations::DELETE_STUCK.to_string(), format_rfc3339(now));
                    self.gateway.annotate_namespace(&ns.name, &patch).await?;
                    metrics::record_delete_stuck(&ns.name);
                }
            }
        }

        Ok(())
    }

    /// Prune finished owner-lookup and check-namespace jobs beyond their
    /// history limits, newest kept first.
    async fn prune_finished_jobs(&self) -> anyhow::Result<()> {
        let jobs = self.gateway.list_child_jobs(None).await?;

        let mut finished: BTreeMap<(String, String, bool), Vec<&Job>> = BTreeMap::new();
        for job in &jobs {
            if !job_is_finished(job) {
                continue;
            }

            let job_annotations = job.annotations();
            let Some(action) = job_annotations
                .get(annotations::ACTION)
                .and_then(|a| TaskKind::parse(a))
            else {
                continue;
            };
            if !matches!(action, TaskKind::CheckNamespace | TaskKind::GetOwnerInfo) {
                continue;
            }

            let target = job_annotations
                .get(annotations::NAMESPACE)
                .cloned()
                .unwrap_or_default();
            let succeeded = job
                .status
                .as_ref()
                .and_then(|status| status.succeeded)
                .unwrap_or(0)
                > 0;

            finished
                .entry((action.to_string(), target, succeeded))
                .or_default()
                .push(job);
        }

        for ((action, _, succeeded), mut group) in finished {
            let limit = usize::try_from(if succeeded {
                SUCCESSFUL_JOBS_HISTORY_LIMIT
            } else {
                FAILED_JOBS_HISTORY_LIMIT
            })
            .unwrap_or(0);

            group.sort_by_key(|job| std::cmp::Reverse(job_finished_at(job)));
            for job in group.iter().skip(limit) {
                debug!(job = %job.name_any(), action = %action, "Pruning finished collector job");
                self.gateway.delete_job(&job.name_any()).await?;
                metrics::record_child_job(&action, "deleted");
            }
        }

        Ok(())
    }
}

/// Decide whether a namespace is due for deletion, and why.
///
/// `stale` outranks `failed`; TTL overrun deletes regardless of the persisted
/// status because eviction is unconditional.
fn delete_reason(
    ns: &ManagedNamespace,
    rule: &MatchRule,
    now: DateTime<Utc>,
) -> Option<DeleteReason> {
    match ns.status {
        Some(NamespaceStatus::Stale) => Some(DeleteReason::Stale),
        _ if ns.age(now) > rule.ttl => Some(DeleteReason::Ttl),
        Some(NamespaceStatus::Failed) => Some(DeleteReason::Failed),
        _ => None,
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod action_tests;
