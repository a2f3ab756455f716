// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Collector entrypoint executed by the child jobs the controllers render.
//!
//! The action and target are taken from the environment (`COLLECTOR_ACTION`,
//! `COLLECTOR_NAMESPACE`) as stamped into the job template, along with the
//! usual `CONFIG_PATH`.

use anyhow::{bail, Context, Result};
use namespace_manager::{
    annotations,
    config::Config,
    constants::{EXIT_CONFIGURATION, EXIT_OK, EXIT_RUNTIME},
    kubernetes::KubeGateway,
    namespace::{ManagedNamespace, OwnerAddress},
    people::PeopleClient,
    tasks::TaskKind,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

fn main() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {err}");
            std::process::exit(EXIT_RUNTIME);
        }
    };

    std::process::exit(runtime.block_on(run()));
}

async fn run() -> i32 {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();

    let (action, target) = match collector_env() {
        Ok(parts) => parts,
        Err(err) => {
            warn!("Collector misconfigured: {err:#}");
            return EXIT_CONFIGURATION;
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!("Configuration error: {err:#}");
            return EXIT_CONFIGURATION;
        }
    };

    match collect(action, &target, &config).await {
        Ok(()) => EXIT_OK,
        Err(err) => {
            warn!(action = %action, namespace = %target, "Collector failed: {err:#}");
            EXIT_RUNTIME
        }
    }
}

/// Read and validate the collector environment.
fn collector_env() -> Result<(TaskKind, String)> {
    let action_raw =
        std::env::var("COLLECTOR_ACTION").context("COLLECTOR_ACTION environment variable is not set")?;
    let action = TaskKind::parse(&action_raw)
        .with_context(|| format!("Unknown collector action '{action_raw}'"))?;
    let target = std::env::var("COLLECTOR_NAMESPACE")
        .context("COLLECTOR_NAMESPACE environment variable is not set")?;

    Ok((action, target))
}

/// Dispatch the requested action.
async fn collect(action: TaskKind, target: &str, config: &Config) -> Result<()> {
    let gateway = KubeGateway::connect(&config.context.namespace).await?;

    match action {
        TaskKind::CheckNamespace => check_namespace(&gateway, target).await,
        TaskKind::GetOwnerInfo => get_owner_info(&gateway, target, config).await,
        TaskKind::DeleteNamespace => {
            info!(namespace = target, "Deleting namespace");
            match gateway.delete_namespace(target).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
        TaskKind::Notify => {
            // Notifications need the transition context held by the action
            // controller; a standalone notify child has nothing to send.
            bail!("The notify action runs inside the action controller")
        }
    }
}

/// Probe the target namespace from inside the cluster.
///
/// When the namespace is gone the collector garbage-collects its own
/// cronjobs; otherwise it logs the workload state and recent warning events
/// for operators chasing a failure.
async fn check_namespace(gateway: &KubeGateway, target: &str) -> Result<()> {
    let Some(_) = gateway.get_namespace(target).await? else {
        warn!(
            namespace = target,
            "Namespace does not exist, deleting its collector cronjobs"
        );
        for cron_job in gateway.list_child_cron_jobs(Some(target)).await? {
            if let Some(name) = &cron_job.metadata.name {
                gateway.delete_cron_job(name).await?;
            }
        }
        return Ok(());
    };

    let workloads = gateway.workload_snapshot(target).await?;
    info!(
        namespace = target,
        deployments = workloads.deployments.len(),
        statefulsets = workloads.statefulsets.len(),
        pods = workloads.pods.len(),
        "Namespace workload snapshot"
    );

    for event in gateway.list_warning_events(target).await? {
        info!(
            namespace = target,
            reason = event.reason.as_deref().unwrap_or("unknown"),
            object = event
                .involved_object
                .name
                .as_deref()
                .unwrap_or("unknown"),
            message = event.message.as_deref().unwrap_or(""),
            "Warning event"
        );
    }

    Ok(())
}

/// Resolve the namespace owner through the people API and persist the owner
/// annotation.
async fn get_owner_info(gateway: &KubeGateway, target: &str, config: &Config) -> Result<()> {
    let Some(ns) = gateway.get_namespace(target).await? else {
        warn!(namespace = target, "Namespace does not exist, nothing to resolve");
        return Ok(());
    };
    let Some(view) = ManagedNamespace::from_kube(&ns) else {
        bail!("Namespace object is missing metadata");
    };

    if view.owner.is_some() {
        info!(namespace = target, "Owner already resolved, skipping lookup");
        return Ok(());
    }

    let Some(author) = view.cicd_author() else {
        info!(namespace = target, "Namespace carries no CI author annotation");
        return Ok(());
    };

    let people = PeopleClient::new(&config.people_api)?;
    if !people.is_configured() {
        bail!("People API is not configured");
    }

    let Some(user) = people.get_user_by_gitlab_handle(author).await? else {
        warn!(namespace = target, author, "People API found no owner");
        return Ok(());
    };

    let address = OwnerAddress {
        name: user.name,
        slack_id: user.slack_id,
    };
    let mut patch = BTreeMap::new();
    patch.insert(annotations::OWNER.to_string(), address.encode());
    gateway.annotate_namespace(target, &patch).await?;

    info!(namespace = target, owner = %address.name, "Owner resolved");
    Ok(())
}
