// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Configuration loading and validation.
//!
//! The configuration is a single YAML document loaded from `$CONFIG_PATH`. It
//! is immutable after boot; every component receives the parts it needs by
//! value. Validation failures are fatal and surface as exit code 1.

use crate::constants::{
    DEFAULT_GRACE_PERIOD, DEFAULT_LEASE_TTL, DEFAULT_SETTLING_PERIOD, DEFAULT_TTL,
};
use crate::namespace::{glob_to_regex, is_forbidden};
use crate::scheduler::parse_cron;
use crate::tasks::TaskKind;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Process-wide configuration, immutable after boot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Leader election settings
    #[serde(default)]
    pub leader_election: LeaderElectionConfig,

    /// Metrics exposition settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Namespace match rules, tried in declaration order
    #[serde(default)]
    pub namespaces: Vec<MatchRule>,

    /// Notification egress settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// People API endpoint used for owner lookup
    #[serde(default)]
    pub people_api: PeopleApiConfig,

    /// Execution context for rendered child workloads
    #[serde(default)]
    pub context: ContextConfig,

    /// Prometheus query endpoint; when unset the classifier always uses the
    /// Kubernetes workload fallback
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

impl Config {
    /// Load and validate the configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is not valid YAML, or
    /// fails validation (invalid globs, invalid cron expressions).
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file '{path}'"))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse configuration file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from the path in `$CONFIG_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error when the variable is unset or [`Config::load`] fails.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").context("CONFIG_PATH environment variable is not set")?;
        Self::load(&path)
    }

    /// Compile globs, verify cron expressions and warn about overlapping
    /// rules.
    ///
    /// # Errors
    ///
    /// Returns an error on the first invalid glob or cron expression.
    pub fn validate(&mut self) -> Result<()> {
        let mut seen_globs: HashSet<String> = HashSet::new();

        for (index, rule) in self.namespaces.iter_mut().enumerate() {
            if rule.name_globs.is_empty() {
                bail!("Match rule #{index} has no name_globs");
            }

            rule.compiled = rule
                .name_globs
                .iter()
                .map(|glob| glob_to_regex(glob))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Match rule #{index} has an invalid glob"))?;

            for glob in &rule.name_globs {
                if !seen_globs.insert(glob.clone()) {
                    // First match wins, so a repeated glob shadows this rule.
                    warn!(
                        rule = index,
                        glob = %glob,
                        "Match rule overlaps an earlier rule; earlier rule wins"
                    );
                }
            }

            for (kind, task) in &rule.tasks {
                if let Some(schedule) = &task.schedule {
                    parse_cron(schedule).with_context(|| {
                        format!("Match rule #{index} task '{kind}' has an invalid schedule")
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Find the first rule matching a namespace name, in declaration order.
    ///
    /// Forbidden namespaces never match.
    #[must_use]
    pub fn match_rule(&self, name: &str) -> Option<&MatchRule> {
        if is_forbidden(name) {
            return None;
        }

        self.namespaces
            .iter()
            .find(|rule| rule.compiled.iter().any(|regex| regex.is_match(name)))
    }
}

// ============================================================================
// Leader Election
// ============================================================================

/// Leader election settings; the lease lives on a shared volume.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaderElectionConfig {
    /// When false a single replica runs un-gated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the lease file
    #[serde(default = "default_lease_path")]
    pub path: PathBuf,

    /// Lease time-to-live
    #[serde(with = "crate::duration::serde_str", default = "default_lease_ttl")]
    pub lease_ttl: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        LeaderElectionConfig {
            enabled: true,
            path: default_lease_path(),
            lease_ttl: default_lease_ttl(),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Metrics exposition settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve the Prometheus registry over HTTP
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Optional path for a shared on-disk registry
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            registry_path: None,
        }
    }
}

// ============================================================================
// Match Rules
// ============================================================================

/// Binds a set of namespaces (by name glob) to lifecycle parameters and task
/// schedules. The first rule whose glob set matches a namespace wins.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchRule {
    /// Name globs; `*`, `?` and `[...]` are supported
    pub name_globs: Vec<String>,

    /// Maximum namespace lifetime before it is classified stale
    #[serde(with = "crate::duration::serde_str", default = "default_ttl")]
    pub ttl: Duration,

    /// Post-creation window exempt from failure classification
    #[serde(
        with = "crate::duration::serde_str",
        default = "default_settling_period"
    )]
    pub settling_period: Duration,

    /// Continuous-failure dwell required before `failing` becomes `failed`
    #[serde(with = "crate::duration::serde_str", default = "default_grace_period")]
    pub grace_period: Duration,

    /// Task schedules per task kind
    #[serde(default)]
    pub tasks: BTreeMap<TaskKind, TaskSettings>,

    /// Compiled globs, populated by [`Config::validate`]
    #[serde(skip)]
    pub compiled: Vec<Regex>,
}

/// Per-task scheduling parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    /// Five-field cron expression; absent means a one-shot job
    #[serde(default)]
    pub schedule: Option<String>,

    /// Kubernetes `CronJob` concurrency policy (defaults to `Forbid`)
    #[serde(default)]
    pub concurrency_policy: Option<String>,

    /// Active deadline for rendered jobs
    #[serde(with = "crate::duration::serde_opt_str", default)]
    pub deadline: Option<Duration>,

    /// Retry budget for rendered jobs
    #[serde(default)]
    pub backoff_limit: Option<i32>,
}

// ============================================================================
// Notifier, People API, Prometheus
// ============================================================================

/// Notification egress settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    /// Chat webhook token; notifications are skipped when unset
    #[serde(default)]
    pub token: Option<String>,
}

/// People API endpoint used to resolve namespace owners.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeopleApiConfig {
    /// Base URL of the people API
    #[serde(default)]
    pub url: Option<String>,

    /// PEM bundle for a private CA
    #[serde(default)]
    pub ca: Option<String>,

    /// Skip TLS verification
    #[serde(default)]
    pub insecure: bool,
}

/// Prometheus query endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus HTTP API
    #[serde(default)]
    pub url: Option<String>,
}

// ============================================================================
// Child Workload Context
// ============================================================================

/// Execution context for rendered child workloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Namespace the controller (and its children) run in
    #[serde(default = "default_context_namespace")]
    pub namespace: String,

    /// Service account mounted into child pods
    #[serde(default = "default_service_account")]
    pub service_account: String,

    /// Secret holding the configuration file for child pods
    #[serde(default = "default_config_secret")]
    pub config_secret: String,

    /// Path the configuration is mounted at inside child pods
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Collector image for child pods
    #[serde(default)]
    pub image: String,

    /// Extra labels stamped onto rendered children
    #[serde(rename = "matchLabels", default)]
    pub match_labels: BTreeMap<String, String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            namespace: default_context_namespace(),
            service_account: default_service_account(),
            config_secret: default_config_secret(),
            config_path: default_config_path(),
            image: String::new(),
            match_labels: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_lease_path() -> PathBuf {
    PathBuf::from("/var/lib/namespace-manager")
}

fn default_lease_ttl() -> Duration {
    DEFAULT_LEASE_TTL
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_settling_period() -> Duration {
    DEFAULT_SETTLING_PERIOD
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

fn default_context_namespace() -> String {
    "namespace-manager".to_string()
}

fn default_service_account() -> String {
    "namespace-manager".to_string()
}

fn default_config_secret() -> String {
    "namespace-manager-config".to_string()
}

fn default_config_path() -> String {
    "/etc/namespace-manager/config.yaml".to_string()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
