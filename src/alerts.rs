// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus gateway.
//!
//! Issues a single query per pass for all firing alerts and returns the ones
//! scoped to watched namespaces as a parsed view. A failed or missing query is
//! not an error at the pass level; the classifier falls back to the Kubernetes
//! workload signals instead.

use crate::classifier::FiringAlert;
use crate::config::PrometheusConfig;
use crate::constants::PROMETHEUS_TIMEOUT;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Label keys checked, in order, to resolve the offending resource behind an
/// alert.
const RESOURCE_LABELS: [(&str, &str); 5] = [
    ("pod", "Pod"),
    ("deployment", "Deployment"),
    ("statefulset", "StatefulSet"),
    ("replicaset", "ReplicaSet"),
    ("job_name", "Job"),
];

// ============================================================================
// Response Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    status: String,
    #[serde(default)]
    data: AlertsData,
}

#[derive(Debug, Default, Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<ApiAlert>,
}

#[derive(Debug, Deserialize)]
struct ApiAlert {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    state: String,
    #[serde(rename = "activeAt", default)]
    active_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Client for the Prometheus alerts endpoint.
#[derive(Clone)]
pub struct AlertGateway {
    http: reqwest::Client,
    url: Option<String>,
}

impl AlertGateway {
    /// Build the gateway; `url` being unset disables alert queries entirely.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &PrometheusConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROMETHEUS_TIMEOUT)
            .build()
            .context("Failed to build Prometheus HTTP client")?;

        Ok(AlertGateway {
            http,
            url: config.url.clone(),
        })
    }

    /// True when a Prometheus endpoint is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Fetch all firing alerts scoped to the given namespaces.
    ///
    /// # Errors
    ///
    /// Returns an error when no endpoint is configured, the request fails, or
    /// the response is not a success payload. Callers treat any error as "use
    /// the workload fallback".
    pub async fn firing_alerts(&self, namespaces: &[String]) -> Result<Vec<FiringAlert>> {
        let Some(base) = &self.url else {
            bail!("No Prometheus endpoint configured");
        };

        let url = format!("{}/api/v1/alerts", base.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Prometheus alerts request failed")?
            .error_for_status()
            .context("Prometheus alerts request returned an error status")?;

        let parsed: AlertsResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus alerts response")?;
        if parsed.status != "success" {
            bail!("Prometheus alerts query returned status '{}'", parsed.status);
        }

        let watched: HashSet<&str> = namespaces.iter().map(String::as_str).collect();
        let alerts: Vec<FiringAlert> = parsed
            .data
            .alerts
            .into_iter()
            .filter(|alert| alert.state == "firing")
            .filter_map(|alert| parse_alert(alert, &watched))
            .collect();

        debug!(count = alerts.len(), "Fetched firing alerts");
        Ok(alerts)
    }
}

/// Map one API alert onto the classifier's view; `None` when the alert is not
/// scoped to a watched namespace.
fn parse_alert(alert: ApiAlert, watched: &HashSet<&str>) -> Option<FiringAlert> {
    let namespace = alert.labels.get("namespace")?.clone();
    if !watched.contains(namespace.as_str()) {
        return None;
    }

    let reason = alert
        .labels
        .get("alertname")
        .cloned()
        .unwrap_or_else(|| "UnknownAlert".to_string());

    let (name, kind) = RESOURCE_LABELS
        .iter()
        .find_map(|(label, kind)| alert.labels.get(*label).map(|name| (name.clone(), *kind)))
        .unwrap_or_else(|| (namespace.clone(), "Namespace"));

    let message = alert
        .annotations
        .get("summary")
        .or_else(|| alert.annotations.get("description"))
        .or_else(|| alert.annotations.get("message"))
        .cloned()
        .unwrap_or_else(|| reason.clone());

    let severity = alert
        .labels
        .get("severity")
        .cloned()
        .unwrap_or_else(|| "warning".to_string());

    Some(FiringAlert {
        namespace,
        kind: kind.to_string(),
        name,
        reason,
        message,
        severity,
        active_at: alert.active_at.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod alerts_tests;
