// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory view of a managed namespace.
//!
//! The Kubernetes namespace object is the durable store; this module parses the
//! manager's annotations into a typed record and serializes updates back. It
//! also provides name matching for the configured glob rules and the owner
//! address encoding shared with the people API.

use crate::annotations;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Namespace;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a managed namespace.
///
/// `Failed`, `Stale` and `Terminating` are terminal for classification; only
/// the action controller moves a namespace out of them, by deleting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceStatus {
    Ok,
    Unstable,
    Failing,
    Failed,
    Stale,
    Terminating,
}

impl NamespaceStatus {
    /// The annotation value for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NamespaceStatus::Ok => "ok",
            NamespaceStatus::Unstable => "unstable",
            NamespaceStatus::Failing => "failing",
            NamespaceStatus::Failed => "failed",
            NamespaceStatus::Stale => "stale",
            NamespaceStatus::Terminating => "terminating",
        }
    }

    /// Parse an annotation value into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(NamespaceStatus::Ok),
            "unstable" => Some(NamespaceStatus::Unstable),
            "failing" => Some(NamespaceStatus::Failing),
            "failed" => Some(NamespaceStatus::Failed),
            "stale" => Some(NamespaceStatus::Stale),
            "terminating" => Some(NamespaceStatus::Terminating),
            _ => None,
        }
    }

    /// True for statuses the classifier can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NamespaceStatus::Failed | NamespaceStatus::Stale | NamespaceStatus::Terminating
        )
    }
}

impl fmt::Display for NamespaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Failing Resources
// ============================================================================

/// One offending resource backing a failure classification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingResource {
    /// Kubernetes kind of the offender (`Deployment`, `Pod`, ...)
    pub kind: String,
    /// Name of the offender
    pub name: String,
    /// Short machine reason (`CrashLoopBackOff`, `UnavailableReplicas`, ...)
    pub reason: String,
    /// Human message, enriched with a remediation suggestion where one is known
    pub message: String,
    /// When the offender was first observed misbehaving
    pub first_seen: DateTime<Utc>,
}

// ============================================================================
// Owner Address
// ============================================================================

/// Resolved owner contact identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerAddress {
    /// Display name of the owner
    pub name: String,
    /// Slack member id used as the notification channel
    pub slack_id: String,
}

impl OwnerAddress {
    /// Encode the address into the base64 `name::slack_id` form stored in the
    /// owner annotation.
    #[must_use]
    pub fn encode(&self) -> String {
        BASE64.encode(format!("{}::{}", self.name, self.slack_id))
    }

    /// Decode an annotation value back into an address.
    #[must_use]
    pub fn decode(address: &str) -> Option<Self> {
        let decoded = BASE64.decode(address).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (name, slack_id) = decoded.split_once("::")?;
        if slack_id.is_empty() {
            return None;
        }

        Some(OwnerAddress {
            name: name.to_string(),
            slack_id: slack_id.to_string(),
        })
    }
}

// ============================================================================
// Managed Namespace View
// ============================================================================

/// Typed view over a Kubernetes namespace managed by this controller.
#[derive(Clone, Debug)]
pub struct ManagedNamespace {
    /// DNS-1123 namespace name
    pub name: String,
    /// Creation timestamp from the Kubernetes object
    pub created_at: DateTime<Utc>,
    /// Kubernetes namespace phase (`Active`, `Terminating`)
    pub phase: Option<String>,
    /// Namespace labels
    pub labels: BTreeMap<String, String>,
    /// Namespace annotations
    pub annotations: BTreeMap<String, String>,
    /// Persisted manager status, if any
    pub status: Option<NamespaceStatus>,
    /// Timestamp of the last status transition
    pub status_since: Option<DateTime<Utc>>,
    /// Timestamp of the last classifier agreement with the status
    pub status_last_seen: Option<DateTime<Utc>>,
    /// Failing resources backing the current status
    pub failing_resources: Vec<FailingResource>,
    /// Resolved owner address, if the owner-lookup job ran
    pub owner: Option<OwnerAddress>,
    /// Statuses already notified for
    pub notified_for: BTreeSet<NamespaceStatus>,
}

impl ManagedNamespace {
    /// Build the view from a raw Kubernetes namespace object.
    ///
    /// Returns `None` when the object carries no name or no creation
    /// timestamp, which only happens for objects that are not yet persisted.
    #[must_use]
    pub fn from_kube(ns: &Namespace) -> Option<Self> {
        let name = ns.metadata.name.clone()?;
        let created_at = ns.metadata.creation_timestamp.as_ref()?.0;
        let labels = ns.metadata.labels.clone().unwrap_or_default();
        let annotations = ns.metadata.annotations.clone().unwrap_or_default();
        let phase = ns.status.as_ref().and_then(|s| s.phase.clone());

        let status = annotations
            .get(annotations::STATUS)
            .map(String::as_str)
            .and_then(NamespaceStatus::parse);
        let status_since = annotations
            .get(annotations::STATUS_SINCE)
            .and_then(|v| parse_rfc3339(v));
        let status_last_seen = annotations
            .get(annotations::STATUS_LAST_SEEN)
            .and_then(|v| parse_rfc3339(v));
        let failing_resources = annotations
            .get(annotations::FAILING_RESOURCES)
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or_default();
        let owner = annotations
            .get(annotations::OWNER)
            .and_then(|v| OwnerAddress::decode(v));
        let notified_for = annotations
            .get(annotations::NOTIFIED_FOR)
            .and_then(|v| serde_json::from_str::<Vec<String>>(v).ok())
            .map(|statuses| {
                statuses
                    .iter()
                    .filter_map(|s| NamespaceStatus::parse(s))
                    .collect()
            })
            .unwrap_or_default();

        Some(ManagedNamespace {
            name,
            created_at,
            phase,
            labels,
            annotations,
            status,
            status_since,
            status_last_seen,
            failing_resources,
            owner,
            notified_for,
        })
    }

    /// Age of the namespace at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// Dwell time in the current status at `now`; zero when no status was
    /// persisted yet.
    #[must_use]
    pub fn dwell(&self, now: DateTime<Utc>) -> Duration {
        self.status_since
            .map(|since| (now - since).to_std().unwrap_or_default())
            .unwrap_or_default()
    }

    /// True when the Kubernetes object reports the namespace as terminating.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.phase.as_deref() == Some("Terminating")
            || self.status == Some(NamespaceStatus::Terminating)
    }

    /// The pipeline author's GitLab handle, when the CI annotations carry one.
    #[must_use]
    pub fn cicd_author(&self) -> Option<&str> {
        self.annotations
            .get(annotations::CICD_AUTHOR)
            .map(String::as_str)
    }

    /// Serialize the manager-owned state into the annotation map written back
    /// to Kubernetes. Structured values are compact JSON strings.
    #[must_use]
    pub fn status_annotations(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();

        if let Some(status) = self.status {
            out.insert(annotations::STATUS.to_string(), status.to_string());
        }

        if let Some(since) = self.status_since {
            out.insert(annotations::STATUS_SINCE.to_string(), format_rfc3339(since));
        }

        if let Some(last_seen) = self.status_last_seen {
            out.insert(
                annotations::STATUS_LAST_SEEN.to_string(),
                format_rfc3339(last_seen),
            );
        }

        out.insert(
            annotations::FAILING_RESOURCES.to_string(),
            serde_json::to_string(&self.failing_resources).unwrap_or_else(|_| "[]".to_string()),
        );

        let notified: Vec<&str> = self
            .notified_for
            .iter()
            .map(|status| status.as_str())
            .collect();
        out.insert(
            annotations::NOTIFIED_FOR.to_string(),
            serde_json::to_string(&notified).unwrap_or_else(|_| "[]".to_string()),
        );

        out
    }
}

/// True for namespaces that must never be managed.
#[must_use]
pub fn is_forbidden(name: &str) -> bool {
    annotations::FORBIDDEN_NAMESPACES.contains(&name)
}

// ============================================================================
// Timestamps
// ============================================================================

/// Format a timestamp the way all manager annotations store them.
#[must_use]
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an annotation timestamp; tolerant of any RFC-3339 offset.
#[must_use]
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

// ============================================================================
// Glob Matching
// ============================================================================

/// Compile a name glob (`ci-*`, `ci-?-[ab]*`) into an anchored regex.
///
/// Supports `*` (any run), `?` (any single character) and `[...]` character
/// classes; everything else matches literally.
///
/// # Errors
///
/// Returns an error for unterminated character classes or patterns the regex
/// engine rejects.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');

    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                pattern.push('[');
                let mut closed = false;
                for class_char in chars.by_ref() {
                    pattern.push(class_char);
                    if class_char == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    bail!("Unterminated character class in glob '{glob}'");
                }
            }
            c if "\\.+()|{}^$".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }

    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("Invalid glob '{glob}'"))
}

#[cfg(test)]
#[path = "namespace_tests.rs"]
mod namespace_tests;
