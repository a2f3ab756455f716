// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation and label constants used across both controllers.
//!
//! All state the manager persists lives on the managed namespace objects
//! themselves, under the `manager.cicd.skao.int/` prefix. Keeping every key in
//! one place makes them easy to quantify and change.

// ============================================================================
// Managed Namespace Annotations
// ============================================================================

/// Current status label (`ok`, `unstable`, `failing`, `failed`, `stale`,
/// `terminating`)
pub const STATUS: &str = "manager.cicd.skao.int/status";

/// RFC-3339 timestamp of the last status transition
pub const STATUS_SINCE: &str = "manager.cicd.skao.int/status-since";

/// RFC-3339 timestamp of the last classifier agreement with the status
pub const STATUS_LAST_SEEN: &str = "manager.cicd.skao.int/status-last-seen";

/// JSON array of failing resources `{kind, name, reason, message, first_seen}`
pub const FAILING_RESOURCES: &str = "manager.cicd.skao.int/failing-resources";

/// Resolved owner contact address (base64 `name::slack_id`)
pub const OWNER: &str = "manager.cicd.skao.int/owner";

/// JSON array of status strings already notified for
pub const NOTIFIED_FOR: &str = "manager.cicd.skao.int/notified-for";

/// RFC-3339 timestamp set when a namespace delete was re-issued after the
/// first delete timed out
pub const DELETE_REISSUED_AT: &str = "manager.cicd.skao.int/delete-reissued-at";

/// RFC-3339 timestamp set when a namespace delete failed to confirm twice
pub const DELETE_STUCK: &str = "manager.cicd.skao.int/delete-stuck";

// ============================================================================
// Child Job Annotations and Labels
// ============================================================================

/// Task kind carried by a child job (`check-namespace`, `get-owner-info`, ...)
pub const ACTION: &str = "manager.cicd.skao.int/action";

/// Target namespace carried by a child job
pub const NAMESPACE: &str = "manager.cicd.skao.int/namespace";

/// Label selecting all child workloads rendered for one target namespace
pub const MANAGED_NAMESPACE_LABEL: &str = "manager.cicd.skao.int/managed-namespace";

/// Label marking every workload created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] for resources this controller owns
pub const MANAGED_BY_VALUE: &str = "namespace-manager";

// ============================================================================
// CI/CD Annotations (written by the pipelines, read by the manager)
// ============================================================================

/// GitLab handle of the pipeline author that created the namespace
pub const CICD_AUTHOR: &str = "cicd.skao.int/author";

/// URL of the CI job that created the namespace
pub const CICD_JOB_URL: &str = "cicd.skao.int/jobUrl";

// ============================================================================
// Forbidden Namespaces
// ============================================================================

/// Namespaces that are never managed, regardless of the configured match rules
pub const FORBIDDEN_NAMESPACES: [&str; 4] = [
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "default",
];
