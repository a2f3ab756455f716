// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the namespace manager.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// Controller Identity Constants
// ============================================================================

/// Field manager name used for all Kubernetes patches
pub const FIELD_MANAGER: &str = "namespace-manager";

/// Controller kind label for the collect controller
pub const CONTROLLER_COLLECT: &str = "collect";

/// Controller kind label for the action controller
pub const CONTROLLER_ACTION: &str = "action";

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader lease time-to-live (5 seconds)
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5);

/// Name of the lease file inside `leader_election.path`
pub const LEASE_FILE_NAME: &str = "lease";

// ============================================================================
// Pass Pacing Constants
// ============================================================================

/// Maximum wall-clock budget for a single reconciliation pass
pub const PASS_BUDGET: Duration = Duration::from_secs(60);

/// Upper bound on the sleep between passes (also the fallback when no
/// cron tick is pending)
pub const MAX_PASS_INTERVAL: Duration = Duration::from_secs(30);

/// Poll interval while waiting to become leader
pub const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded fan-out for per-namespace reconciliation within a pass
pub const RECONCILE_CONCURRENCY: usize = 16;

// ============================================================================
// Outbound Call Timeouts
// ============================================================================

/// Timeout for Kubernetes read operations
pub const KUBE_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for Kubernetes write operations
pub const KUBE_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for the batched Prometheus alerts query
pub const PROMETHEUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for chat webhook delivery
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Retry and Backoff Constants
// ============================================================================

/// Backoff schedule for optimistic-concurrency conflicts; a fourth conflict
/// surfaces to the caller
pub const CONFLICT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(600),
    Duration::from_millis(1800),
];

/// Initial backoff for transient Kubernetes API errors
pub const TRANSIENT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);

/// Total backoff budget for transient Kubernetes API errors
pub const TRANSIENT_BACKOFF_TOTAL: Duration = Duration::from_secs(30);

// ============================================================================
// State Machine Defaults
// ============================================================================

/// Dwell time a recovering namespace must report healthy before returning
/// to `ok`
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(120);

/// Default post-creation window during which failure signals are ignored
pub const DEFAULT_SETTLING_PERIOD: Duration = Duration::from_secs(120);

/// Default dwell time before `failing` escalates to `failed`
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(120);

/// Default namespace time-to-live
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

// ============================================================================
// Deletion Constants
// ============================================================================

/// Time allowed for a namespace delete to complete before it is re-issued
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Child Job Constants
// ============================================================================

/// Length of the hashed namespace suffix in child job names
pub const CHILD_NAME_HASH_LEN: usize = 8;

/// Finished child jobs kept per (namespace, task) after success
pub const SUCCESSFUL_JOBS_HISTORY_LIMIT: i32 = 3;

/// Finished child jobs kept per (namespace, task) after failure
pub const FAILED_JOBS_HISTORY_LIMIT: i32 = 1;

/// Default active-deadline for child jobs (10 minutes)
pub const CHILD_JOB_DEADLINE_SECS: i64 = 600;

/// Default retry budget for child jobs
pub const CHILD_JOB_BACKOFF_LIMIT: i32 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for the Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for the Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

// ============================================================================
// Exit Codes
// ============================================================================

/// Normal shutdown
pub const EXIT_OK: i32 = 0;

/// Configuration error at boot
pub const EXIT_CONFIGURATION: i32 = 1;

/// Unrecoverable runtime error
pub const EXIT_RUNTIME: i32 = 2;

/// Leader-election infrastructure failure
pub const EXIT_LEADER_ELECTION: i32 = 3;
