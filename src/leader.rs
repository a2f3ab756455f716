// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Filesystem-lease leader election.
//!
//! Both controllers are gated so that only one replica per controller kind is
//! active at a time. The lease is a JSON file on a shared volume; acquisition
//! and renewal write the record to a temporary file and rename it into place,
//! relying on the filesystem's rename atomicity for cross-replica correctness.
//!
//! Fencing is advisory: a demoted leader's in-flight write is not cancelable,
//! so every controller action must additionally be idempotent.

use crate::constants::LEASE_FILE_NAME;
use crate::metrics;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Lease Record
// ============================================================================

/// The on-disk lease record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Hostname plus random token of the holding replica
    pub holder_id: String,
    /// When the holder first acquired the lease
    pub acquired_at: DateTime<Utc>,
    /// When the holder last renewed the lease
    pub renewed_at: DateTime<Utc>,
    /// Lease time-to-live
    #[serde(with = "crate::duration::serde_str")]
    pub ttl: Duration,
}

impl LeaseRecord {
    /// True when the record went un-renewed for longer than its TTL.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.renewed_at).to_std().unwrap_or_default() > self.ttl
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Leader arbiter failure modes.
#[derive(Debug, thiserror::Error)]
pub enum LeaderError {
    /// The current pass held the lease across an I/O wait for too long; the
    /// caller must abort the pass.
    #[error("leadership is stale; abort the current pass")]
    StaleLeadership,

    /// The lease path cannot be read or written.
    #[error("lease storage error: {0}")]
    Storage(#[from] std::io::Error),
}

// ============================================================================
// Arbiter
// ============================================================================

/// Acquires and renews the shared lease, and answers `is_leader()` for the
/// control loops.
pub struct LeaderArbiter {
    lease_file: PathBuf,
    ttl: Duration,
    identity: String,
    enabled: bool,
    held: Mutex<Option<LeaseRecord>>,
}

impl LeaderArbiter {
    /// Create an arbiter storing its lease under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the lease directory cannot be created; this is a
    /// leader-election infrastructure failure (exit code 3).
    pub fn new(path: &Path, ttl: Duration) -> Result<Self, LeaderError> {
        std::fs::create_dir_all(path)?;

        Ok(LeaderArbiter {
            lease_file: path.join(LEASE_FILE_NAME),
            ttl,
            identity: replica_identity(),
            enabled: true,
            held: Mutex::new(None),
        })
    }

    /// Create a disabled arbiter that always reports leadership. Used when
    /// `leader_election.enabled` is false.
    #[must_use]
    pub fn disabled() -> Self {
        LeaderArbiter {
            lease_file: PathBuf::new(),
            ttl: Duration::ZERO,
            identity: replica_identity(),
            enabled: false,
            held: Mutex::new(None),
        }
    }

    /// This replica's holder identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The interval the renewal loop should run at.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        if self.enabled {
            self.ttl / 3
        } else {
            Duration::from_secs(60)
        }
    }

    /// True while this replica holds an unexpired lease.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        if !self.enabled {
            return true;
        }

        let held = self.held.lock().expect("lease mutex poisoned");
        held.as_ref().is_some_and(|lease| !lease.is_expired(Utc::now()))
    }

    /// Check leadership between suspension points.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderError::StaleLeadership`] when the locally held lease
    /// went un-renewed for more than half its TTL; the caller must abort the
    /// current pass.
    pub fn check(&self) -> Result<(), LeaderError> {
        if !self.enabled {
            return Ok(());
        }

        let held = self.held.lock().expect("lease mutex poisoned");
        let fresh = held.as_ref().is_some_and(|lease| {
            (Utc::now() - lease.renewed_at).to_std().unwrap_or_default() <= self.ttl / 2
        });

        if fresh {
            Ok(())
        } else {
            Err(LeaderError::StaleLeadership)
        }
    }

    /// Attempt to acquire or renew the lease; called periodically by the
    /// renewal loop.
    ///
    /// Returns true when this replica is the leader after the attempt.
    ///
    /// # Errors
    ///
    /// Returns an error when the lease file cannot be read or written.
    pub fn acquire(&self) -> Result<bool, LeaderError> {
        if !self.enabled {
            return Ok(true);
        }

        let now = Utc::now();
        let on_disk = self.read_record()?;
        let was_leader = self.held.lock().expect("lease mutex poisoned").is_some();

        let ours = match on_disk {
            Some(record) if record.holder_id == self.identity => {
                // Self-demote on a backwards clock jump; another replica may
                // already consider the lease expired.
                if now < record.renewed_at {
                    warn!(holder = %self.identity, "Clock jumped backwards, releasing lease");
                    self.demote(was_leader);
                    return Ok(false);
                }

                true
            }
            Some(record) if !record.is_expired(now) => {
                debug!(holder = %record.holder_id, "Lease held by another replica");
                self.demote(was_leader);
                return Ok(false);
            }
            Some(record) => {
                info!(
                    stale_holder = %record.holder_id,
                    "Detected stale lease, attempting takeover"
                );
                false
            }
            None => false,
        };

        let record = LeaseRecord {
            holder_id: self.identity.clone(),
            acquired_at: if ours {
                self.held
                    .lock()
                    .expect("lease mutex poisoned")
                    .as_ref()
                    .map_or(now, |lease| lease.acquired_at)
            } else {
                now
            },
            renewed_at: now,
            ttl: self.ttl,
        };

        self.write_record(&record)?;
        *self.held.lock().expect("lease mutex poisoned") = Some(record);

        if was_leader {
            metrics::record_leader_renewed();
        } else {
            info!(identity = %self.identity, "Acquired leader lease");
            metrics::record_leader_elected(&self.identity);
        }

        Ok(true)
    }

    /// Release the lease if this replica holds it. Called on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the lease file cannot be removed.
    pub fn release(&self) -> Result<(), LeaderError> {
        if !self.enabled {
            return Ok(());
        }

        let mut held = self.held.lock().expect("lease mutex poisoned");
        if held.take().is_none() {
            return Ok(());
        }
        drop(held);

        if let Some(record) = self.read_record()? {
            if record.holder_id == self.identity {
                std::fs::remove_file(&self.lease_file)?;
                info!(identity = %self.identity, "Released leader lease");
            }
        }

        Ok(())
    }

    fn demote(&self, was_leader: bool) {
        *self.held.lock().expect("lease mutex poisoned") = None;
        if was_leader {
            warn!(identity = %self.identity, "Lost leader lease");
            metrics::record_leader_lost(&self.identity);
        }
    }

    fn read_record(&self) -> Result<Option<LeaseRecord>, LeaderError> {
        match std::fs::read_to_string(&self.lease_file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    // A corrupt lease is treated as absent; the next writer
                    // replaces it atomically.
                    warn!(error = %err, "Lease record is corrupt, ignoring");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LeaderError::Storage(err)),
        }
    }

    fn write_record(&self, record: &LeaseRecord) -> Result<(), LeaderError> {
        let raw = serde_json::to_string(record).expect("lease record serializes");
        let tmp = self.lease_file.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.lease_file)?;
        Ok(())
    }
}

/// Resolve this replica's holder identity: hostname (or pod name) plus a
/// random token so that restarts never collide with their own stale lease.
fn replica_identity() -> String {
    let host = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "namespace-manager".to_string());
    let token: u32 = rand::thread_rng().gen();

    format!("{host}-{token:08x}")
}

/// Drive the renewal loop until `shutdown` resolves.
///
/// Renewal runs at a third of the lease TTL. Storage errors demote locally
/// and are retried on the next tick; they only become fatal at boot.
pub async fn run_renewal(arbiter: std::sync::Arc<LeaderArbiter>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let interval = arbiter.renew_interval();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if let Err(err) = arbiter.release() {
                    warn!(error = %err, "Failed to release leader lease on shutdown");
                }
                return;
            }
        }

        if let Err(err) = arbiter.acquire() {
            let was_leader = arbiter.is_leader();
            warn!(error = %err, "Lease renewal failed, demoting");
            arbiter.demote(was_leader);
        }
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod leader_tests;
