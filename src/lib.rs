// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Namespace Manager - Namespace Lifecycle Controller for CI Clusters
//!
//! Namespace Manager is a Kubernetes controller written in Rust that watches the
//! ephemeral namespaces created by CI pipelines, classifies their health and age,
//! publishes the classification back onto each namespace as annotations, notifies
//! namespace owners when the classification changes, and deletes namespaces that
//! exceeded their time-to-live or are terminally broken.
//!
//! ## Overview
//!
//! The controller is split into two leader-gated control loops:
//!
//! - The **Collect Controller** enumerates matched namespaces, classifies each one
//!   from Prometheus alerts and workload state, runs the result through a
//!   hysteresis state machine and writes the outcome back as annotations. It also
//!   reconciles the per-namespace collector jobs.
//! - The **Action Controller** enforces TTL and terminal-status deletion, drives
//!   owner notifications and garbage-collects finished collector jobs.
//!
//! Both loops are gated by a filesystem-lease leader arbiter so that exactly one
//! replica per controller kind is active at a time.
//!
//! ## Modules
//!
//! - [`classifier`] - Pure namespace health classification
//! - [`state`] - Status state machine with hysteresis
//! - [`kubernetes`] - Typed Kubernetes gateway with retries
//! - [`scheduler`] - Per-namespace collector task reconciliation
//! - [`controllers`] - The collect and action control loops
//! - [`leader`] - Filesystem-lease leader election
//! - [`notifier`] - Owner notifications over Slack

pub mod alerts;
pub mod annotations;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod controllers;
pub mod duration;
pub mod kubernetes;
pub mod leader;
pub mod metrics;
pub mod namespace;
pub mod notifier;
pub mod people;
pub mod scheduler;
pub mod state;
pub mod tasks;
