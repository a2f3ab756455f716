// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! People API client.
//!
//! Resolves a user identifier (the pipeline author's GitLab handle) to contact
//! information. Only the collector binary's owner-lookup action talks to this
//! API; the controllers read the resolved owner back from the namespace
//! annotation.

use crate::config::PeopleApiConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Timeout for people API lookups
const PEOPLE_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Contact information for one resolved user.
#[derive(Clone, Debug, Deserialize)]
pub struct PersonInfo {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Slack member id
    #[serde(default)]
    pub slack_id: String,
}

/// Client for the people API.
#[derive(Clone)]
pub struct PeopleClient {
    http: reqwest::Client,
    url: Option<String>,
}

impl PeopleClient {
    /// Build the client; `url` being unset disables owner lookup.
    ///
    /// # Errors
    ///
    /// Returns an error when the CA bundle cannot be loaded or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &PeopleApiConfig) -> Result<Self> {
        if let Some(raw) = &config.url {
            url::Url::parse(raw)
                .with_context(|| format!("Invalid people API url '{raw}'"))?;
        }

        let mut builder = reqwest::Client::builder().timeout(PEOPLE_API_TIMEOUT);

        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca) = &config.ca {
            // The value is either inline PEM or a path to a PEM bundle.
            let pem = if ca.contains("-----BEGIN") {
                ca.clone().into_bytes()
            } else {
                std::fs::read(ca)
                    .with_context(|| format!("Failed to read people API CA bundle '{ca}'"))?
            };
            let certificate = reqwest::Certificate::from_pem(&pem)
                .context("Failed to parse people API CA bundle")?;
            builder = builder.add_root_certificate(certificate);
        }

        let http = builder
            .build()
            .context("Failed to build people API HTTP client")?;

        Ok(PeopleClient {
            http,
            url: config.url.clone(),
        })
    }

    /// True when a people API endpoint is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Resolve a user by GitLab handle; `Ok(None)` when the user is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error when no endpoint is configured or the request fails.
    pub async fn get_user_by_gitlab_handle(&self, handle: &str) -> Result<Option<PersonInfo>> {
        let Some(base) = &self.url else {
            anyhow::bail!("No people API endpoint configured");
        };

        let response = self
            .http
            .get(base)
            .query(&[("gitlab_handle", handle)])
            .send()
            .await
            .context("People API request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(handle, "People API found no matching user");
            return Ok(None);
        }

        let user: PersonInfo = response
            .error_for_status()
            .context("People API returned an error status")?
            .json()
            .await
            .context("Failed to parse people API response")?;

        if user.slack_id.is_empty() {
            debug!(handle, "People API user has no slack id");
            return Ok(None);
        }

        Ok(Some(user))
    }
}
