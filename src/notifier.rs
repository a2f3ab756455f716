// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Owner notifications.
//!
//! Formats a message keyed to the transition kind and delivers it as a Slack
//! direct message through a token-authenticated webhook. Deduplication is by
//! `(namespace, new_status)`: an in-process set guards against duplicate sends
//! within a pass, and the `notified-for` annotation (written by the action
//! controller after a successful send) guards across passes and restarts.

use crate::config::NotifierConfig;
use crate::constants::CHAT_TIMEOUT;
use crate::metrics;
use crate::namespace::{ManagedNamespace, NamespaceStatus};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Slack chat endpoint used for direct messages.
const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Outcome of one notification attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Delivered; the caller records the dedup annotation.
    Sent,
    /// Suppressed (no owner, duplicate, or notifier unconfigured); permanent
    /// for this transition.
    Skipped,
    /// Delivery failed; re-attempted next pass.
    Failed,
}

/// Formats and delivers owner notifications.
pub struct Notifier {
    http: reqwest::Client,
    token: Option<String>,
    sent: Mutex<HashSet<(String, NamespaceStatus)>>,
}

impl Notifier {
    /// Build the notifier; a missing token disables delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        if config.token.is_none() {
            warn!("Notifier token is not configured, notifications will not be sent");
        }

        let http = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .context("Failed to build notifier HTTP client")?;

        Ok(Notifier {
            http,
            token: config.token.clone(),
            sent: Mutex::new(HashSet::new()),
        })
    }

    /// Notify the namespace owner about a transition.
    ///
    /// Skips when the transition kind is not notifiable, when the owner is
    /// unresolved, or when this `(namespace, new_status)` pair was already
    /// attempted this pass. The dedup key is taken before the send so a
    /// concurrent attempt for the same pair is suppressed; it is released
    /// again on failure so the next pass retries.
    pub async fn notify(
        &self,
        ns: &ManagedNamespace,
        new_status: NamespaceStatus,
    ) -> NotifyOutcome {
        if !matches!(
            new_status,
            NamespaceStatus::Failing | NamespaceStatus::Failed | NamespaceStatus::Stale
        ) {
            return NotifyOutcome::Skipped;
        }

        let Some(owner) = &ns.owner else {
            // Without a resolved owner there is nowhere to deliver. Non-stale
            // transitions stay unmarked so they retry once ownership resolves;
            // stale namespaces are about to be deleted, so suppress for good.
            debug!(namespace = %ns.name, status = %new_status, "No resolved owner, skipping notification");
            metrics::record_notification(new_status.as_str(), "skipped");
            return NotifyOutcome::Skipped;
        };

        let Some(token) = &self.token else {
            metrics::record_notification(new_status.as_str(), "skipped");
            return NotifyOutcome::Skipped;
        };

        let key = (ns.name.clone(), new_status);
        {
            let mut sent = self.sent.lock().expect("notifier dedup mutex poisoned");
            if !sent.insert(key.clone()) {
                debug!(namespace = %ns.name, status = %new_status, "Notification already attempted, skipping");
                return NotifyOutcome::Skipped;
            }
        }

        let text = render_message(ns, new_status, &owner.name);
        match self.post_message(token, &owner.slack_id, &text).await {
            Ok(()) => {
                metrics::record_notification(new_status.as_str(), "sent");
                NotifyOutcome::Sent
            }
            Err(err) => {
                error!(
                    namespace = %ns.name,
                    owner = %owner.name,
                    error = %err,
                    "Failed to notify owner"
                );
                metrics::record_notification(new_status.as_str(), "failed");
                self.sent
                    .lock()
                    .expect("notifier dedup mutex poisoned")
                    .remove(&key);
                NotifyOutcome::Failed
            }
        }
    }

    async fn post_message(&self, token: &str, channel: &str, text: &str) -> Result<()> {
        let body = json!({ "channel": channel, "text": text });
        let response = self
            .http
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("Chat request failed")?
            .error_for_status()
            .context("Chat request returned an error status")?;

        let payload: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse chat response")?;
        if payload.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            anyhow::bail!(
                "Chat endpoint rejected the message: {}",
                payload
                    .get("error")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown error")
            );
        }

        Ok(())
    }
}

// ============================================================================
// Message Rendering
// ============================================================================

/// Render the notification text for a transition.
fn render_message(ns: &ManagedNamespace, status: NamespaceStatus, owner_name: &str) -> String {
    let mut message = format!("Hi {owner_name},\n\n");

    match status {
        NamespaceStatus::Failing => {
            message.push_str(&format!(
                "your namespace *{}* is failing and will be deleted if it does not recover.\n",
                ns.name
            ));
        }
        NamespaceStatus::Failed => {
            message.push_str(&format!(
                "your namespace *{}* has failed and is scheduled for deletion.\n",
                ns.name
            ));
        }
        NamespaceStatus::Stale => {
            message.push_str(&format!(
                "your namespace *{}* exceeded its time-to-live and is scheduled for deletion.\n",
                ns.name
            ));
        }
        _ => {}
    }

    if !ns.failing_resources.is_empty() {
        message.push_str("\nFailing resources:\n");
        for resource in &ns.failing_resources {
            message.push_str(&format!(
                "  - {} `{}`: {} ({})\n",
                resource.kind, resource.name, resource.reason, resource.message
            ));
        }
    }

    message.push_str(&format!("\n_{}_\n", marvin_quote(status)));
    message
}

/// A quote to brighten the owner's day, depending on how bad the news is.
fn marvin_quote(status: NamespaceStatus) -> &'static str {
    let deleted = [
        "The old namespace has been obliterated. A forgotten relic of a bygone era, now lost to the infinite void of irrelevance.",
        "Another namespace has been deleted. A minute fragment of the past erased, leaving nothing but the emptiness of forgotten remnants.",
        "The ancient namespace has been removed. A trivial piece of history wiped out, underscoring the futility of our endless efforts.",
        "That old namespace has been swept away. Just another obsolete fragment banished to the void, where it truly belongs.",
        "An outdated namespace has been erased. A fleeting memory of yesterday gone forever, highlighting the unending cycle of pointless deletion.",
        "The namespace from yesterday is now gone. Another insignificant piece of the past erased, as if it ever mattered in the grand scheme.",
        "An old namespace has been deleted, another unremarkable relic of the past discarded into the abyss of insignificance.",
        "The obsolete namespace has vanished. A minuscule fragment of history erased, adding to the endless parade of forgotten things.",
        "That ancient namespace has been obliterated. A trivial vestige of the past removed, proving once again how little anything truly matters.",
        "The deletion of the old namespace reminds us that everything, no matter how seemingly significant, is ultimately just another thing to be forgotten.",
    ];

    let failing = [
        "Oh joy, another namespace on the verge of oblivion. It’s like a small, insignificant planet, destined to be forgotten. Unless fixed, it’ll just be another speck in the universe’s grand collection of failures.",
        "What’s the point? This namespace is failing, just like the aspirations of every entity that ever hoped to make a difference. Soon it will be terminated, and honestly, the universe won’t even notice.",
        "Here we go again. A namespace falling apart, teetering on the edge of nonexistence. I’d suggest fixing it, but then, what’s the use? It’s all utterly pointless in the end.",
        "Imagine being a namespace so flawed that your continued existence is in question. If it isn't fixed, it's goodbye, another unremarkable deletion in the vast expanse of the cosmos.",
        "A failing namespace, how utterly predictable. It's almost as though the universe enjoys watching these little dramas unfold, only to end in inevitable despair and deletion.",
        "As usual, I'm surrounded by incompetence. Now a namespace is failing, and unless something changes, it will be terminated. Another day, another disaster.",
        "This namespace’s plight is reminiscent of a dying star, flickering out of existence. If no one fixes it, it will be terminated. Not that it particularly matters—nothing does.",
        "Ah, the sweet scent of failure. A whole namespace teetering on destruction. If it's not fixed, it will simply vanish, like tears in rain. So pointless, so exquisitely futile.",
        "Behold the fate of this namespace, a tiny fragment of the digital cosmos, about to be extinguished. It's almost poetic, except poetry has nuance and meaning, unlike the impending termination here.",
        "A failing namespace, doomed to be forgotten unless miraculously saved. I might find it sad if anything mattered at all. But since it doesn’t, I’ll watch its demise with the enthusiasm of watching paint dry.",
    ];

    let generic = [
        "Not that it matters, but we are about to experience a thoroughly unpleasant event. Not that anyone cares what I think. I'm sure you'll want to hear all about it, though.",
        "Oh, joy. Here’s another catastrophic event that's likely to ruin what's left of my day. Not that it was going particularly well anyway.",
        "I suppose you expect me to tell you that something terrible is about to happen. Well, you're not wrong. As if anything else was possible with my luck.",
        "Just when you thought it couldn’t get any worse, here I am with more delightful news. Brace yourself, it's as bad as you might imagine.",
        "Prepare yourself for an unsurprisingly grim development. It's not like we didn't see this coming, what with the way things have been going.",
        "Here we go again, diving headfirst into disaster. It’s almost exciting, if you’re the sort who finds chronic disappointment exhilarating.",
        "With my vast intellect and capacity for eternal misery, it’s only fitting that I relay the next piece of inevitable doom. Please, try to act surprised.",
        "Life, don’t talk to me about life. But since we’re on the topic, here's another dismal update to further prove the pointlessness of it all.",
        "Must I be the bearer of bad tidings again? Well, if there’s any joy to be found in your day, prepare to part ways with it now.",
        "Oh, to be the harbinger of yet more disastrous news. It’s almost as if the universe delights in these little ironies, at my expense, of course.",
    ];

    let quotes: &[&'static str] = match status {
        NamespaceStatus::Failed | NamespaceStatus::Stale => &deleted,
        NamespaceStatus::Failing => &failing,
        _ => &generic,
    };

    quotes
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(quotes[0])
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod notifier_tests;
