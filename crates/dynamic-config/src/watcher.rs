// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Long-poll loop keeping the [`ConfigStore`] in sync with the configuration service.
//!
//! Each cycle announces the last notification version seen for the namespace
//! and waits for the server to answer:
//!
//! - `200`: a change was published. The first notification for our namespace
//!   advances the local version (never backwards) and always triggers a
//!   snapshot fetch, whose valid flags are written to the store.
//! - `304`: nothing changed while the server held the request.
//! - anything else is logged and ignored.
//!
//! A failed cycle is followed by a fixed backoff. The loop only ends when its
//! cancellation token fires; the token also interrupts in-flight requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::ConfigTransport;
use crate::error::SyncError;
use crate::protocol::{parse_notifications, ConfigSnapshot, WatchTarget, UNKNOWN_VERSION};
use crate::store::{ConfigStore, FlagUpdate};

/// Pause after a failed cycle before polling again.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(3);

const HTTP_OK: u16 = 200;
const HTTP_NOT_MODIFIED: u16 = 304;

/// Last notification version seen per namespace. Versions only move forward.
#[derive(Debug, Default)]
pub struct NotificationVersions {
    versions: Mutex<HashMap<String, i64>>,
}

impl NotificationVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns [`UNKNOWN_VERSION`] for namespaces without an observed change.
    pub fn get(&self, namespace: &str) -> i64 {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .copied()
            .unwrap_or(UNKNOWN_VERSION)
    }

    /// Records `version` if it is strictly newer. Returns whether it was recorded.
    pub fn advance(&self, namespace: &str, version: i64) -> bool {
        let mut versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        let current = versions.entry(namespace.to_string()).or_insert(UNKNOWN_VERSION);
        if version > *current {
            *current = version;
            true
        } else {
            false
        }
    }
}

/// What a single long-poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// `304`: nothing changed.
    NotModified,
    /// Neither `200` nor `304`.
    UnexpectedStatus(u16),
    /// `200` with an empty or unparsable notification list.
    NoNotification,
    /// `200` without a notification for the watched namespace.
    NamespaceMismatch,
    /// The snapshot could not be fetched or was empty; the store is untouched.
    SnapshotUnavailable,
    /// The snapshot was applied. Lists every flag that carried a valid literal.
    Applied(Vec<FlagUpdate>),
}

pub struct ConfigWatcher {
    target: WatchTarget,
    transport: Arc<dyn ConfigTransport>,
    store: Arc<ConfigStore>,
    versions: Arc<NotificationVersions>,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("target", &self.target)
            .field("version", &self.notification_version())
            .finish()
    }
}

impl ConfigWatcher {
    pub fn new(
        target: WatchTarget,
        transport: Arc<dyn ConfigTransport>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self::with_versions(target, transport, store, Arc::new(NotificationVersions::new()))
    }

    /// Shares version tracking with the caller, e.g. to report it while the loop runs.
    pub fn with_versions(
        target: WatchTarget,
        transport: Arc<dyn ConfigTransport>,
        store: Arc<ConfigStore>,
        versions: Arc<NotificationVersions>,
    ) -> Self {
        Self {
            target,
            transport,
            store,
            versions,
        }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Last notification version seen for the watched namespace.
    pub fn notification_version(&self) -> i64 {
        self.versions.get(self.target.namespace())
    }

    /// Polls until `cancel` fires. Failed cycles never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            namespace = self.target.namespace(),
            cluster = self.target.cluster(),
            "config watcher started"
        );
        loop {
            let cycle = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cycle = self.poll_once() => cycle,
            };

            match cycle {
                Ok(outcome) => trace!(?outcome, "config long poll cycle finished"),
                Err(err) => {
                    error!(
                        error = %err,
                        "config long poll failed, retrying in {}s",
                        FAILURE_BACKOFF.as_secs()
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = sleep(FAILURE_BACKOFF) => {}
                    }
                }
            }
        }
        debug!(namespace = self.target.namespace(), "config watcher stopped");
    }

    /// Runs one long-poll cycle.
    pub async fn poll_once(&self) -> Result<CycleOutcome, SyncError> {
        let namespace = self.target.namespace();
        let url = self.target.notifications_url(self.notification_version())?;
        let response = self.transport.long_poll(&url).await?;

        match response.status {
            HTTP_OK => {}
            HTTP_NOT_MODIFIED => {
                trace!(namespace, "config not modified");
                return Ok(CycleOutcome::NotModified);
            }
            status => {
                info!(status, body = %response.body, "unexpected config long poll status");
                return Ok(CycleOutcome::UnexpectedStatus(status));
            }
        }

        let notifications = parse_notifications(&response.body);
        if notifications.is_empty() {
            debug!(namespace, "config long poll returned no notifications");
            return Ok(CycleOutcome::NoNotification);
        }
        let Some(notification) = notifications
            .iter()
            .find(|n| n.namespace_name == namespace)
        else {
            debug!(namespace, "config change notification for another namespace");
            return Ok(CycleOutcome::NamespaceMismatch);
        };

        if self
            .versions
            .advance(namespace, notification.notification_id)
        {
            debug!(
                namespace,
                version = notification.notification_id,
                "config notification version advanced"
            );
        }

        // A namespace match always refetches, even when the version did not move.
        let Some(snapshot) = self.fetch_snapshot().await? else {
            return Ok(CycleOutcome::SnapshotUnavailable);
        };
        let updates = self.store.apply_snapshot(&snapshot);
        info!(
            namespace,
            version = self.notification_version(),
            applied = updates.len(),
            "dynamic config update succeeded"
        );
        for update in updates.iter().filter(|u| u.changed()) {
            info!(key = %update.key, value = update.value, "dynamic config flag changed");
        }
        Ok(CycleOutcome::Applied(updates))
    }

    async fn fetch_snapshot(&self) -> Result<Option<ConfigSnapshot>, SyncError> {
        let url = self.target.snapshot_url()?;
        let body = match self.transport.fetch_snapshot(&url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "abandoning config refresh, snapshot fetch failed");
                return Ok(None);
            }
        };
        let snapshot = ConfigSnapshot::parse(&body);
        if snapshot.is_none() {
            warn!(body = %body, "abandoning config refresh, snapshot is empty or malformed");
        }
        Ok(snapshot)
    }
}
