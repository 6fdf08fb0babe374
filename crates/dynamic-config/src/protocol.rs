// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire format of the configuration service.
//!
//! Long-poll: `GET {base}/notifications/v2?appId=..&cluster=..&notifications=[..]`
//! answers `200` with a JSON array of [`Notification`] when a namespace changed
//! and `304` when nothing changed before the server's hold expired.
//!
//! Snapshot: `GET {base}/configs/{appId}/{cluster}/{namespace}` answers a JSON
//! object whose `configurations` member maps keys to string values.

use std::collections::HashMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Version sent for a namespace no change has been observed for yet.
pub const UNKNOWN_VERSION: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub namespace_name: String,
    pub notification_id: i64,
}

impl Notification {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
        }
    }
}

/// Parses a long-poll body. Empty or malformed bodies yield no notifications.
pub fn parse_notifications(body: &str) -> Vec<Notification> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str::<Option<Vec<Notification>>>(body)
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Raw key/value pairs of one namespace, as served by the snapshot endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub configurations: HashMap<String, String>,
}

impl ConfigSnapshot {
    /// Returns `None` when the body is blank or not a snapshot document.
    pub fn parse(body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(body).ok()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.configurations.get(key).map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigSnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            configurations: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Fully specified coordinates of the namespace being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    base_url: Url,
    app_id: String,
    cluster: String,
    namespace: String,
}

impl WatchTarget {
    pub fn new(
        base_url: &str,
        app_id: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let invalid = |reason: &str| SyncError::InvalidUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if parsed.cannot_be_a_base() {
            return Err(invalid("url cannot carry a path"));
        }
        Ok(Self {
            base_url: parsed,
            app_id: app_id.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Long-poll URL announcing `version` as the last change seen for the namespace.
    pub fn notifications_url(&self, version: i64) -> Result<Url, SyncError> {
        let notifications =
            serde_json::to_string(&[Notification::new(self.namespace.as_str(), version)])?;
        let mut url = self.endpoint(&["notifications", "v2"])?;
        url.query_pairs_mut()
            .append_pair("appId", &self.app_id)
            .append_pair("cluster", &self.cluster)
            .append_pair("notifications", &notifications);
        Ok(url)
    }

    pub fn snapshot_url(&self) -> Result<Url, SyncError> {
        self.endpoint(&[
            "configs",
            self.app_id.as_str(),
            self.cluster.as_str(),
            self.namespace.as_str(),
        ])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| SyncError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}
