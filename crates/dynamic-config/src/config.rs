// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven settings.
//!
//! [`SyncSettings`] is read once at startup. [`ConnectionParams`] may show up
//! late while the host process is still booting, so it is re-read on every
//! supervisor tick.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::SyncError;
use crate::protocol::WatchTarget;
use crate::store::Flags;

const ENV_ENABLED: &str = "DYNAMIC_CONFIG_ENABLED";
const ENV_CHECK_INTERVAL: &str = "DYNAMIC_CONFIG_CHECK_INTERVAL_SECS";
const ENV_TRACE_ENABLED: &str = "DYNAMIC_CONFIG_TRACE_ENABLED";
const ENV_JVM_METRICS_ENABLED: &str = "DYNAMIC_CONFIG_JVM_METRICS_ENABLED";
const ENV_LOG_LEVEL: &str = "DYNAMIC_CONFIG_LOG_LEVEL";

const ENV_APP_ID: &str = "DYNAMIC_CONFIG_APP_ID";
const ENV_SERVICE_URL: &str = "DYNAMIC_CONFIG_SERVICE_URL";
const ENV_CLUSTER: &str = "DYNAMIC_CONFIG_CLUSTER";
const ENV_NAMESPACE: &str = "DYNAMIC_CONFIG_NAMESPACE";

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_LOG_LEVEL: &str = "info";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Static settings of the subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Whether the watcher should run at all.
    pub enabled: bool,
    /// How often the supervisor checks whether the watcher can start.
    pub check_interval: Duration,
    /// Flag values used until the configuration service says otherwise.
    pub defaults: Flags,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: DEFAULT_CHECK_INTERVAL,
            defaults: Flags::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_env_iter(env::vars())
    }

    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = collect(iter);
        let defaults = Flags::default();

        let check_interval = match non_empty(&map, ENV_CHECK_INTERVAL) {
            Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                SyncError::InvalidConfig(format!(
                    "{ENV_CHECK_INTERVAL} must be a whole number of seconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_CHECK_INTERVAL,
        };

        let settings = Self {
            enabled: parse_bool(non_empty(&map, ENV_ENABLED).as_deref(), true),
            check_interval,
            defaults: Flags {
                trace_enabled: parse_bool(
                    non_empty(&map, ENV_TRACE_ENABLED).as_deref(),
                    defaults.trace_enabled,
                ),
                jvm_metrics_enabled: parse_bool(
                    non_empty(&map, ENV_JVM_METRICS_ENABLED).as_deref(),
                    defaults.jvm_metrics_enabled,
                ),
            },
            log_level: non_empty(&map, ENV_LOG_LEVEL)
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.check_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "check interval must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// The four parameters needed to reach the configuration service. Any may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub app_id: Option<String>,
    pub base_url: Option<String>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
}

impl ConnectionParams {
    pub fn from_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = collect(iter);
        Self {
            app_id: non_empty(&map, ENV_APP_ID),
            base_url: non_empty(&map, ENV_SERVICE_URL),
            cluster: non_empty(&map, ENV_CLUSTER),
            namespace: non_empty(&map, ENV_NAMESPACE),
        }
    }

    /// Names of the parameters that are still missing.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("app_id", &self.app_id),
            ("base_url", &self.base_url),
            ("cluster", &self.cluster),
            ("namespace", &self.namespace),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    /// Builds the watch target once every parameter is present and the URL is usable.
    pub fn to_target(&self) -> Option<Result<WatchTarget, SyncError>> {
        match (&self.app_id, &self.base_url, &self.cluster, &self.namespace) {
            (Some(app_id), Some(base_url), Some(cluster), Some(namespace)) => Some(
                WatchTarget::new(base_url, app_id.as_str(), cluster.as_str(), namespace.as_str()),
            ),
            _ => None,
        }
    }
}

fn collect<I, K, V>(iter: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    iter.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Trimmed value of `key`, or `None` when unset or blank.
fn non_empty(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
