// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Live values of the runtime flags that may be changed remotely.
//!
//! Each flag is a single atomic word: readers never block, and a refresh
//! updates keys one at a time, so a reader can briefly observe a mix of old
//! and new values.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::protocol::ConfigSnapshot;

/// Whitelisted flags the configuration service is allowed to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownKey {
    TraceEnabled,
    JvmMetricsEnabled,
}

impl KnownKey {
    pub const ALL: [KnownKey; 2] = [KnownKey::TraceEnabled, KnownKey::JvmMetricsEnabled];

    /// Key under which the flag is published by the configuration service.
    pub fn config_key(self) -> &'static str {
        match self {
            KnownKey::TraceEnabled => "IS_SPAN_TRACE",
            KnownKey::JvmMetricsEnabled => "IS_COLLECT_JVM_INFO",
        }
    }
}

impl fmt::Display for KnownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownKey::TraceEnabled => write!(f, "TRACE_ENABLED"),
            KnownKey::JvmMetricsEnabled => write!(f, "JVM_METRICS_ENABLED"),
        }
    }
}

/// Accepts exactly `"true"` and `"false"`. Anything else leaves the flag alone.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Plain values of every known flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub trace_enabled: bool,
    pub jvm_metrics_enabled: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            trace_enabled: true,
            jvm_metrics_enabled: true,
        }
    }
}

impl Flags {
    pub fn get(&self, key: KnownKey) -> bool {
        match key {
            KnownKey::TraceEnabled => self.trace_enabled,
            KnownKey::JvmMetricsEnabled => self.jvm_metrics_enabled,
        }
    }
}

/// A flag written from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagUpdate {
    pub key: KnownKey,
    pub previous: bool,
    pub value: bool,
}

impl FlagUpdate {
    pub fn changed(&self) -> bool {
        self.previous != self.value
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    trace_enabled: AtomicBool,
    jvm_metrics_enabled: AtomicBool,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Flags::default())
    }
}

impl ConfigStore {
    /// Seeds every flag with the process's static configuration.
    pub fn new(defaults: Flags) -> Self {
        Self {
            trace_enabled: AtomicBool::new(defaults.trace_enabled),
            jvm_metrics_enabled: AtomicBool::new(defaults.jvm_metrics_enabled),
        }
    }

    fn slot(&self, key: KnownKey) -> &AtomicBool {
        match key {
            KnownKey::TraceEnabled => &self.trace_enabled,
            KnownKey::JvmMetricsEnabled => &self.jvm_metrics_enabled,
        }
    }

    pub fn get(&self, key: KnownKey) -> bool {
        self.slot(key).load(Ordering::Acquire)
    }

    /// Stores `value` and returns the previous one.
    pub fn set(&self, key: KnownKey, value: bool) -> bool {
        self.slot(key).swap(value, Ordering::AcqRel)
    }

    pub fn trace_enabled(&self) -> bool {
        self.get(KnownKey::TraceEnabled)
    }

    pub fn jvm_metrics_enabled(&self) -> bool {
        self.get(KnownKey::JvmMetricsEnabled)
    }

    pub fn values(&self) -> Flags {
        Flags {
            trace_enabled: self.trace_enabled(),
            jvm_metrics_enabled: self.jvm_metrics_enabled(),
        }
    }

    /// Writes every known key whose snapshot value is a strict boolean literal.
    /// Unknown keys and other literals are skipped.
    pub fn apply_snapshot(&self, snapshot: &ConfigSnapshot) -> Vec<FlagUpdate> {
        KnownKey::ALL
            .into_iter()
            .filter_map(|key| {
                let value = snapshot.get(key.config_key()).and_then(parse_flag)?;
                let previous = self.set(key, value);
                Some(FlagUpdate {
                    key,
                    previous,
                    value,
                })
            })
            .collect()
    }
}
