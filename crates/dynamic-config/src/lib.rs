// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dynamic configuration for runtime feature flags.
//!
//! A [`WatcherSupervisor`] waits until the connection parameters of the
//! configuration service are known, then launches a single [`ConfigWatcher`]
//! on a dedicated thread. The watcher long-polls the service for change
//! notifications and writes validated flag values into a shared
//! [`ConfigStore`] that the rest of the process reads.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use client::{ClientError, ConfigClient, ConfigTransport, PollResponse};
pub use config::{ConnectionParams, SyncSettings};
pub use error::SyncError;
pub use protocol::{ConfigSnapshot, Notification, WatchTarget, UNKNOWN_VERSION};
pub use store::{ConfigStore, FlagUpdate, Flags, KnownKey};
pub use supervisor::{EnvParamSource, ParamSource, TickOutcome, WatcherSupervisor};
pub use watcher::{ConfigWatcher, CycleOutcome, NotificationVersions};
