// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use dynamic_config::{ConfigClient, ConfigStore, EnvParamSource, SyncSettings, WatcherSupervisor};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const FLAG_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
pub async fn main() {
    let settings = match SyncSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error reading dynamic config settings: {e}");
            return;
        }
    };

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,{}",
        settings.log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let client = match ConfigClient::new() {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating config service client: {e}");
            return;
        }
    };
    let store = Arc::new(ConfigStore::new(settings.defaults));
    let supervisor = WatcherSupervisor::new(EnvParamSource, Arc::new(client), Arc::clone(&store));

    if supervisor.start(&settings).is_none() {
        return;
    }

    let mut report_interval = interval(FLAG_REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report_interval.tick() => {
                let flags = store.values();
                debug!(
                    trace_enabled = flags.trace_enabled,
                    jvm_metrics_enabled = flags.jvm_metrics_enabled,
                    version = ?supervisor.notification_version(),
                    "dynamic config flags"
                );
            }
        }
    }

    info!("Shutting down dynamic config agent");
    supervisor.shutdown();
}
