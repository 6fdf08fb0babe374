// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gated, single-shot startup of the [`ConfigWatcher`].
//!
//! The host calls [`WatcherSupervisor::tick`] periodically (or lets
//! [`WatcherSupervisor::start`] schedule it). Each tick is cheap: it returns
//! immediately once a watcher runs, and otherwise checks that all connection
//! parameters are present before launching the watcher on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ConfigTransport;
use crate::config::{ConnectionParams, SyncSettings};
use crate::store::ConfigStore;
use crate::watcher::{ConfigWatcher, NotificationVersions};

const WATCHER_THREAD_NAME: &str = "config-watcher";

/// Supplies the connection parameters, re-read on every tick.
pub trait ParamSource: Send + Sync {
    fn connection_params(&self) -> ConnectionParams;
}

impl ParamSource for ConnectionParams {
    fn connection_params(&self) -> ConnectionParams {
        self.clone()
    }
}

impl<F> ParamSource for F
where
    F: Fn() -> ConnectionParams + Send + Sync,
{
    fn connection_params(&self) -> ConnectionParams {
        self()
    }
}

/// Reads the parameters from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvParamSource;

impl ParamSource for EnvParamSource {
    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::from_env()
    }
}

/// Result of one supervisor tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// This tick launched the watcher.
    Started,
    /// A watcher was already launched, by this or a concurrent caller.
    AlreadyStarted,
    /// Some connection parameters are not available yet.
    MissingParameters(Vec<&'static str>),
    /// All parameters are present but the service URL is unusable.
    InvalidParameters(String),
    /// The watcher could not be launched; the next tick retries.
    LaunchFailed(String),
    /// `shutdown` was called.
    ShutDown,
}

struct SupervisorInner {
    params: Box<dyn ParamSource>,
    transport: Arc<dyn ConfigTransport>,
    store: Arc<ConfigStore>,
    versions: Arc<NotificationVersions>,
    started: AtomicBool,
    reported_missing: AtomicBool,
    namespace: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    schedule_cancel: CancellationToken,
    watcher_cancel: CancellationToken,
}

/// Owns the watcher lifecycle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WatcherSupervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for WatcherSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherSupervisor")
            .field("started", &self.is_started())
            .field("shut_down", &self.inner.watcher_cancel.is_cancelled())
            .finish()
    }
}

impl WatcherSupervisor {
    pub fn new(
        params: impl ParamSource + 'static,
        transport: Arc<dyn ConfigTransport>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                params: Box::new(params),
                transport,
                store,
                versions: Arc::new(NotificationVersions::new()),
                started: AtomicBool::new(false),
                reported_missing: AtomicBool::new(false),
                namespace: Mutex::new(None),
                worker: Mutex::new(None),
                schedule_cancel: CancellationToken::new(),
                watcher_cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.inner.store
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Last notification version seen by the watcher, if one was launched.
    pub fn notification_version(&self) -> Option<i64> {
        let namespace = self
            .inner
            .namespace
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        namespace
            .as_deref()
            .map(|namespace| self.inner.versions.get(namespace))
    }

    /// Whether the watcher thread has exited. `None` if it was never launched.
    pub fn watcher_finished(&self) -> Option<bool> {
        let worker = self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner);
        worker.as_ref().map(JoinHandle::is_finished)
    }

    /// Schedules [`tick`](Self::tick) on the current tokio runtime every
    /// `check_interval`, starting immediately. Does nothing when disabled.
    pub fn start(&self, settings: &SyncSettings) -> Option<tokio::task::JoinHandle<()>> {
        if !settings.enabled {
            info!("dynamic config disabled, not watching the configuration service");
            return None;
        }
        Some(self.schedule(settings.check_interval))
    }

    fn schedule(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        let cancel = self.inner.schedule_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = supervisor.tick();
                        debug!(?outcome, "dynamic config supervisor tick");
                    }
                }
            }
            debug!("dynamic config supervisor schedule stopped");
        })
    }

    /// Launches the watcher if it is not running yet and all parameters are available.
    pub fn tick(&self) -> TickOutcome {
        let inner = &self.inner;
        if inner.watcher_cancel.is_cancelled() {
            return TickOutcome::ShutDown;
        }
        if self.is_started() {
            return TickOutcome::AlreadyStarted;
        }

        let params = inner.params.connection_params();
        let target = match params.to_target() {
            None => {
                let missing = params.missing();
                if inner.reported_missing.swap(true, Ordering::AcqRel) {
                    debug!(?missing, "dynamic config connection parameters are not complete");
                } else {
                    info!(?missing, "dynamic config connection parameters are not complete");
                }
                return TickOutcome::MissingParameters(missing);
            }
            Some(Err(err)) => {
                warn!(error = %err, "dynamic config connection parameters are invalid");
                return TickOutcome::InvalidParameters(err.to_string());
            }
            Some(Ok(target)) => target,
        };

        if inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickOutcome::AlreadyStarted;
        }

        *inner.namespace.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(target.namespace().to_string());
        let watcher = ConfigWatcher::with_versions(
            target,
            Arc::clone(&inner.transport),
            Arc::clone(&inner.store),
            Arc::clone(&inner.versions),
        );
        let cancel = inner.watcher_cancel.clone();
        let thread_inner = Arc::clone(inner);

        let spawned = std::thread::Builder::new()
            .name(WATCHER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!(error = %err, "failed to build config watcher runtime, will retry");
                        thread_inner.started.store(false, Ordering::Release);
                        return;
                    }
                };
                runtime.block_on(watcher.run(cancel));
            });

        match spawned {
            Ok(handle) => {
                *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!("dynamic config watcher launched");
                TickOutcome::Started
            }
            Err(err) => {
                error!(error = %err, "failed to spawn config watcher thread, will retry");
                inner.started.store(false, Ordering::Release);
                TickOutcome::LaunchFailed(err.to_string())
            }
        }
    }

    /// Stops the schedule and signals the watcher to exit. Does not wait for it.
    pub fn shutdown(&self) {
        self.inner.schedule_cancel.cancel();
        self.inner.watcher_cancel.cancel();
        debug!("dynamic config supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, PollResponse};
    use async_trait::async_trait;
    use reqwest::Url;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Instant;
    use tracing_test::traced_test;

    /// Holds every long-poll open until the watcher is cancelled.
    #[derive(Default)]
    struct HangingTransport {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ConfigTransport for HangingTransport {
        async fn long_poll(&self, _url: &Url) -> Result<PollResponse, ClientError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn fetch_snapshot(&self, _url: &Url) -> Result<String, ClientError> {
            std::future::pending().await
        }
    }

    fn complete_params() -> ConnectionParams {
        ConnectionParams {
            app_id: Some("demo-app".into()),
            base_url: Some("http://127.0.0.1:9".into()),
            cluster: Some("default".into()),
            namespace: Some("app.properties".into()),
        }
    }

    fn supervisor(params: impl ParamSource + 'static) -> WatcherSupervisor {
        WatcherSupervisor::new(
            params,
            Arc::new(HangingTransport::default()),
            Arc::new(ConfigStore::default()),
        )
    }

    fn wait_for_exit(supervisor: &WatcherSupervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.watcher_finished() != Some(true) {
            assert!(Instant::now() < deadline, "watcher thread did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    #[traced_test]
    fn missing_parameters_do_not_start() {
        let supervisor = supervisor(ConnectionParams {
            cluster: None,
            ..complete_params()
        });
        assert_eq!(
            supervisor.tick(),
            TickOutcome::MissingParameters(vec!["cluster"])
        );
        assert_eq!(
            supervisor.tick(),
            TickOutcome::MissingParameters(vec!["cluster"])
        );
        assert!(!supervisor.is_started());
        assert_eq!(supervisor.watcher_finished(), None);
        assert_eq!(supervisor.notification_version(), None);
        assert!(logs_contain("connection parameters are not complete"));
    }

    #[test]
    fn invalid_url_does_not_start() {
        let supervisor = supervisor(ConnectionParams {
            base_url: Some("config.local".into()),
            ..complete_params()
        });
        assert!(matches!(
            supervisor.tick(),
            TickOutcome::InvalidParameters(_)
        ));
        assert!(!supervisor.is_started());
    }

    #[test]
    fn parameters_published_later_are_picked_up() {
        let published = Arc::new(AtomicBool::new(false));
        let source = {
            let published = Arc::clone(&published);
            move || {
                if published.load(Ordering::SeqCst) {
                    complete_params()
                } else {
                    ConnectionParams::default()
                }
            }
        };
        let supervisor = supervisor(source);

        assert!(matches!(
            supervisor.tick(),
            TickOutcome::MissingParameters(_)
        ));
        published.store(true, Ordering::SeqCst);
        assert_eq!(supervisor.tick(), TickOutcome::Started);
        assert_eq!(supervisor.tick(), TickOutcome::AlreadyStarted);
        assert_eq!(supervisor.notification_version(), Some(-1));

        supervisor.shutdown();
        wait_for_exit(&supervisor);
    }

    #[test]
    fn concurrent_ticks_start_exactly_one_watcher() {
        let supervisor = supervisor(complete_params());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let supervisor = supervisor.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    supervisor.tick()
                })
            })
            .collect();
        let outcomes: Vec<TickOutcome> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == TickOutcome::Started)
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == TickOutcome::AlreadyStarted)
                .count(),
            1
        );
        assert!(supervisor.is_started());

        supervisor.shutdown();
        wait_for_exit(&supervisor);
    }

    #[test]
    fn shutdown_interrupts_held_long_poll() {
        let transport = Arc::new(HangingTransport::default());
        let supervisor = WatcherSupervisor::new(
            complete_params(),
            transport.clone(),
            Arc::new(ConfigStore::default()),
        );
        assert_eq!(supervisor.tick(), TickOutcome::Started);

        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.polls.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "watcher never polled");
            std::thread::sleep(Duration::from_millis(10));
        }

        supervisor.shutdown();
        wait_for_exit(&supervisor);
        assert_eq!(supervisor.tick(), TickOutcome::ShutDown);
        assert!(supervisor.is_started());
    }

    #[tokio::test]
    async fn disabled_settings_never_schedule() {
        let supervisor = supervisor(complete_params());
        let settings = SyncSettings {
            enabled: false,
            ..SyncSettings::default()
        };
        assert!(supervisor.start(&settings).is_none());
        assert!(!supervisor.is_started());
    }

    #[tokio::test]
    async fn schedule_starts_watcher_and_stops_on_shutdown() {
        let supervisor = supervisor(complete_params());
        let settings = SyncSettings {
            check_interval: Duration::from_millis(20),
            ..SyncSettings::default()
        };
        let schedule = supervisor.start(&settings).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !supervisor.is_started() {
            assert!(tokio::time::Instant::now() < deadline, "watcher never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        supervisor.shutdown();
        schedule.await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while supervisor.watcher_finished() != Some(true) {
            assert!(tokio::time::Instant::now() < deadline, "watcher thread did not exit");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
