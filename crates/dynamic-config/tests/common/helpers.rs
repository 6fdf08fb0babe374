// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for driving the watcher against local servers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dynamic_config::{ConfigClient, ConfigStore, ConfigWatcher, Flags, WatchTarget};
use mockito::Matcher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const APP_ID: &str = "demo-app";
pub const CLUSTER: &str = "default";
pub const NAMESPACE: &str = "app.properties";

pub fn defaults() -> Flags {
    Flags {
        trace_enabled: true,
        jvm_metrics_enabled: true,
    }
}

/// Watcher using the real HTTP client against `base_url`.
pub fn http_watcher(base_url: &str) -> (ConfigWatcher, Arc<ConfigStore>) {
    let store = Arc::new(ConfigStore::new(defaults()));
    let target = WatchTarget::new(base_url, APP_ID, CLUSTER, NAMESPACE).expect("target");
    let client = ConfigClient::new().expect("client");
    let watcher = ConfigWatcher::new(target, Arc::new(client), Arc::clone(&store));
    (watcher, store)
}

/// Query matcher for a long-poll announcing `version` for the watched namespace.
pub fn long_poll_query(version: i64) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("appId".into(), APP_ID.into()),
        Matcher::UrlEncoded("cluster".into(), CLUSTER.into()),
        Matcher::UrlEncoded(
            "notifications".into(),
            format!(r#"[{{"namespaceName":"{NAMESPACE}","notificationId":{version}}}]"#),
        ),
    ])
}

pub fn snapshot_path() -> String {
    format!("/configs/{APP_ID}/{CLUSTER}/{NAMESPACE}")
}

/// Accepts connections forever. The first `drop_first` requests are read and
/// then closed without a response; later ones receive `body` with status 200.
/// Returns the base URL and a counter of accepted connections.
pub async fn closing_server(drop_first: usize, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            if n <= drop_first {
                drop(socket);
                continue;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), accepted)
}
