// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP access to the remote configuration service.
//!
//! [`ConfigClient`] is a thin wrapper around a pooled `reqwest::Client`. It
//! returns raw statuses and bodies and leaves every protocol decision to the
//! watcher. The [`ConfigTransport`] trait is the seam the watcher is written
//! against, so tests can substitute scripted transports.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, warn};

/// Time allowed to establish a TCP/TLS connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longer than the server-side long-poll hold so a quiet namespace never times out the client.
pub const READ_TIMEOUT: Duration = Duration::from_secs(61);
/// Ceiling on pooled connections: one outstanding long-poll plus occasional snapshot fetches.
pub const MAX_POOL_CONNECTIONS: usize = 5;
/// Total attempts for a snapshot fetch when the server closes without responding.
pub const SNAPSHOT_ATTEMPTS: u32 = 2;

/// Raw result of a long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server accepted the request but closed the connection without answering.
    #[error("no response received: {0}")]
    NoResponse(#[source] reqwest::Error),
    /// Any other transport failure (DNS, connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Snapshot endpoint answered with a non-success status.
    #[error("config service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if is_no_response(&err) {
            ClientError::NoResponse(err)
        } else {
            ClientError::Transport(err)
        }
    }
}

/// Network operations the watcher depends on.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    /// Issues a long-poll request. Holds for up to [`READ_TIMEOUT`].
    async fn long_poll(&self, url: &Url) -> Result<PollResponse, ClientError>;
    /// Fetches the full configuration snapshot body for a namespace.
    async fn fetch_snapshot(&self, url: &Url) -> Result<String, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ConfigClient {
    client: Client,
}

impl ConfigClient {
    pub fn new() -> Result<Self, ClientError> {
        // `timeout` bounds the whole exchange; long-poll bodies are tiny so this
        // behaves as a read timeout.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .pool_max_idle_per_host(MAX_POOL_CONNECTIONS)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, ClientError> {
        debug!(url = %url, "config service HTTP request");
        let response = self.client.get(url.clone()).send().await?;
        debug!(url = %url, status = %response.status(), "config service HTTP response");
        Ok(response)
    }

    async fn fetch_once(&self, url: &Url) -> Result<String, ClientError> {
        let response = self.get(url).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ConfigTransport for ConfigClient {
    async fn long_poll(&self, url: &Url) -> Result<PollResponse, ClientError> {
        let response = self.get(url).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(PollResponse { status, body })
    }

    async fn fetch_snapshot(&self, url: &Url) -> Result<String, ClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(ClientError::NoResponse(err)) if attempt < SNAPSHOT_ATTEMPTS => {
                    debug!(attempt, error = %err, "no response fetching config snapshot, retrying");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "failed to fetch config snapshot");
                    return Err(err);
                }
            }
        }
    }
}

/// Whether the server closed the connection before sending any response.
fn is_no_response(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return true;
            }
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
