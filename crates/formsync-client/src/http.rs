//! Shared HTTP plumbing: client construction, bounded retries and status
//! checks. Every failure comes back as `FormSyncError::ExternalCall` naming
//! the operation.

use std::time::Duration;

use formsync_core::{FormSyncError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

const USER_AGENT: &str = concat!("formsync/", env!("CARGO_PKG_VERSION"));

/// Retry settings for idempotent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A single try.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Send the request built by `build`, retrying transport errors and
    /// 5xx responses. Other responses are returned as they are.
    pub async fn send(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let retry = attempt < attempts;
            match build().send().await {
                Ok(response) if retry && response.status().is_server_error() => {
                    warn!(
                        operation,
                        attempt,
                        status = %response.status(),
                        "Server error; retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if retry => {
                    warn!(operation, attempt, error = %e, "Request failed; retrying");
                }
                Err(e) => return Err(FormSyncError::external(operation, e)),
            }
            tokio::time::sleep(self.backoff * attempt).await;
            attempt += 1;
        }
    }
}

pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| FormSyncError::external("build http client", e))
}

/// Fail on any non-2xx status, keeping the response body for the log.
pub(crate) async fn ensure_success(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FormSyncError::external(operation, status_detail(status, &body)))
}

pub(crate) async fn read_json<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    let response = ensure_success(operation, response).await?;
    response
        .json()
        .await
        .map_err(|e| FormSyncError::external(operation, e))
}

fn status_detail(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}
