//! HTTP surface of the model service

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::assets::{parse_tags, Asset};
use super::progress::{NdjsonDecoder, PullMessage, PullProgress};
use crate::core::OrchestratorResult;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Listing is small; anything slower than this means the service is wedged
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated between two chunks of a pull body
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How a pull stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The success sentinel arrived
    Succeeded,
    /// The service reported an error
    Failed(String),
    /// The body ended (or stalled) without a verdict
    Ended,
}

/// Thin client over `/api/tags` and `/api/pull`
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default http client");
                reqwest::Client::new()
            });

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One health probe: the listing endpoint answering 2xx
    pub async fn is_healthy(&self, timeout: Duration) -> bool {
        match self.http.get(self.endpoint("/api/tags")).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Installed assets, best-effort per entry
    pub async fn list_assets(&self) -> OrchestratorResult<Vec<Asset>> {
        let body = self
            .http
            .get(self.endpoint("/api/tags"))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_tags(&body)
    }

    /// Stream a pull, handing every progress snapshot to `on_progress`
    ///
    /// Fails only when the request itself cannot be made. A body that breaks
    /// off mid-stream ends as `PullOutcome::Ended`.
    pub async fn pull<F>(&self, name: &str, mut on_progress: F) -> OrchestratorResult<PullOutcome>
    where
        F: FnMut(PullProgress),
    {
        let response = self
            .http
            .post(self.endpoint("/api/pull"))
            .json(&json!({ "name": name, "stream": true }))
            .send()
            .await?
            .error_for_status()?;

        let mut body = response.bytes_stream();
        let mut decoder = NdjsonDecoder::new();

        loop {
            let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, body.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    warn!(asset = name, error = %e, "pull stream broke off");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(asset = name, "pull stream stalled");
                    break;
                }
            };

            for message in decoder.push(&chunk) {
                if let Some(outcome) = apply(message, &mut on_progress) {
                    return Ok(outcome);
                }
            }
        }

        for message in decoder.finish() {
            if let Some(outcome) = apply(message, &mut on_progress) {
                return Ok(outcome);
            }
        }

        Ok(PullOutcome::Ended)
    }
}

fn apply<F: FnMut(PullProgress)>(message: PullMessage, on_progress: &mut F) -> Option<PullOutcome> {
    match message {
        PullMessage::Progress(progress) => {
            let done = progress.is_success();
            on_progress(progress);
            done.then_some(PullOutcome::Succeeded)
        }
        PullMessage::Failed(error) => Some(PullOutcome::Failed(error)),
    }
}
