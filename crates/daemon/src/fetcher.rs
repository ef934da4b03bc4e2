use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use slog::{debug, warn, Logger};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

use crate::RateLimiter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(120);

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Still failing after the retry middleware gave up; worth trying next cycle
    #[error("transient upstream failure for {url}: {reason}")]
    Transient { url: String, reason: String },
    /// The upstream rejected the request itself
    #[error("upstream rejected {url} with {status}")]
    Permanent { url: String, status: StatusCode },
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Status codes the next cycle may succeed on.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

pub fn build_client(user_agent: &str) -> Result<ClientWithMiddleware, reqwest::Error> {
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_secs(1), MAX_RETRY_INTERVAL)
        .build_with_max_retries(3);
    Ok(ClientBuilder::new(
        Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?,
    )
    .with(RetryTransientMiddleware::new_with_policy(retry_policy))
    .build())
}

/// Rate-limited upstream client shared by every feed.
pub struct FeedFetcher {
    logger: Logger,
    client: ClientWithMiddleware,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl FeedFetcher {
    pub fn new(
        logger: Logger,
        user_agent: &str,
        rate_limiter: Arc<Mutex<RateLimiter>>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            logger,
            client: build_client(user_agent)?,
            rate_limiter,
        })
    }

    async fn wait_for_token(&self) {
        loop {
            let wait = match self.rate_limiter.lock().await.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!(self.logger, "rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.wait_for_token().await;

        debug!(self.logger, "requesting: {}", redact(url));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                url: redact(url),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(self.logger, "{} returned {}", redact(url), status);
            return Err(if is_retryable(status) {
                FetchError::Transient {
                    url: redact(url),
                    reason: status.to_string(),
                }
            } else {
                FetchError::Permanent {
                    url: redact(url),
                    status,
                }
            });
        }

        response.text().await.map_err(|e| FetchError::Transient {
            url: redact(url),
            reason: format!("error reading body: {}", e),
        })
    }

    /// Fetches and decodes a JSON body. A 204 (no data yet) decodes as `None`.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, FetchError> {
        let body = self.fetch_text(url).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| FetchError::Decode {
                url: redact(url),
                reason: e.to_string(),
            })
    }
}

/// Drops the query string so api keys never reach the logs or the audit table.
pub fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?…", base),
        None => url.to_string(),
    }
}
