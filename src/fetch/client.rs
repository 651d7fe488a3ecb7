//! HTTP client wrapper that turns a `FetchRequest` into a body, retrying
//! transient failures inside the request's deadline.

use crate::fetch::backoff::{retry_with_backoff, RetryDisposition, RetryError, RetryPolicy};
use crate::fetch::options::FetchOptions;
use crate::fetch::request::FetchRequest;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum FetchError {
    InvalidUrl {
        url: String,
        reason: String,
    },
    Timeout {
        url: String,
        timeout: Duration,
    },
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },
    BadResponse {
        url: String,
        status: u16,
    },
    Cancelled {
        url: String,
    },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::InvalidUrl { url, .. }
            | FetchError::Timeout { url, .. }
            | FetchError::RetriesExhausted { url, .. }
            | FetchError::BadResponse { url, .. }
            | FetchError::Cancelled { url } => url,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUrl { url, reason } => write!(f, "invalid feed url {url}: {reason}"),
            FetchError::Timeout { url, timeout } => {
                write!(f, "fetching {url} timed out after {}ms", timeout.as_millis())
            }
            FetchError::RetriesExhausted {
                url,
                attempts,
                last_error,
            } => write!(
                f,
                "fetching {url} failed after {attempts} attempts: {last_error}"
            ),
            FetchError::BadResponse { url, status } => {
                write!(f, "{url} answered with HTTP status {status}")
            }
            FetchError::Cancelled { url } => write!(f, "fetching {url} was cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug)]
enum AttemptFailure {
    Transport(reqwest::Error),
    Status(StatusCode),
    Body(reqwest::Error),
    Cancelled,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport(err) => write!(f, "request failed: {err}"),
            AttemptFailure::Status(status) => write!(f, "unexpected status {status}"),
            AttemptFailure::Body(err) => write!(f, "failed to read body: {err}"),
            AttemptFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Feed fetcher shared by every tracker of a data server.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    options: FetchOptions,
    telemetry: Option<Arc<Telemetry>>,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            client: Client::new(),
            options: FetchOptions::default(),
            telemetry: None,
        }
    }
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_options(FetchOptions::default())
    }

    pub fn with_options(options: FetchOptions) -> Result<Self> {
        options.validate()?;
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .context("failed to build feed HTTP client")?;

        Ok(Self {
            client,
            options,
            telemetry: None,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// GETs `request.url()`, retrying transport errors and non-2xx statuses
    /// until the attempt budget or the request deadline runs out.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let raw_url = request.url();
        let url = parse_feed_url(raw_url)?;
        let deadline = request.timeout();
        let policy = RetryPolicy::fixed(self.options.retry_delay, self.options.max_attempts)
            .with_cancellation(request.cancellation());

        let attempts = retry_with_backoff(
            policy,
            |_| self.attempt(url.clone(), deadline, request.cancellation()),
            |attempt, delay, err| {
                tracing::warn!(
                    url = raw_url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "feed request failed; retrying"
                );
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_fetch_retry();
                }
            },
            |_, err| match err {
                AttemptFailure::Cancelled => RetryDisposition::Abort,
                AttemptFailure::Transport(inner) if inner.is_builder() => RetryDisposition::Abort,
                _ => RetryDisposition::Retry,
            },
        );

        let outcome = match timeout(deadline, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_fetch_timeout();
                }
                tracing::warn!(
                    url = raw_url,
                    timeout_ms = deadline.as_millis() as u64,
                    "feed request deadline exceeded"
                );
                return Err(FetchError::Timeout {
                    url: raw_url.to_owned(),
                    timeout: deadline,
                });
            }
        };

        outcome.map_err(|err| match err {
            RetryError::Cancelled | RetryError::Aborted(AttemptFailure::Cancelled) => {
                FetchError::Cancelled {
                    url: raw_url.to_owned(),
                }
            }
            RetryError::Aborted(failure) => FetchError::InvalidUrl {
                url: raw_url.to_owned(),
                reason: failure.to_string(),
            },
            RetryError::Exhausted {
                last: AttemptFailure::Status(status),
                ..
            } => FetchError::BadResponse {
                url: raw_url.to_owned(),
                status: status.as_u16(),
            },
            RetryError::Exhausted { attempts, last } => FetchError::RetriesExhausted {
                url: raw_url.to_owned(),
                attempts,
                last_error: last.to_string(),
            },
        })
    }

    async fn attempt(
        &self,
        url: Url,
        deadline: Duration,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, AttemptFailure> {
        let exchange = async {
            let response = self
                .client
                .get(url)
                .timeout(deadline)
                .send()
                .await
                .map_err(AttemptFailure::Transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(AttemptFailure::Status(status));
            }
            let body = response.bytes().await.map_err(AttemptFailure::Body)?;
            Ok(body.to_vec())
        };

        match cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(AttemptFailure::Cancelled),
                result = exchange => result,
            },
            None => exchange.await,
        }
    }
}

static DEFAULT_FETCHER: OnceLock<HttpFetcher> = OnceLock::new();

/// Fetches through a process-wide fetcher built with default options.
pub async fn fetch_with_retries(request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
    DEFAULT_FETCHER
        .get_or_init(HttpFetcher::default)
        .fetch(request)
        .await
}

fn parse_feed_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|err| FetchError::InvalidUrl {
        url: raw.to_owned(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url)
}
