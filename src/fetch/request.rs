use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A single feed query: the URL to GET and the hard deadline covering every
/// attempt made for it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            cancellation: None,
        }
    }

    /// Aborts the fetch (without further retries) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}
