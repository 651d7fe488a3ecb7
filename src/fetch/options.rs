//! Retry budget and transport knobs for the feed fetcher.

use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_USER_AGENT: &str = concat!("oracled/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl FetchOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent cannot be empty");
        }
        Ok(())
    }
}
