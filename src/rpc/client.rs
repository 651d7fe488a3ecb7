//! JSON-RPC client for an Ethereum-compatible node plus the `ChainClient`
//! trait trackers consume.

use crate::fetch::backoff::{retry_with_backoff, RetryDisposition, RetryError, RetryPolicy};
use crate::rpc::helpers::{parse_network_id, parse_quantity};
use crate::rpc::options::RpcClientOptions;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};
use tokio::time::{timeout, Instant};

pub type RpcFuture<'a, T> = BoxFuture<'a, Result<T, RpcError>>;

#[derive(Debug)]
pub enum RpcError {
    /// The node could not be reached or the connection broke.
    Transport { method: &'static str, reason: String },
    Timeout { method: &'static str },
    /// The node answered with a JSON-RPC error object.
    Rejected {
        method: &'static str,
        code: i32,
        message: String,
    },
    /// The answer did not have the expected shape.
    Decode { method: &'static str, reason: String },
}

impl RpcError {
    pub fn method(&self) -> &'static str {
        match self {
            RpcError::Transport { method, .. }
            | RpcError::Timeout { method }
            | RpcError::Rejected { method, .. }
            | RpcError::Decode { method, .. } => method,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport { .. } | RpcError::Timeout { .. })
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Transport { method, reason } => {
                write!(f, "rpc {method} transport failure: {reason}")
            }
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Rejected {
                method,
                code,
                message,
            } => write!(f, "rpc {method} rejected (code={code}, message={message})"),
            RpcError::Decode { method, reason } => {
                write!(f, "rpc {method} returned an undecodable result: {reason}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Chain reads needed by the trackers.
pub trait ChainClient: Send + Sync {
    fn network_id(&self) -> RpcFuture<'_, u64>;

    /// Node's gas price suggestion, in wei.
    fn suggest_gas_price(&self) -> RpcFuture<'_, u128>;

    /// Balance of `address` at the latest block, in wei.
    fn balance_at<'a>(&'a self, address: &'a str) -> RpcFuture<'a, u128>;
}

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    telemetry: Arc<Telemetry>,
}

impl ChainClient for EthRpcClient {
    fn network_id(&self) -> RpcFuture<'_, u64> {
        Box::pin(self.network_id())
    }

    fn suggest_gas_price(&self) -> RpcFuture<'_, u128> {
        Box::pin(self.suggest_gas_price())
    }

    fn balance_at<'a>(&'a self, address: &'a str) -> RpcFuture<'a, u128> {
        Box::pin(self.balance_at(address))
    }
}

impl EthRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client for {rpc_url}: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            telemetry: Arc::new(Telemetry::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    /// Counts every call's latency and outcome in `telemetry`, typically the
    /// runner's, so the metrics reporter logs them.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub async fn network_id(&self) -> Result<u64, RpcError> {
        const METHOD: &str = "net_version";
        let raw: String = self.call_with_retry(METHOD, || rpc_params![]).await?;
        parse_network_id(&raw).map_err(|err| decode_error(METHOD, err))
    }

    pub async fn suggest_gas_price(&self) -> Result<u128, RpcError> {
        const METHOD: &str = "eth_gasPrice";
        let raw: String = self.call_with_retry(METHOD, || rpc_params![]).await?;
        parse_quantity(&raw).map_err(|err| decode_error(METHOD, err))
    }

    pub async fn balance_at(&self, address: &str) -> Result<u128, RpcError> {
        const METHOD: &str = "eth_getBalance";
        let raw: String = self
            .call_with_retry(METHOD, || rpc_params![address, "latest"])
            .await?;
        parse_quantity(&raw).map_err(|err| decode_error(METHOD, err))
    }

    /// Retries transport failures and timeouts with exponential backoff; node
    /// rejections and decode failures are returned immediately.
    async fn call_with_retry<R, P>(&self, method: &'static str, params: P) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
        P: Fn() -> ArrayParams,
    {
        let policy = RetryPolicy::exponential(
            self.options.initial_backoff,
            self.options.max_backoff,
            self.options.max_attempts,
        );

        let outcome = retry_with_backoff(
            policy,
            |_| self.call_once(method, params()),
            |attempt, delay, err| {
                tracing::warn!(
                    method,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "rpc call failed; retrying"
                );
            },
            |_, err| {
                if err.is_transient() {
                    RetryDisposition::Retry
                } else {
                    RetryDisposition::Abort
                }
            },
        )
        .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(RetryError::Aborted(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::warn!(method, attempts, error = %last, "rpc retries exhausted");
                Err(last)
            }
            Err(RetryError::Cancelled) => Err(RpcError::Transport {
                method,
                reason: "cancelled".to_owned(),
            }),
        }
    }

    async fn call_once<R>(&self, method: &'static str, params: ArrayParams) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let result = timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await;

        match result {
            Err(_) => {
                self.telemetry.record_rpc_failure(start.elapsed(), true);
                Err(RpcError::Timeout { method })
            }
            Ok(Ok(value)) => {
                self.telemetry.record_rpc_success(start.elapsed());
                tracing::debug!(method, "rpc call completed");
                Ok(value)
            }
            Ok(Err(err)) => {
                let mapped = map_rpc_error(method, err);
                self.telemetry.record_rpc_failure(
                    start.elapsed(),
                    matches!(mapped, RpcError::Timeout { .. }),
                );
                Err(mapped)
            }
        }
    }
}

fn decode_error(method: &'static str, err: anyhow::Error) -> RpcError {
    RpcError::Decode {
        method,
        reason: format!("{err:#}"),
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> RpcError {
    match err {
        JsonRpcError::Call(obj) => RpcError::Rejected {
            method,
            code: obj.code(),
            message: obj.message().to_owned(),
        },
        JsonRpcError::ParseError(err) => RpcError::Decode {
            method,
            reason: err.to_string(),
        },
        JsonRpcError::RequestTimeout => RpcError::Timeout { method },
        other => RpcError::Transport {
            method,
            reason: other.to_string(),
        },
    }
}
