//! JSON-RPC front for a [`Db`] so a miner in another process can share the
//! data server's store. Values travel hex encoded.

use crate::store::db::Db;
use crate::store::proxy::{DataProxy, ProxyKind, StoreError, StoreFuture};
use anyhow::{Context, Result};
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub const NOT_FOUND_CODE: i32 = -32004;
pub const STORE_CLOSED_CODE: i32 = -32005;
pub const BACKEND_ERROR_CODE: i32 = -32006;

const METHOD_PING: &str = "oracled_ping";
const METHOD_GET: &str = "oracled_get";
const METHOD_PUT: &str = "oracled_put";
const METHOD_HAS: &str = "oracled_has";

struct StoreContext {
    // One remote call at a time against the store.
    db: Mutex<Db>,
}

/// Serves `oracled_get`, `oracled_put`, `oracled_has` and `oracled_ping` over HTTP.
#[derive(Debug)]
pub struct RemoteStoreServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
}

impl RemoteStoreServer {
    /// Binds `addr` and starts serving `db`. The caller keeps ownership of the
    /// `Db`; stopping the server never closes it.
    pub async fn start(db: Db, addr: SocketAddr) -> Result<Self> {
        let server = Server::builder()
            .build(addr)
            .await
            .with_context(|| format!("failed to bind remote store server on {addr}"))?;
        let local_addr = server
            .local_addr()
            .context("failed to read remote store server address")?;

        let module = build_module(db)?;
        let handle = server.start(module);
        tracing::info!(addr = %local_addr, "remote store server listening");

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stops accepting calls and waits for the server task to wind down.
    pub async fn stop(&self) {
        if self.handle.stop().is_ok() {
            tracing::info!(addr = %self.local_addr, "stopping remote store server");
        }
        self.handle.clone().stopped().await;
    }
}

fn build_module(db: Db) -> Result<RpcModule<StoreContext>> {
    let mut module = RpcModule::new(StoreContext { db: Mutex::new(db) });

    module
        .register_method(METHOD_PING, |_, _, _| String::from("pong"))
        .context("failed to register ping")?;

    module
        .register_async_method(METHOD_GET, |params, ctx, _| async move {
            let key: String = params.one()?;
            let db = ctx.db.lock().await;
            db.get(&key).map(hex::encode).map_err(to_error_object)
        })
        .context("failed to register get")?;

    module
        .register_async_method(METHOD_PUT, |params, ctx, _| async move {
            let (key, value): (String, String) = params.parse()?;
            let bytes = hex::decode(&value).map_err(|err| {
                ErrorObjectOwned::owned(
                    jsonrpsee::types::error::INVALID_PARAMS_CODE,
                    format!("value is not valid hex: {err}"),
                    None::<()>,
                )
            })?;
            let db = ctx.db.lock().await;
            db.put(&key, &bytes).map_err(to_error_object)?;
            Ok::<bool, ErrorObjectOwned>(true)
        })
        .context("failed to register put")?;

    module
        .register_async_method(METHOD_HAS, |params, ctx, _| async move {
            let key: String = params.one()?;
            let db = ctx.db.lock().await;
            db.has(&key).map_err(to_error_object)
        })
        .context("failed to register has")?;

    Ok(module)
}

fn to_error_object(err: StoreError) -> ErrorObjectOwned {
    let code = match &err {
        StoreError::NotFound { .. } => NOT_FOUND_CODE,
        StoreError::Closed => STORE_CLOSED_CODE,
        StoreError::Unreachable { .. } | StoreError::Backend { .. } => BACKEND_ERROR_CODE,
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

/// Proxy that talks to a [`RemoteStoreServer`] in another process.
///
/// Never owns the store it fronts; `close` only stops this handle.
#[derive(Debug)]
pub struct RemoteProxy {
    endpoint: String,
    client: HttpClient,
    closed: AtomicBool,
}

impl RemoteProxy {
    /// Builds the client and pings the peer, failing with
    /// [`StoreError::Unreachable`] if it does not answer within `timeout`.
    pub async fn connect(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(&endpoint)
            .map_err(|err| StoreError::Unreachable {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;

        let proxy = Self {
            endpoint,
            client,
            closed: AtomicBool::new(false),
        };

        match tokio::time::timeout(timeout, proxy.call::<String>(METHOD_PING, rpc_params![], ""))
            .await
        {
            Ok(Ok(_)) => {
                tracing::info!(endpoint = %proxy.endpoint, "connected to remote store");
                Ok(proxy)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StoreError::Unreachable {
                endpoint: proxy.endpoint.clone(),
                reason: format!("no answer within {timeout:?}"),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<R>(
        &self,
        method: &'static str,
        params: jsonrpsee::core::params::ArrayParams,
        key: &str,
    ) -> Result<R, StoreError>
    where
        R: serde::de::DeserializeOwned,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.client
            .request::<R, _>(method, params)
            .await
            .map_err(|err| self.map_error(key, err))
    }

    fn map_error(&self, key: &str, err: JsonRpcError) -> StoreError {
        match err {
            JsonRpcError::Call(obj) if obj.code() == NOT_FOUND_CODE => StoreError::NotFound {
                key: key.to_owned(),
            },
            JsonRpcError::Call(obj) if obj.code() == STORE_CLOSED_CODE => StoreError::Closed,
            JsonRpcError::Call(obj) => StoreError::Backend {
                reason: format!("code={} message={}", obj.code(), obj.message()),
            },
            JsonRpcError::ParseError(err) => StoreError::Backend {
                reason: format!("malformed response: {err}"),
            },
            other => StoreError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl DataProxy for RemoteProxy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Remote
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let encoded: String = self.call(METHOD_GET, rpc_params![key], key).await?;
            hex::decode(&encoded).map_err(|err| StoreError::Backend {
                reason: format!("value for {key} is not valid hex: {err}"),
            })
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _: bool = self
                .call(METHOD_PUT, rpc_params![key, hex::encode(value)], key)
                .await?;
            Ok(())
        })
    }

    fn has<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.call(METHOD_HAS, rpc_params![key], key).await })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                tracing::debug!(endpoint = %self.endpoint, "closed remote store proxy");
            }
            Ok(())
        })
    }
}
