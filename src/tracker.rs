//! Periodic collectors of external state. Each tracker derives one value,
//! falls back deterministically when a source fails, and persists the result
//! through the data proxy.

pub mod balance;
pub mod current_variables;
pub mod gas;
pub mod registry;
pub mod scheduler;

use crate::fetch::{FetchError, HttpFetcher};
use crate::rpc::{ChainClient, OracleContract, RpcError};
use crate::runtime::telemetry::Telemetry;
use crate::store::{DataProxy, StoreError};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub use balance::BalanceTracker;
pub use current_variables::CurrentVariablesTracker;
pub use gas::GasTracker;
pub use registry::{BuiltTrackers, TrackerConstructor, TrackerRegistry};
pub use scheduler::{SchedulerState, TrackerScheduler};

pub type TrackerFuture<'a> = BoxFuture<'a, Result<(), TrackerError>>;

#[derive(Debug)]
pub enum TrackerError {
    /// A source answered with data the tracker could not interpret.
    Decode { tracker: String, reason: String },
    Rpc(RpcError),
    Fetch(FetchError),
    Store(StoreError),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Decode { tracker, reason } => {
                write!(f, "{tracker} tracker could not decode its source: {reason}")
            }
            TrackerError::Rpc(err) => write!(f, "{err}"),
            TrackerError::Fetch(err) => write!(f, "{err}"),
            TrackerError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Decode { .. } => None,
            TrackerError::Rpc(err) => Some(err),
            TrackerError::Fetch(err) => Some(err),
            TrackerError::Store(err) => Some(err),
        }
    }
}

/// Capabilities shared by every tracker of one data server.
#[derive(Clone)]
pub struct TrackerContext {
    pub client: Arc<dyn ChainClient>,
    pub contract: Option<Arc<dyn OracleContract>>,
    pub proxy: Arc<dyn DataProxy>,
    pub fetcher: HttpFetcher,
    pub telemetry: Arc<Telemetry>,
}

impl TrackerContext {
    pub fn new(client: Arc<dyn ChainClient>, proxy: Arc<dyn DataProxy>) -> Self {
        Self {
            client,
            contract: None,
            proxy,
            fetcher: HttpFetcher::default(),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn with_contract(mut self, contract: Arc<dyn OracleContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn with_fetcher(mut self, fetcher: HttpFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Writes `value` under `key` and counts the write.
    pub async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), TrackerError> {
        self.proxy
            .put(key, value)
            .await
            .map_err(TrackerError::Store)?;
        self.telemetry.record_store_write();
        Ok(())
    }
}

impl fmt::Debug for TrackerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerContext")
            .field("proxy", &self.proxy.kind())
            .field("has_contract", &self.contract.is_some())
            .finish_non_exhaustive()
    }
}

pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one collection step. Errors are reported to the scheduler, which
    /// logs them and moves on to the next tracker.
    fn exec<'a>(&'a self, ctx: &'a TrackerContext) -> TrackerFuture<'a>;
}
