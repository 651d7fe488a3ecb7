pub mod dataserver;
pub mod fetch;
pub mod miner;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod tracker;

pub use dataserver::{DataServer, DataServerParams};
pub use fetch::{fetch_with_retries, FetchError, FetchOptions, FetchRequest, HttpFetcher};
pub use miner::{MiningManager, SubmitFuture, Submitter, WorkSnapshot};
pub use rpc::{ChainClient, CurrentChallenge, EthRpcClient, OracleContract, RpcError};
pub use runtime::config::{ConfigError, NodeConfig, NodeConfigBuilder, NodeConfigParams, ProxyMode};
pub use runtime::runner::Runner;
pub use runtime::status::{ReadySignal, RunningFlag};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{DataProxy, Db, LocalProxy, ProxyKind, RemoteProxy, RemoteStoreServer, StoreError};
pub use tracker::{
    Tracker, TrackerContext, TrackerError, TrackerFuture, TrackerRegistry, TrackerScheduler,
};
