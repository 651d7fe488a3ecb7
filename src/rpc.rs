//! Chain access: the JSON-RPC node client, the oracle contract reader seam,
//! request options, and quantity helpers.

pub mod client;
pub mod contract;
pub mod helpers;
pub mod options;

pub use client::{ChainClient, EthRpcClient, RpcError, RpcFuture};
pub use contract::{CurrentChallenge, OracleContract};
pub use helpers::{encode_quantity, normalize_address, parse_quantity};
pub use options::RpcClientOptions;
