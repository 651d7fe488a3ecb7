//! Key/value persistence shared by the data server and the miner: the
//! embedded sled store, the proxy abstraction, and the JSON-RPC bridge used
//! when the two run in separate processes.

pub mod db;
pub mod keys;
pub mod proxy;
pub mod remote;

pub use db::Db;
pub use proxy::{get_if_present, DataProxy, LocalProxy, ProxyKind, StoreError, StoreFuture};
pub use remote::{RemoteProxy, RemoteStoreServer};
