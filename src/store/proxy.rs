use crate::store::db::Db;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

#[derive(Debug)]
pub enum StoreError {
    /// The key has never been written.
    NotFound { key: String },
    /// The remote peer could not be reached; says nothing about the data.
    Unreachable { endpoint: String, reason: String },
    /// The proxy or the underlying store has been closed.
    Closed,
    Backend { reason: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Unreachable { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { key } => write!(f, "key {key} not found"),
            StoreError::Unreachable { endpoint, reason } => {
                write!(f, "store at {endpoint} is unreachable: {reason}")
            }
            StoreError::Closed => write!(f, "store is closed"),
            StoreError::Backend { reason } => write!(f, "store backend error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Local,
    Remote,
}

/// Store access used by trackers and the miner.
///
/// Both variants report a missing key as [`StoreError::NotFound`]; only the
/// remote variant can fail with [`StoreError::Unreachable`].
pub trait DataProxy: Send + Sync {
    fn kind(&self) -> ProxyKind;

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Upserts `value`; the last writer wins.
    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()>;

    fn has<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Releases the proxy. Calling it twice is harmless.
    fn close(&self) -> StoreFuture<'_, ()>;
}

/// Reads `key`, mapping [`StoreError::NotFound`] to `None`.
pub async fn get_if_present(
    proxy: &dyn DataProxy,
    key: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    match proxy.get(key).await {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// In-process proxy over a [`Db`] opened by this process.
///
/// Closing the proxy flushes the store and rejects further calls through this
/// handle; the `Db` itself stays open for its owner.
#[derive(Debug)]
pub struct LocalProxy {
    db: Db,
    closed: AtomicBool,
}

impl LocalProxy {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl DataProxy for LocalProxy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Local
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.db.get(key)
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.db.put(key, &value)
        })
    }

    fn has<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            self.db.has(key)
        })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if self.db.is_closed() {
                return Ok(());
            }
            self.db.flush().await
        })
    }
}
