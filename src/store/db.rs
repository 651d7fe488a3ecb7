use crate::store::proxy::StoreError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Embedded key/value store backed by sled.
///
/// Cloning is cheap and every clone refers to the same tree. Each `put` is a
/// single sled insert, so readers observe either the old or the new value and
/// never a partial write.
#[derive(Debug, Clone)]
pub struct Db {
    tree: sled::Db,
    path: Option<PathBuf>,
    closed: Arc<AtomicBool>,
}

impl Db {
    /// Opens (or creates) the store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tree = sled::open(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        tracing::info!(path = %path.display(), "opened key/value store");
        Ok(Self {
            tree,
            path: Some(path.to_path_buf()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens a store that lives only as long as this process.
    pub fn temporary() -> Result<Self> {
        let tree = sled::Config::new()
            .temporary(true)
            .open()
            .context("failed to open temporary store")?;
        Ok(Self {
            tree,
            path: None,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.tree
            .insert(key.as_bytes(), value)
            .map(|_| ())
            .map_err(backend_error)
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.ensure_open()?;
        match self.tree.get(key.as_bytes()).map_err(backend_error)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StoreError::NotFound {
                key: key.to_owned(),
            }),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        self.tree.contains_key(key.as_bytes()).map_err(backend_error)
    }

    /// Flushes outstanding writes. Safe to call while other handles are in use.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.tree
            .flush_async()
            .await
            .map(|_| ())
            .map_err(backend_error)
    }

    /// Flushes and rejects further operations on every clone. A second close is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tree.flush().map_err(backend_error)?;
        tracing::info!(path = ?self.path, "closed key/value store");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

fn backend_error(err: sled::Error) -> StoreError {
    StoreError::Backend {
        reason: err.to_string(),
    }
}
