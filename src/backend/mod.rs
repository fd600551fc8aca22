//! Attribute backends
//!
//! One trait, three storage strategies. The selector picks exactly one
//! implementation at startup and the facade holds it for the process lifetime.

pub mod cloud;
pub mod native;
pub mod shadow;

use crate::error::{AttrError, Result};
use crate::types::{
    AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind, ItemPath,
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

pub use cloud::CloudMetadataBackend;
pub use native::NativeStreamBackend;
pub use shadow::ShadowTreeBackend;

/// Result of a store consistency check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Number of attribute sets examined.
    pub scanned_sets: usize,
    /// Attribute sets whose owning item no longer exists.
    pub orphaned: Vec<ItemPath>,
    /// Store-private entries left behind by interrupted operations.
    pub leftovers: Vec<PathBuf>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.leftovers.is_empty()
    }
}

/// Storage strategy for item attributes.
///
/// `delete_all`, `copy` and `move_to` address the whole attribute set of an
/// item. `copy` and `move_to` replace the destination set, so afterwards it
/// equals the source set as it was before the call.
#[async_trait]
pub trait AttributeBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// Whether attributes can be stored for `path` at all. Never fails.
    async fn is_supported(&self, path: &ItemPath) -> bool;

    /// Existence check; must not create backing storage.
    async fn has(&self, path: &ItemPath, name: &AttributeName) -> Result<bool> {
        Ok(self.get(path, name).await?.is_some())
    }

    async fn get(&self, path: &ItemPath, name: &AttributeName) -> Result<Option<AttributeValue>>;

    async fn set(&self, path: &ItemPath, name: &AttributeName, value: &str) -> Result<()>;

    /// Idempotent: deleting an absent attribute succeeds.
    async fn delete(&self, path: &ItemPath, name: &AttributeName) -> Result<()>;

    async fn list(&self, path: &ItemPath) -> Result<AttributeSet>;

    async fn delete_all(&self, path: &ItemPath) -> Result<()>;

    async fn copy(&self, source: &ItemPath, destination: &ItemPath) -> Result<()>;

    async fn move_to(&self, source: &ItemPath, destination: &ItemPath) -> Result<()>;

    /// Look for attribute sets that outlived their items.
    async fn check(&self) -> Result<ConsistencyReport> {
        Ok(ConsistencyReport::default())
    }

    /// Remove store-private leftovers named by a previous [`check`](Self::check).
    /// Returns how many entries were removed.
    async fn remove_leftovers(&self, _leftovers: &[PathBuf]) -> Result<usize> {
        Ok(0)
    }
}

/// Run blocking filesystem work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AttrError::backend("Blocking attribute task failed", e))?
}
