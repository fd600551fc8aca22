//! Attribute store facade
//!
//! The single entry point for callers. Validates paths and names before any
//! backend I/O, then forwards to the backend chosen at startup. Nothing is
//! cached between calls and no error is swallowed or retried.

use crate::backend::{AttributeBackend, ConsistencyReport};
use crate::codec::AttributeKeyCodec;
use crate::error::{AttrError, Result};
use crate::types::{
    AttributeKey, AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind,
    ItemPath, Namespace,
};
use std::sync::Arc;
use tracing::debug;

/// Uniform key/value attribute access over the active backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct AttributeStore {
    backend: Arc<dyn AttributeBackend>,
    codec: AttributeKeyCodec,
}

impl AttributeStore {
    pub fn new(backend: Arc<dyn AttributeBackend>, codec: AttributeKeyCodec) -> Self {
        Self { backend, codec }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    pub fn namespace(&self) -> &Namespace {
        self.codec.namespace()
    }

    /// Full key of one attribute, validated.
    pub fn key(&self, path: &str, name: &str) -> Result<AttributeKey> {
        let (path, name) = parse(path, name)?;
        Ok(AttributeKey::new(path, name, self.codec.namespace().clone()))
    }

    /// False for malformed paths too. Never fails.
    pub async fn is_supported(&self, path: &str) -> bool {
        match ItemPath::parse(path) {
            Ok(path) => self.backend.is_supported(&path).await,
            Err(_) => false,
        }
    }

    pub async fn has(&self, path: &str, name: &str) -> Result<bool> {
        let (path, name) = parse(path, name)?;
        self.backend.has(&path, &name).await
    }

    /// `None` when the attribute is absent. An empty string is a value.
    pub async fn get(&self, path: &str, name: &str) -> Result<Option<AttributeValue>> {
        let (path, name) = parse(path, name)?;
        self.backend.get(&path, &name).await
    }

    /// Like [`get`](Self::get), with absence as [`AttrError::NotFound`].
    pub async fn get_required(&self, path: &str, name: &str) -> Result<AttributeValue> {
        let (path, name) = parse(path, name)?;
        self.backend
            .get(&path, &name)
            .await?
            .ok_or_else(|| AttrError::NotFound {
                path: path.segments().join("/"),
                name: name.to_string(),
            })
    }

    pub async fn set(&self, path: &str, name: &str, value: &str) -> Result<()> {
        let (path, name) = parse(path, name)?;
        debug!("set {} {} ({} bytes)", path, name, value.len());
        self.backend.set(&path, &name, value).await
    }

    /// Idempotent.
    pub async fn delete(&self, path: &str, name: &str) -> Result<()> {
        let (path, name) = parse(path, name)?;
        debug!("delete {} {}", path, name);
        self.backend.delete(&path, &name).await
    }

    pub async fn list(&self, path: &str) -> Result<AttributeSet> {
        let path = ItemPath::parse(path)?;
        self.backend.list(&path).await
    }

    /// Remove every attribute of the item, and of its descendants on the
    /// filesystem backends.
    pub async fn delete_all(&self, path: &str) -> Result<()> {
        let path = ItemPath::parse(path)?;
        debug!("delete_all {}", path);
        self.backend.delete_all(&path).await
    }

    /// Duplicate the source set onto the destination, replacing its set.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<()> {
        let (source, destination) = (ItemPath::parse(source)?, ItemPath::parse(destination)?);
        debug!("copy {} -> {}", source, destination);
        self.backend.copy(&source, &destination).await
    }

    /// Relocate the source set. Atomic only where
    /// [`BackendCapabilities::atomic_move`] says so.
    pub async fn move_to(&self, source: &str, destination: &str) -> Result<()> {
        let (source, destination) = (ItemPath::parse(source)?, ItemPath::parse(destination)?);
        debug!("move {} -> {}", source, destination);
        self.backend.move_to(&source, &destination).await
    }

    /// Move that refuses to run on backends without atomic move.
    pub async fn move_to_atomic(&self, source: &str, destination: &str) -> Result<()> {
        if !self.capabilities().atomic_move {
            return Err(AttrError::Unsupported {
                backend: self.kind().as_str(),
                operation: "atomic move",
            });
        }
        self.move_to(source, destination).await
    }

    pub async fn check(&self) -> Result<ConsistencyReport> {
        self.backend.check().await
    }

    /// Delete orphaned sets and leftovers found by [`check`](Self::check).
    /// Returns the number of sets and entries removed.
    pub async fn purge(&self, report: &ConsistencyReport) -> Result<usize> {
        let mut removed = 0;
        for orphan in &report.orphaned {
            debug!("purging orphaned attributes of {}", orphan);
            self.backend.delete_all(orphan).await?;
            removed += 1;
        }
        removed += self.backend.remove_leftovers(&report.leftovers).await?;
        Ok(removed)
    }
}

fn parse(path: &str, name: &str) -> Result<(ItemPath, AttributeName)> {
    Ok((ItemPath::parse(path)?, AttributeName::new(name)?))
}
