//! Cloud metadata backend
//!
//! Every attribute of a cloud object lives in that object's flat metadata
//! dictionary. The service only offers "replace the whole dictionary", so each
//! mutation is fetch, modify, replace. The fetched dictionary is local to one
//! logical operation and never reused by the next call.
//!
//! Mutations on one object are serialized within this process by an
//! [`ItemLockManager`]. Writers in other processes are not; between them the
//! last replace wins and a concurrent change to the same object can be lost.
//!
//! Keys that do not decode into this store's namespace belong to someone else
//! and are carried through every replace untouched.

pub mod client;
pub mod memory;

pub use client::{BlobMetadataClient, MetadataMap, ObjectMetadataClient};
pub use memory::MemoryObjectClient;

use super::AttributeBackend;
use crate::codec::AttributeKeyCodec;
use crate::concurrency::ItemLockManager;
use crate::error::{AttrError, Result};
use crate::types::{
    AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind, ItemPath,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct CloudMetadataBackend {
    client: Arc<dyn ObjectMetadataClient>,
    codec: AttributeKeyCodec,
    locks: ItemLockManager,
    timeout: Duration,
}

impl CloudMetadataBackend {
    /// Every client call is abandoned after `timeout`.
    pub fn new(
        client: Arc<dyn ObjectMetadataClient>,
        codec: AttributeKeyCodec,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            codec,
            locks: ItemLockManager::new(),
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        object: &ItemPath,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(elapsed) => Err(AttrError::backend(
                format!(
                    "Timed out after {:?} trying to {} {}",
                    self.timeout, operation, object
                ),
                elapsed,
            )),
        }
    }

    async fn fetch(&self, object: &ItemPath) -> Result<Option<MetadataMap>> {
        self.bounded("fetch metadata of", object, self.client.fetch_metadata(object))
            .await
    }

    async fn replace(&self, object: &ItemPath, metadata: &MetadataMap) -> Result<()> {
        self.bounded(
            "replace metadata of",
            object,
            self.client.replace_metadata(object, metadata),
        )
        .await
    }

    fn is_owned(&self, key: &str) -> bool {
        self.codec.decode_metadata_key(key).is_some()
    }

    /// Drop every key that decodes to `name`. True if anything was removed.
    fn remove_key(&self, metadata: &mut MetadataMap, name: &AttributeName) -> bool {
        let before = metadata.len();
        metadata.retain(|key, _| self.codec.decode_metadata_key(key).as_ref() != Some(name));
        metadata.len() != before
    }

    /// Owned entries of `metadata`, re-keyed to the canonical encoding.
    fn owned_entries(&self, metadata: &MetadataMap) -> MetadataMap {
        metadata
            .iter()
            .filter_map(|(key, value)| {
                let name = self.codec.decode_metadata_key(key)?;
                Some((self.codec.metadata_key(&name), value.clone()))
            })
            .collect()
    }

    /// Make `destination` carry the owned entries of `source`. Returns the
    /// source dictionary as fetched. Callers hold both item locks.
    async fn copy_locked(
        &self,
        source: &ItemPath,
        destination: &ItemPath,
    ) -> Result<Option<MetadataMap>> {
        let source_metadata = self.fetch(source).await?;
        let current = self
            .fetch(destination)
            .await?
            .ok_or_else(|| AttrError::target_missing(destination))?;

        let mut updated = current.clone();
        updated.retain(|key, _| !self.is_owned(key));
        if let Some(metadata) = &source_metadata {
            updated.extend(self.owned_entries(metadata));
        }
        if updated != current {
            self.replace(destination, &updated).await?;
        }
        Ok(source_metadata)
    }
}

fn require_object(path: &ItemPath) -> Result<()> {
    if path.is_root() {
        return Err(AttrError::invalid_path(
            "/",
            "the container root is not a cloud object",
        ));
    }
    Ok(())
}

#[async_trait]
impl AttributeBackend for CloudMetadataBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            per_attribute_delete: true,
            atomic_copy: true,
            atomic_move: false,
        }
    }

    async fn is_supported(&self, path: &ItemPath) -> bool {
        if path.is_root() {
            return false;
        }
        match self.fetch(path).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!("Cloud object {} not usable for attributes: {}", path, e);
                false
            }
        }
    }

    async fn get(&self, path: &ItemPath, name: &AttributeName) -> Result<Option<AttributeValue>> {
        if path.is_root() {
            return Ok(None);
        }
        let Some(metadata) = self.fetch(path).await? else {
            return Ok(None);
        };
        let raw = metadata
            .iter()
            .find(|(key, _)| self.codec.decode_metadata_key(key).as_ref() == Some(name))
            .map(|(_, value)| value);
        raw.map(|value| self.codec.decode_metadata_value(value))
            .transpose()
    }

    async fn set(&self, path: &ItemPath, name: &AttributeName, value: &str) -> Result<()> {
        require_object(path)?;
        let _guard = self.locks.lock(path).await;
        let mut metadata = self
            .fetch(path)
            .await?
            .ok_or_else(|| AttrError::target_missing(path))?;
        self.remove_key(&mut metadata, name);
        metadata.insert(
            self.codec.metadata_key(name),
            self.codec.encode_metadata_value(value),
        );
        self.replace(path, &metadata).await?;
        debug!("Set cloud attribute {} on {}", name, path);
        Ok(())
    }

    async fn delete(&self, path: &ItemPath, name: &AttributeName) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let _guard = self.locks.lock(path).await;
        let Some(mut metadata) = self.fetch(path).await? else {
            return Ok(());
        };
        if self.remove_key(&mut metadata, name) {
            self.replace(path, &metadata).await?;
            debug!("Deleted cloud attribute {} on {}", name, path);
        }
        Ok(())
    }

    async fn list(&self, path: &ItemPath) -> Result<AttributeSet> {
        if path.is_root() {
            return Ok(AttributeSet::new());
        }
        let Some(metadata) = self.fetch(path).await? else {
            return Ok(AttributeSet::new());
        };
        let mut set = AttributeSet::new();
        for (key, value) in &metadata {
            if let Some(name) = self.codec.decode_metadata_key(key) {
                set.insert(name, self.codec.decode_metadata_value(value)?);
            }
        }
        Ok(set)
    }

    async fn delete_all(&self, path: &ItemPath) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let _guard = self.locks.lock(path).await;
        let Some(mut metadata) = self.fetch(path).await? else {
            return Ok(());
        };
        let before = metadata.len();
        metadata.retain(|key, _| !self.is_owned(key));
        if metadata.len() != before {
            self.replace(path, &metadata).await?;
            debug!("Cleared cloud attributes of {}", path);
        }
        Ok(())
    }

    async fn copy(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        require_object(source)?;
        require_object(destination)?;
        if source == destination {
            return Ok(());
        }
        let _guards = self.locks.lock_pair(source, destination).await;
        self.copy_locked(source, destination).await?;
        debug!("Copied cloud attributes {} -> {}", source, destination);
        Ok(())
    }

    async fn move_to(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        require_object(source)?;
        require_object(destination)?;
        if source == destination {
            return Ok(());
        }
        let _guards = self.locks.lock_pair(source, destination).await;
        if self.fetch(source).await?.is_none() {
            // The object itself was already moved; its metadata went with it.
            debug!("Cloud object {} is gone, nothing to move", source);
            return Ok(());
        }

        let Some(mut metadata) = self.copy_locked(source, destination).await? else {
            return Ok(());
        };
        let before = metadata.len();
        metadata.retain(|key, _| !self.is_owned(key));
        if metadata.len() != before {
            match self.replace(source, &metadata).await {
                Ok(()) => {}
                Err(AttrError::TargetMissing { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("Moved cloud attributes {} -> {}", source, destination);
        Ok(())
    }
}
