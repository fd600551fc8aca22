//! In-process object table implementing [`ObjectMetadataClient`].
//!
//! Used for dry runs (`endpoint = "memory:"`) and tests. An optional latency is
//! injected before every call so that racing read-modify-write sequences
//! actually overlap.

use super::client::{MetadataMap, ObjectMetadataClient};
use crate::error::{AttrError, Result};
use crate::types::ItemPath;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryObjectClient {
    objects: Mutex<HashMap<ItemPath, MetadataMap>>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
    replaces: AtomicUsize,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Create an object with an empty dictionary. Existing objects are kept.
    pub fn create_object(&self, object: &ItemPath) {
        self.objects.lock().entry(object.clone()).or_default();
    }

    /// Current raw dictionary of `object`, bypassing latency and counters.
    pub fn metadata(&self, object: &ItemPath) -> Option<MetadataMap> {
        self.objects.lock().get(object).cloned()
    }

    /// Put a raw key straight into an object's dictionary, creating the
    /// object if needed.
    pub fn insert_raw(&self, object: &ItemPath, key: &str, value: &str) {
        self.objects
            .lock()
            .entry(object.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ObjectMetadataClient for MemoryObjectClient {
    async fn fetch_metadata(&self, object: &ItemPath) -> Result<Option<MetadataMap>> {
        self.delay().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().get(object).cloned())
    }

    async fn replace_metadata(&self, object: &ItemPath, metadata: &MetadataMap) -> Result<()> {
        self.delay().await;
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock();
        let entry = objects
            .get_mut(object)
            .ok_or_else(|| AttrError::target_missing(object))?;
        *entry = metadata.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
