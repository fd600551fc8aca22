//! Startup-time backend resolution.
//!
//! Runs once, before serving. The resulting [`AttributeStore`] holds exactly
//! one backend for the life of the process.

use crate::backend::cloud::{BlobMetadataClient, MemoryObjectClient, ObjectMetadataClient};
use crate::backend::{
    AttributeBackend, CloudMetadataBackend, NativeStreamBackend, ShadowTreeBackend,
};
use crate::codec::AttributeKeyCodec;
use crate::config::DavAttrConfig;
use crate::error::Result;
use crate::store::AttributeStore;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Checks whether native attributes work under a repository root.
pub type NativeProbe = Box<dyn Fn(&Path, &AttributeKeyCodec) -> bool + Send + Sync>;

/// Why a backend was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    /// A `[cloud]` section is configured.
    CloudConfigured,
    /// `attr_storage_path` is configured.
    ShadowConfigured,
    /// The native probe succeeded on the repository root.
    NativeProbe,
    /// The probe failed; shadow tree under the temp directory.
    TempFallback,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SelectionReason::CloudConfigured => "cloud storage configured",
            SelectionReason::ShadowConfigured => "attr_storage_path configured",
            SelectionReason::NativeProbe => "native attribute probe succeeded",
            SelectionReason::TempFallback => "native probe failed, temporary shadow tree",
        };
        f.write_str(text)
    }
}

/// Outcome of [`BackendSelector::select`].
pub struct Selection {
    pub store: AttributeStore,
    pub reason: SelectionReason,
}

pub struct BackendSelector {
    probe: NativeProbe,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            probe: Box::new(NativeStreamBackend::probe),
        }
    }

    /// Replace the native probe, e.g. to simulate a volume without xattrs.
    pub fn with_probe<F>(probe: F) -> Self
    where
        F: Fn(&Path, &AttributeKeyCodec) -> bool + Send + Sync + 'static,
    {
        Self {
            probe: Box::new(probe),
        }
    }

    /// Resolve the backend for a validated configuration.
    ///
    /// Order: cloud section, configured shadow root, native probe, temporary
    /// shadow root.
    pub fn select(&self, config: &DavAttrConfig) -> Result<Selection> {
        let codec = AttributeKeyCodec::new(config.namespace()?);
        let root = config.store.repository_root.clone();

        let (backend, reason): (Arc<dyn AttributeBackend>, SelectionReason) =
            if let Some(cloud) = &config.cloud {
                if config.store.attr_storage_path.is_some() {
                    warn!("Ignoring store.attr_storage_path: cloud storage is configured");
                }
                let client: Arc<dyn ObjectMetadataClient> = if cloud.is_memory() {
                    warn!("Cloud endpoint is memory:, attributes will not outlive this process");
                    Arc::new(MemoryObjectClient::new())
                } else {
                    Arc::new(BlobMetadataClient::new(
                        &cloud.endpoint(),
                        &cloud.container,
                        cloud.sas_token.clone(),
                        cloud.timeout(),
                    )?)
                };
                info!("Cloud metadata target: {}", client.describe());
                (
                    Arc::new(CloudMetadataBackend::new(client, codec.clone(), cloud.timeout())),
                    SelectionReason::CloudConfigured,
                )
            } else if let Some(storage) = &config.store.attr_storage_path {
                (
                    Arc::new(ShadowTreeBackend::new(root, storage.clone(), codec.clone())),
                    SelectionReason::ShadowConfigured,
                )
            } else if (self.probe)(&root, &codec) {
                (
                    Arc::new(NativeStreamBackend::new(root, codec.clone())),
                    SelectionReason::NativeProbe,
                )
            } else {
                let storage = Self::fallback_storage_path(&root);
                warn!(
                    "Native attributes unavailable under {}; using shadow tree at {}. \
                     Attributes there do not survive a host reinstall.",
                    root.display(),
                    storage.display()
                );
                (
                    Arc::new(ShadowTreeBackend::new(root, storage, codec.clone())),
                    SelectionReason::TempFallback,
                )
            };

        info!(
            "Selected {} attribute backend ({})",
            backend.kind().as_str(),
            reason
        );
        Ok(Selection {
            store: AttributeStore::new(backend, codec),
            reason,
        })
    }

    /// Per-repository shadow root under the system temp directory. Stable
    /// across restarts for the same repository root.
    pub fn fallback_storage_path(repository_root: &Path) -> PathBuf {
        let digest = blake3::hash(repository_root.to_string_lossy().as_bytes());
        std::env::temp_dir()
            .join("davattr")
            .join(&digest.to_hex()[..16])
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}
