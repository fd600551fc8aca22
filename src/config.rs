//! Configuration
//!
//! Layered with the `config` crate: built-in defaults, then one TOML file, then
//! `DAVATTR__SECTION__KEY` environment variables. The presence of a `[cloud]`
//! section is what selects the cloud backend, so no cloud key has a built-in
//! default at the builder level.

pub mod facade;
pub mod merge {
    pub mod policy;
    pub mod service;
}
pub mod sources {
    pub mod environment;
    pub mod file;
}

pub use facade::ConfigLoader;

use crate::backend::cloud::BlobMetadataClient;
use crate::error::{AttrError, Result};
use crate::logging::{self, LoggingConfig};
use crate::types::{Namespace, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Endpoint value that selects the in-process object table.
pub const MEMORY_ENDPOINT: &str = "memory:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DavAttrConfig {
    #[serde(default)]
    pub store: StoreSection,

    /// Present only for cloud deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudSection>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Root of the served tree on the data volume.
    #[serde(default = "default_repository_root")]
    pub repository_root: PathBuf,

    /// Mirror root for the shadow tree. Setting it forces the shadow backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_storage_path: Option<PathBuf>,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_repository_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            repository_root: default_repository_root(),
            attr_storage_path: None,
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSection {
    #[serde(default)]
    pub account: String,

    #[serde(default)]
    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,

    /// Overrides the account endpoint (emulators, `memory:` dry runs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl CloudSection {
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => BlobMetadataClient::account_endpoint(&self.account),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.endpoint.as_deref() == Some(MEMORY_ENDPOINT)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DavAttrConfig {
    /// Check every section and resolve the repository root. Called once by
    /// the loader; safe to call again.
    pub fn validate(&mut self) -> Result<()> {
        self.namespace()?;
        logging::validate(&self.logging)?;

        if self.store.repository_root.as_os_str().is_empty() {
            return Err(AttrError::Config(
                "store.repository_root must not be empty".to_string(),
            ));
        }
        match dunce::canonicalize(&self.store.repository_root) {
            Ok(resolved) if resolved.is_dir() => self.store.repository_root = resolved,
            Ok(resolved) => {
                return Err(AttrError::Config(format!(
                    "Repository root {} is not a directory",
                    resolved.display()
                )))
            }
            // A cloud store has no local tree.
            Err(_) if self.cloud.is_some() => {}
            Err(e) => {
                return Err(AttrError::Config(format!(
                    "Repository root {} is not accessible: {}",
                    self.store.repository_root.display(),
                    e
                )))
            }
        }

        if let Some(path) = &self.store.attr_storage_path {
            if path.as_os_str().is_empty() {
                return Err(AttrError::Config(
                    "store.attr_storage_path must not be empty when set".to_string(),
                ));
            }
            if let Ok(resolved) = dunce::canonicalize(path) {
                self.store.attr_storage_path = Some(resolved);
            }
        }

        if let Some(cloud) = &self.cloud {
            if cloud.container.is_empty() && !cloud.is_memory() {
                return Err(AttrError::Config("cloud.container is required".to_string()));
            }
            if cloud.account.is_empty() && cloud.endpoint.is_none() {
                return Err(AttrError::Config(
                    "cloud.account or cloud.endpoint is required".to_string(),
                ));
            }
            if cloud.timeout_ms == 0 {
                return Err(AttrError::Config(
                    "cloud.timeout_ms must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::new(&self.store.namespace)
            .map_err(|e| AttrError::Config(format!("store.namespace: {}", e)))
    }

    /// Effective configuration as TOML, secrets masked.
    pub fn to_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(cloud) = shown.cloud.as_mut() {
            if cloud.sas_token.is_some() {
                cloud.sas_token = Some("<redacted>".to_string());
            }
        }
        toml::to_string_pretty(&shown)
            .map_err(|e| AttrError::Config(format!("Failed to render configuration: {}", e)))
    }
}
