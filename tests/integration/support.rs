//! Per-backend fixtures. Each harness owns a scratch repository and a store
//! over one backend; native harnesses are only built where the volume accepts
//! user extended attributes.

use davattr::backend::cloud::{CloudMetadataBackend, MemoryObjectClient};
use davattr::backend::{NativeStreamBackend, ShadowTreeBackend};
use davattr::{AttributeKeyCodec, AttributeStore, BackendKind, ItemPath};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub store: AttributeStore,
    pub repo: PathBuf,
    pub cloud: Option<Arc<MemoryObjectClient>>,
    _temp: TempDir,
}

impl Harness {
    pub fn shadow() -> Self {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        let codec = AttributeKeyCodec::default();
        let backend = ShadowTreeBackend::new(repo.clone(), temp.path().join("attrs"), codec.clone());
        Self {
            store: AttributeStore::new(Arc::new(backend), codec),
            repo,
            cloud: None,
            _temp: temp,
        }
    }

    /// `None` when the volume rejects the native probe.
    pub fn native() -> Option<Self> {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        let codec = AttributeKeyCodec::default();
        if !NativeStreamBackend::probe(&repo, &codec) {
            eprintln!("skipping native harness: user xattrs unavailable under {}", repo.display());
            return None;
        }
        let backend = NativeStreamBackend::new(repo.clone(), codec.clone());
        Some(Self {
            store: AttributeStore::new(Arc::new(backend), codec),
            repo,
            cloud: None,
            _temp: temp,
        })
    }

    pub fn cloud() -> Self {
        Self::cloud_with(MemoryObjectClient::new())
    }

    pub fn cloud_with(client: MemoryObjectClient) -> Self {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(client);
        let codec = AttributeKeyCodec::default();
        let backend = CloudMetadataBackend::new(client.clone(), codec.clone(), Duration::from_secs(5));
        Self {
            store: AttributeStore::new(Arc::new(backend), codec),
            repo: temp.path().to_path_buf(),
            cloud: Some(client),
            _temp: temp,
        }
    }

    /// Every harness this host can run.
    pub fn all() -> Vec<Self> {
        let mut all = vec![Self::shadow(), Self::cloud()];
        all.extend(Self::native());
        all
    }

    /// Folder-shaped harnesses, where subtree operations apply.
    pub fn hierarchical() -> Vec<Self> {
        let mut all = vec![Self::shadow()];
        all.extend(Self::native());
        all
    }

    pub fn kind(&self) -> BackendKind {
        self.store.kind()
    }

    /// Make `path` exist as a file item (or cloud object).
    pub fn create_item(&self, path: &str) {
        match &self.cloud {
            Some(client) => client.create_object(&ItemPath::parse(path).unwrap()),
            None => {
                let host = ItemPath::parse(path).unwrap().to_fs_path(&self.repo);
                fs::create_dir_all(host.parent().unwrap()).unwrap();
                fs::write(host, b"content").unwrap();
            }
        }
    }

    /// Make `path` exist as a folder item. Cloud objects are flat.
    pub fn create_dir(&self, path: &str) {
        if self.cloud.is_none() {
            fs::create_dir_all(ItemPath::parse(path).unwrap().to_fs_path(&self.repo)).unwrap();
        }
    }

    /// Rename an item on the data volume, as the hierarchy layer would.
    pub fn rename_item(&self, from: &str, to: &str) {
        let from = ItemPath::parse(from).unwrap().to_fs_path(&self.repo);
        let to = ItemPath::parse(to).unwrap().to_fs_path(&self.repo);
        fs::create_dir_all(to.parent().unwrap()).unwrap();
        fs::rename(from, to).unwrap();
    }
}
