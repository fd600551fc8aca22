//! Shadow tree backend
//!
//! Mirrors the repository tree under a separate root. The attributes of
//! `a/b/file.txt` live as small files inside `<root>/a/b/file.txt/`, one file
//! per attribute. Because the mirror is independent of the data tree, moving a
//! set is a single directory rename.
//!
//! Items deleted directly on the data volume leave their mirror behind; the
//! store does not detect that per call. [`ShadowTreeBackend::check`] finds such
//! orphans on demand.

pub mod mapping;

use super::{run_blocking, AttributeBackend, ConsistencyReport};
use crate::codec::AttributeKeyCodec;
use crate::error::{AttrError, Result};
use crate::types::{
    AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind, ItemPath,
};
use async_trait::async_trait;
use mapping::{is_attribute_entry, is_private_entry, ShadowPathMap};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// ENOTDIR, seen when a path component is a file.
const ENOTDIR: i32 = 20;

pub struct ShadowTreeBackend {
    inner: Arc<ShadowTree>,
}

impl ShadowTreeBackend {
    /// `repository_root` is only consulted by the consistency check.
    pub fn new(
        repository_root: PathBuf,
        attr_storage_path: PathBuf,
        codec: AttributeKeyCodec,
    ) -> Self {
        Self {
            inner: Arc::new(ShadowTree {
                map: ShadowPathMap::new(attr_storage_path),
                repository_root,
                codec,
            }),
        }
    }
}

#[async_trait]
impl AttributeBackend for ShadowTreeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Shadow
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            per_attribute_delete: true,
            atomic_copy: true,
            atomic_move: true,
        }
    }

    async fn is_supported(&self, _path: &ItemPath) -> bool {
        let root = self.inner.map.root().to_path_buf();
        run_blocking(move || Ok(writable_dir(&root)))
            .await
            .unwrap_or(false)
    }

    async fn has(&self, path: &ItemPath, name: &AttributeName) -> Result<bool> {
        let file = self.inner.attribute_file(path, name)?;
        run_blocking(move || match fs::metadata(&file) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if is_absent(&e) => Ok(false),
            Err(e) => Err(AttrError::io("stat attribute file", &file, e)),
        })
        .await
    }

    async fn get(&self, path: &ItemPath, name: &AttributeName) -> Result<Option<AttributeValue>> {
        let file = self.inner.attribute_file(path, name)?;
        run_blocking(move || read_attribute_file(&file)).await
    }

    async fn set(&self, path: &ItemPath, name: &AttributeName, value: &str) -> Result<()> {
        let file = self.inner.attribute_file(path, name)?;
        let value = value.to_string();
        run_blocking(move || write_attribute_file(&file, &value)).await
    }

    async fn delete(&self, path: &ItemPath, name: &AttributeName) -> Result<()> {
        let file = self.inner.attribute_file(path, name)?;
        let inner = self.inner.clone();
        run_blocking(move || {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if is_absent(&e) => return Ok(()),
                Err(e) => return Err(AttrError::io("remove attribute file", &file, e)),
            }
            if let Some(dir) = file.parent() {
                inner.prune(dir);
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, path: &ItemPath) -> Result<AttributeSet> {
        let dir = self.inner.map.mirror_dir(path);
        let inner = self.inner.clone();
        run_blocking(move || inner.list(&dir)).await
    }

    async fn delete_all(&self, path: &ItemPath) -> Result<()> {
        let inner = self.inner.clone();
        let path = path.clone();
        run_blocking(move || inner.delete_all(&path)).await
    }

    async fn copy(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        let inner = self.inner.clone();
        let (source, destination) = (source.clone(), destination.clone());
        run_blocking(move || inner.copy(&source, &destination)).await
    }

    async fn move_to(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        let inner = self.inner.clone();
        let (source, destination) = (source.clone(), destination.clone());
        run_blocking(move || inner.move_to(&source, &destination)).await
    }

    async fn check(&self) -> Result<ConsistencyReport> {
        let inner = self.inner.clone();
        run_blocking(move || Ok(inner.check())).await
    }

    async fn remove_leftovers(&self, leftovers: &[PathBuf]) -> Result<usize> {
        let inner = self.inner.clone();
        let leftovers = leftovers.to_vec();
        run_blocking(move || inner.remove_leftovers(&leftovers)).await
    }
}

struct ShadowTree {
    map: ShadowPathMap,
    repository_root: PathBuf,
    codec: AttributeKeyCodec,
}

impl ShadowTree {
    fn attribute_file(&self, path: &ItemPath, name: &AttributeName) -> Result<PathBuf> {
        Ok(self.map.mirror_dir(path).join(self.codec.file_name(name)?))
    }

    fn list(&self, dir: &Path) -> Result<AttributeSet> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if is_absent(&e) => return Ok(AttributeSet::new()),
            Err(e) => return Err(AttrError::io("read mirror directory", dir, e)),
        };
        let mut set = AttributeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| AttrError::io("read mirror directory", dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if !is_attribute_entry(file_name) {
                continue;
            }
            let Some(name) = self.codec.decode_file_name(file_name) else {
                continue;
            };
            if let Some(value) = read_attribute_file(&entry.path())? {
                set.insert(name, value);
            }
        }
        Ok(set)
    }

    fn delete_all(&self, path: &ItemPath) -> Result<()> {
        let dir = self.map.mirror_dir(path);
        if path.is_root() {
            // The mirror root is operator-managed: empty it, keep it.
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if is_absent(&e) => return Ok(()),
                Err(e) => return Err(AttrError::io("read mirror root", &dir, e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| AttrError::io("read mirror root", &dir, e))?;
                if entry.file_name().to_str().is_some_and(is_private_entry) {
                    continue;
                }
                remove_entry(&entry.path())?;
            }
            return Ok(());
        }
        remove_entry(&dir)?;
        if let Some(parent) = dir.parent() {
            self.prune(parent);
        }
        Ok(())
    }

    fn copy(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        reject_root_destination(destination)?;
        if source == destination {
            return Ok(());
        }
        let source_dir = self.map.mirror_dir(source);
        if !source_dir.is_dir() {
            debug!("No shadow attributes on {}; clearing {}", source, destination);
            return self.delete_all(destination);
        }

        let staging = self.scratch_dir("~stage")?;
        let staged = staging.path().join("tree");
        copy_tree(&source_dir, &staged)?;
        self.commit(&staged, &self.map.mirror_dir(destination))?;
        debug!("Copied shadow attributes {} -> {}", source, destination);
        Ok(())
    }

    fn move_to(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        reject_root_destination(destination)?;
        if source.is_root() {
            return Err(AttrError::invalid_path("/", "the repository root cannot be moved"));
        }
        if source == destination {
            return Ok(());
        }
        let source_dir = self.map.mirror_dir(source);
        if !source_dir.is_dir() {
            debug!("No shadow attributes on {}; clearing {}", source, destination);
            return self.delete_all(destination);
        }
        self.commit(&source_dir, &self.map.mirror_dir(destination))?;
        if let Some(parent) = source_dir.parent() {
            self.prune(parent);
        }
        debug!("Moved shadow attributes {} -> {}", source, destination);
        Ok(())
    }

    /// Rename `ready` onto `target`. An existing target is set aside first and
    /// put back if the rename fails, so the target is never left half-written.
    fn commit(&self, ready: &Path, target: &Path) -> Result<()> {
        self.commit_with(ready, target, |from, to| fs::rename(from, to))
    }

    /// [`commit`](Self::commit) with the final rename supplied by the caller.
    fn commit_with<F>(&self, ready: &Path, target: &Path, rename: F) -> Result<()>
    where
        F: FnOnce(&Path, &Path) -> io::Result<()>,
    {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AttrError::io("create mirror directory", parent, e))?;
        }
        let trash = if target.exists() {
            let trash = self.scratch_dir("~trash")?;
            let aside = trash.path().join("old");
            fs::rename(target, &aside)
                .map_err(|e| AttrError::io("set aside mirror directory", target, e))?;
            Some((trash, aside))
        } else {
            None
        };

        if let Err(e) = rename(ready, target) {
            if let Some((_trash, aside)) = &trash {
                if let Err(restore) = fs::rename(aside, target) {
                    warn!(
                        "Failed to restore mirror directory {} from {}: {}",
                        target.display(),
                        aside.display(),
                        restore
                    );
                }
            }
            return Err(AttrError::io("commit mirror directory", target, e));
        }
        Ok(())
    }

    /// Store-private scratch directory under the mirror root; removed on drop.
    fn scratch_dir(&self, prefix: &str) -> Result<tempfile::TempDir> {
        let root = self.map.root();
        fs::create_dir_all(root).map_err(|e| AttrError::io("create mirror root", root, e))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|e| AttrError::io("create scratch directory in", root, e))
    }

    /// Remove `dir` and then its ancestors while they are empty, stopping at
    /// the mirror root.
    fn prune(&self, dir: &Path) {
        let root = self.map.root();
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if is_absent(&e) => {}
                Err(_) => break,
            }
            current = dir.parent();
        }
    }

    /// Only `~` entries below the mirror root are eligible.
    fn remove_leftovers(&self, leftovers: &[PathBuf]) -> Result<usize> {
        let root = self.map.root();
        let mut removed = 0;
        for entry in leftovers {
            let private = entry
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_private_entry);
            if !private || !entry.starts_with(root) || entry == root {
                warn!("Refusing to remove {}: not a store leftover", entry.display());
                continue;
            }
            remove_entry(entry)?;
            debug!("Removed leftover {}", entry.display());
            removed += 1;
        }
        Ok(removed)
    }

    fn check(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let root = self.map.root();
        if !root.is_dir() {
            return report;
        }

        let mut set_dirs = BTreeSet::new();
        let mut walker = WalkDir::new(root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable mirror entry: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy();
            if is_private_entry(&name) {
                report.leftovers.push(entry.path().to_path_buf());
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() && is_attribute_entry(&name) {
                if let Some(parent) = entry.path().parent() {
                    set_dirs.insert(parent.to_path_buf());
                }
            }
        }

        for dir in set_dirs {
            report.scanned_sets += 1;
            let Some(item) = self.map.item_for_mirror(&dir) else {
                warn!("Mirror directory {} does not map to an item", dir.display());
                continue;
            };
            if !item.is_root() && !item.to_fs_path(&self.repository_root).exists() {
                report.orphaned.push(item);
            }
        }
        report
    }
}

fn reject_root_destination(destination: &ItemPath) -> Result<()> {
    if destination.is_root() {
        return Err(AttrError::invalid_path(
            "/",
            "the repository root cannot be a copy or move destination",
        ));
    }
    Ok(())
}

fn is_absent(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(ENOTDIR)
}

fn read_attribute_file(file: &Path) -> Result<Option<AttributeValue>> {
    match fs::read(file) {
        Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
            AttrError::backend(
                format!("Attribute file {} is not UTF-8", file.display()),
                e,
            )
        }),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(AttrError::io("read attribute file", file, e)),
    }
}

/// Write to a temp file in the mirror directory, then rename it over the
/// attribute file. A concurrent prune may remove the directory between
/// creating it and creating the temp file; that is retried once.
fn write_attribute_file(file: &Path, value: &str) -> Result<()> {
    let dir = file
        .parent()
        .ok_or_else(|| AttrError::invalid_path(file.display().to_string(), "no parent"))?;
    let mut attempt = 0;
    loop {
        attempt += 1;
        fs::create_dir_all(dir).map_err(|e| AttrError::io("create mirror directory", dir, e))?;
        let mut temp = match tempfile::Builder::new().prefix("~tmp").tempfile_in(dir) {
            Ok(temp) => temp,
            Err(e) if attempt == 1 && e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(AttrError::io("create temp file in", dir, e)),
        };
        temp.write_all(value.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| AttrError::io("write temp file in", dir, e))?;
        temp.persist(file)
            .map_err(|e| AttrError::io("replace attribute file", file, e.error))?;
        return Ok(());
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_absent(&e) => Ok(()),
        Err(e) => Err(AttrError::io("remove mirror entry", path, e)),
    }
}

/// Recursively copy a mirror subtree, skipping store-private entries.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let walker = WalkDir::new(from)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('~')
        });
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            AttrError::io("walk mirror directory", &path, io::Error::from(e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| AttrError::backend("Mirror walk left its root", e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| AttrError::io("create staged directory", &target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .map_err(|e| AttrError::io("stage attribute file", &target, e))?;
        }
    }
    Ok(())
}

fn writable_dir(root: &Path) -> bool {
    let mut candidate = Some(root);
    while let Some(dir) = candidate {
        match fs::metadata(dir) {
            Ok(meta) => return meta.is_dir() && !meta.permissions().readonly(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => candidate = dir.parent(),
            Err(_) => return false,
        }
    }
    false
}
