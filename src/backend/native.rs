//! Native stream backend
//!
//! Stores each attribute as a named stream of the item's own filesystem entry.
//! On Unix the stream is an extended attribute (`user.<namespace>.<name>`), so
//! it lives and dies with the host file. `setxattr` replaces a value in one
//! step, so a crash mid-write never leaves a torn value behind.

use super::{run_blocking, AttributeBackend};
use crate::codec::AttributeKeyCodec;
use crate::error::{AttrError, Result};
use crate::types::{
    AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind, ItemPath,
};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// ENODATA on Linux.
const ENODATA_LINUX: i32 = 61;
/// ENOATTR on macOS and the BSDs.
const ENOATTR_BSD: i32 = 93;

/// Name of the throwaway attribute written by [`NativeStreamBackend::probe`].
const PROBE_ATTRIBUTE: &str = "~probe";

pub struct NativeStreamBackend {
    inner: Arc<NativeStreams>,
}

impl NativeStreamBackend {
    pub fn new(repository_root: PathBuf, codec: AttributeKeyCodec) -> Self {
        Self {
            inner: Arc::new(NativeStreams {
                root: repository_root,
                codec,
            }),
        }
    }

    /// Write, read back and remove a throwaway attribute on a scratch file in
    /// `root`. True only if all three steps succeed.
    pub fn probe(root: &Path, codec: &AttributeKeyCodec) -> bool {
        if !xattr::SUPPORTED_PLATFORM {
            debug!("Native streams unsupported on this platform");
            return false;
        }
        let scratch = match tempfile::Builder::new()
            .prefix("~davattr-probe")
            .tempfile_in(root)
        {
            Ok(file) => file,
            Err(e) => {
                debug!("Native stream probe could not create scratch file in {}: {}", root.display(), e);
                return false;
            }
        };
        let key = format!("{}{}", codec.xattr_prefix(), PROBE_ATTRIBUTE);
        let expected = b"davattr-probe";
        let result = (|| -> io::Result<bool> {
            xattr::set(scratch.path(), &key, expected)?;
            let readback = xattr::get(scratch.path(), &key)?;
            xattr::remove(scratch.path(), &key)?;
            Ok(readback.as_deref() == Some(&expected[..]))
        })();
        match result {
            Ok(ok) => ok,
            Err(e) => {
                debug!("Native stream probe rejected in {}: {}", root.display(), e);
                false
            }
        }
    }
}

#[async_trait]
impl AttributeBackend for NativeStreamBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            per_attribute_delete: true,
            atomic_copy: false,
            atomic_move: false,
        }
    }

    async fn is_supported(&self, path: &ItemPath) -> bool {
        if !xattr::SUPPORTED_PLATFORM {
            return false;
        }
        let host = self.inner.host(path);
        let inner = self.inner.clone();
        run_blocking(move || Ok(inner.writable(&host)))
            .await
            .unwrap_or(false)
    }

    async fn get(&self, path: &ItemPath, name: &AttributeName) -> Result<Option<AttributeValue>> {
        let key = self.inner.codec.xattr_name(name)?;
        let host = self.inner.host(path);
        run_blocking(move || read_value(&host, &key)).await
    }

    async fn set(&self, path: &ItemPath, name: &AttributeName, value: &str) -> Result<()> {
        let key = self.inner.codec.xattr_name(name)?;
        let host = self.inner.host(path);
        let item = path.clone();
        let value = value.to_string();
        run_blocking(move || {
            if !exists(&host) {
                return Err(AttrError::target_missing(&item));
            }
            xattr::set(&host, &key, value.as_bytes()).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    AttrError::target_missing(&item)
                } else {
                    AttrError::io("write native attribute on", &host, e)
                }
            })
        })
        .await
    }

    async fn delete(&self, path: &ItemPath, name: &AttributeName) -> Result<()> {
        let key = self.inner.codec.xattr_name(name)?;
        let host = self.inner.host(path);
        run_blocking(move || remove_value(&host, &key)).await
    }

    async fn list(&self, path: &ItemPath) -> Result<AttributeSet> {
        let host = self.inner.host(path);
        let inner = self.inner.clone();
        run_blocking(move || inner.list(&host)).await
    }

    async fn delete_all(&self, path: &ItemPath) -> Result<()> {
        let host = self.inner.host(path);
        let inner = self.inner.clone();
        run_blocking(move || {
            if !exists(&host) {
                return Ok(());
            }
            for (_, entry) in subtree(&host) {
                for name in inner.list(&entry)?.keys() {
                    remove_value(&entry, &inner.codec.xattr_name(name)?)?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn copy(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        let inner = self.inner.clone();
        let (source, destination) = (source.clone(), destination.clone());
        run_blocking(move || inner.sync_subtree(&source, &destination).map(|_| ())).await
    }

    async fn move_to(&self, source: &ItemPath, destination: &ItemPath) -> Result<()> {
        if source == destination {
            return Ok(());
        }
        let inner = self.inner.clone();
        let (source, destination) = (source.clone(), destination.clone());
        run_blocking(move || {
            let source_host = inner.host(&source);
            let destination_host = inner.host(&destination);
            if !exists(&source_host) && exists(&destination_host) {
                // The host was renamed first; its streams travelled with it and
                // the destination entry now carries exactly the moved set.
                debug!(
                    "Native attributes of {} already moved with their host to {}",
                    source, destination
                );
                return Ok(());
            }
            for entry in inner.sync_subtree(&source, &destination)? {
                for name in inner.list(&entry)?.keys() {
                    remove_value(&entry, &inner.codec.xattr_name(name)?)?;
                }
            }
            Ok(())
        })
        .await
    }
}

struct NativeStreams {
    root: PathBuf,
    codec: AttributeKeyCodec,
}

/// Planned change to one destination entry during copy/move.
struct PlannedSync {
    host: PathBuf,
    previous: AttributeSet,
    desired: AttributeSet,
}

impl NativeStreams {
    fn host(&self, path: &ItemPath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    fn writable(&self, host: &Path) -> bool {
        match std::fs::metadata(host) {
            Ok(meta) => !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    fn list(&self, host: &Path) -> Result<AttributeSet> {
        let names = match xattr::list(host) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AttributeSet::new()),
            Err(e) => return Err(AttrError::io("list native attributes of", host, e)),
        };
        let prefix = self.codec.xattr_prefix();
        let mut set = AttributeSet::new();
        for raw in names {
            let Some(raw) = raw.to_str() else { continue };
            if !raw.starts_with(&prefix) {
                continue;
            }
            let Some(name) = self.codec.decode_xattr_name(raw) else {
                warn!("Skipping undecodable native attribute {} on {}", raw, host.display());
                continue;
            };
            // A concurrent delete between list and read is not an error.
            if let Some(value) = read_value(host, raw)? {
                set.insert(name, value);
            }
        }
        Ok(set)
    }

    fn write_set(&self, host: &Path, previous: &AttributeSet, desired: &AttributeSet) -> Result<()> {
        for (name, value) in desired {
            if previous.get(name) == Some(value) {
                continue;
            }
            let key = self.codec.xattr_name(name)?;
            xattr::set(host, &key, value.as_bytes())
                .map_err(|e| AttrError::io("write native attribute on", host, e))?;
        }
        for name in previous.keys().filter(|name| !desired.contains_key(*name)) {
            remove_value(host, &self.codec.xattr_name(name)?)?;
        }
        Ok(())
    }

    /// Make every destination entry carry the attributes of its source
    /// counterpart. On failure, entries already rewritten are restored so the
    /// destination is left as it was.
    ///
    /// A source entry with attributes but no destination counterpart fails
    /// the whole call with `TargetMissing` before anything is written.
    /// Returns the source entries whose attributes were carried over.
    fn sync_subtree(&self, source: &ItemPath, destination: &ItemPath) -> Result<Vec<PathBuf>> {
        let source_host = self.host(source);
        let destination_host = self.host(destination);
        if !exists(&destination_host) {
            return Err(AttrError::target_missing(destination));
        }
        if source_host == destination_host {
            return Ok(Vec::new());
        }

        let mut carried = Vec::new();
        for (relative, entry) in subtree(&source_host) {
            if self.list(&entry)?.is_empty() {
                continue;
            }
            if !exists(&counterpart(&destination_host, &relative)) {
                return Err(AttrError::target_missing(&descendant(destination, &relative)?));
            }
            carried.push(entry);
        }

        let mut plan = Vec::new();
        for (relative, entry) in subtree(&destination_host) {
            let counterpart = counterpart(&source_host, &relative);
            let desired = if exists(&counterpart) {
                self.list(&counterpart)?
            } else {
                AttributeSet::new()
            };
            let previous = self.list(&entry)?;
            if previous != desired {
                plan.push(PlannedSync {
                    host: entry,
                    previous,
                    desired,
                });
            }
        }

        for (applied, step) in plan.iter().enumerate() {
            if let Err(e) = self.write_set(&step.host, &step.previous, &step.desired) {
                for undo in plan[..=applied].iter().rev() {
                    let current = self.list(&undo.host).unwrap_or_default();
                    if let Err(restore) = self.write_set(&undo.host, &current, &undo.previous) {
                        warn!(
                            "Failed to restore native attributes of {}: {}",
                            undo.host.display(),
                            restore
                        );
                    }
                }
                return Err(e);
            }
        }
        debug!(
            "Synchronized native attributes {} -> {} ({} entries)",
            source,
            destination,
            plan.len()
        );
        Ok(carried)
    }
}

/// `relative` resolved under `host`; the host itself for an empty path.
fn counterpart(host: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        host.to_path_buf()
    } else {
        host.join(relative)
    }
}

fn descendant(base: &ItemPath, relative: &Path) -> Result<ItemPath> {
    let relative = ItemPath::from_relative(relative)?;
    ItemPath::from_segments(base.segments().iter().chain(relative.segments()))
}

fn exists(host: &Path) -> bool {
    std::fs::symlink_metadata(host).is_ok()
}

fn is_missing_attribute(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
        || matches!(e.raw_os_error(), Some(ENODATA_LINUX) | Some(ENOATTR_BSD))
}

fn read_value(host: &Path, key: &str) -> Result<Option<AttributeValue>> {
    match xattr::get(host, key) {
        Ok(Some(bytes)) => String::from_utf8(bytes).map(Some).map_err(|e| {
            AttrError::backend(
                format!("Native attribute {} on {} is not UTF-8", key, host.display()),
                e,
            )
        }),
        Ok(None) => Ok(None),
        Err(e) if is_missing_attribute(&e) => Ok(None),
        Err(e) => Err(AttrError::io("read native attribute of", host, e)),
    }
}

fn remove_value(host: &Path, key: &str) -> Result<()> {
    match xattr::remove(host, key) {
        Ok(()) => Ok(()),
        Err(e) if is_missing_attribute(&e) => Ok(()),
        Err(e) => Err(AttrError::io("remove native attribute of", host, e)),
    }
}

/// The host itself plus, for directories, every descendant, paired with its
/// path relative to the host.
fn subtree(host: &Path) -> Vec<(PathBuf, PathBuf)> {
    if !exists(host) {
        return Vec::new();
    }
    WalkDir::new(host)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", host.display(), e);
                None
            }
        })
        .filter(|entry| !entry.path_is_symlink())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(host).ok()?.to_path_buf();
            Some((relative, entry.into_path()))
        })
        .collect()
}
