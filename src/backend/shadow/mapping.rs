//! Primary path → mirror path mapping for the shadow tree.
//!
//! This is the only place item paths become mirror paths. Each item segment is
//! escaped so that the names the store itself creates inside a mirror directory
//! (`@…` attribute files, `~…` temp and staging entries) can never collide with
//! the mirror directory of a child item.

use crate::codec::{
    is_plain_file_char, percent_escape, percent_unescape, ATTRIBUTE_FILE_MARKER,
    PRIVATE_ENTRY_MARKER,
};
use crate::types::ItemPath;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ShadowPathMap {
    root: PathBuf,
}

impl ShadowPathMap {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The operator-managed mirror root. Never removed by the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mirror directory holding the attribute files of `item`.
    pub fn mirror_dir(&self, item: &ItemPath) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in item.segments() {
            dir.push(escape_segment(segment));
        }
        dir
    }

    /// Inverse of [`mirror_dir`](Self::mirror_dir). `None` for paths outside the
    /// root, store-private entries, or names the store never produces.
    pub fn item_for_mirror(&self, dir: &Path) -> Option<ItemPath> {
        let relative = dir.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            let Component::Normal(name) = component else {
                return None;
            };
            let name = name.to_str()?;
            if is_attribute_entry(name) || is_private_entry(name) {
                return None;
            }
            segments.push(unescape_segment(name)?);
        }
        ItemPath::from_segments(segments).ok()
    }
}

pub fn is_attribute_entry(name: &str) -> bool {
    name.starts_with(ATTRIBUTE_FILE_MARKER)
}

pub fn is_private_entry(name: &str) -> bool {
    name.starts_with(PRIVATE_ENTRY_MARKER)
}

/// Escape one item segment for use as a mirror directory name.
///
/// Besides the reserved characters, a leading `.` and a trailing `.` or space
/// are escaped: some filesystems hide or silently strip them.
pub fn escape_segment(segment: &str) -> String {
    let mut escaped = percent_escape(segment, is_plain_file_char);
    if escaped.starts_with('.') {
        escaped.replace_range(..1, "%2E");
    }
    if escaped.ends_with('.') {
        let at = escaped.len() - 1;
        escaped.replace_range(at.., "%2E");
    } else if escaped.ends_with(' ') {
        let at = escaped.len() - 1;
        escaped.replace_range(at.., "%20");
    }
    escaped
}

pub fn unescape_segment(escaped: &str) -> Option<String> {
    percent_unescape(escaped)
}
