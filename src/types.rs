//! Core types for the attribute store.
//!
//! Paths and names are validated once, at the edge, so that backends can treat
//! an [`ItemPath`] or [`AttributeName`] as already safe to map onto storage.

use crate::error::{AttrError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Maximum length of an attribute name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a namespace, in bytes.
pub const MAX_NAMESPACE_LEN: usize = 32;

/// Namespace used when the deployment does not configure one.
pub const DEFAULT_NAMESPACE: &str = "webdav";

/// Opaque attribute value. Stored and returned as-is.
pub type AttributeValue = String;

/// Every attribute owned by one item.
pub type AttributeSet = BTreeMap<AttributeName, AttributeValue>;

/// Repository-relative, decoded path of an item.
///
/// Never an absolute filesystem path, so keys stay stable when the backing
/// store is relocated. The empty path is the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemPath {
    segments: Vec<String>,
}

impl ItemPath {
    /// The repository root item.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a decoded request path such as `/docs/report.docx`.
    ///
    /// Leading, trailing and repeated separators are dropped. Segments are
    /// normalized to NFC so that decomposed names sent by some clients address
    /// the same item as their composed form.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_segments(raw.split('/').filter(|s| !s.is_empty()))
    }

    /// Build a path from individual segments, validating each.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            out.push(Self::validate_segment(segment)?);
        }
        Ok(Self { segments: out })
    }

    /// Build a path from a filesystem path relative to the repository root.
    pub fn from_relative(relative: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        AttrError::invalid_path(relative.display().to_string(), "not valid UTF-8")
                    })?;
                    segments.push(name.to_string());
                }
                std::path::Component::CurDir => {}
                _ => {
                    return Err(AttrError::invalid_path(
                        relative.display().to_string(),
                        "not a relative path",
                    ))
                }
            }
        }
        Self::from_segments(segments)
    }

    fn validate_segment(segment: &str) -> Result<String> {
        if segment == "." || segment == ".." {
            return Err(AttrError::invalid_path(
                segment,
                "relative segments are not allowed",
            ));
        }
        if let Some(bad) = segment.chars().find(|c| *c == '\0' || *c == '\\') {
            return Err(AttrError::invalid_path(
                segment,
                format!("contains reserved character {:?}", bad),
            ));
        }
        Ok(segment.nfc().collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Location of the item on a filesystem rooted at `root`.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl From<ItemPath> for String {
    fn from(path: ItemPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for ItemPath {
    type Error = AttrError;

    fn try_from(raw: String) -> Result<Self> {
        ItemPath::parse(&raw)
    }
}

/// Validated attribute name (without namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AttributeName(String);

impl AttributeName {
    /// Validate a raw attribute name.
    ///
    /// Path separators, stream separators, NUL and control characters are
    /// rejected so that no backend ever sees a name that could escape its slot.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(AttrError::invalid_name(raw, "name is empty"));
        }
        if raw.len() > MAX_NAME_LEN {
            return Err(AttrError::invalid_name(
                raw,
                format!("name exceeds {} bytes", MAX_NAME_LEN),
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
        {
            return Err(AttrError::invalid_name(
                raw,
                format!("contains reserved character {:?}", bad),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AttributeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deployment-wide attribute namespace, e.g. `webdav`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_NAMESPACE_LEN
            && raw.starts_with(|c: char| c.is_ascii_alphabetic())
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(AttrError::Config(format!(
                "Invalid namespace {:?}: must start with a letter and contain only ASCII letters, digits or '-' (max {} bytes)",
                raw, MAX_NAMESPACE_LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One value slot: (owning item, attribute name, namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub path: ItemPath,
    pub name: AttributeName,
    pub namespace: Namespace,
}

impl AttributeKey {
    pub fn new(path: ItemPath, name: AttributeName, namespace: Namespace) -> Self {
        Self {
            path,
            name,
            namespace,
        }
    }

    /// `<namespace>.<name>`, the form every backend encoding starts from.
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Which storage strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Shadow,
    Cloud,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Shadow => "shadow",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the active backend that structural callers may branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    pub per_attribute_delete: bool,
    pub atomic_copy: bool,
    pub atomic_move: bool,
}
