//! Attribute key codec
//!
//! Derives the physical key each backend stores a value under. Every encoding
//! starts from the canonical `<namespace>.<name>` form and is injective, so a
//! stored key can be decoded back to the attribute name it came from. Keys that
//! decode to another namespace (or do not decode at all) are not ours and are
//! left alone by every operation.

use crate::error::{AttrError, Result};
use crate::types::{AttributeName, Namespace};

/// Prefix of the Linux user xattr namespace.
const XATTR_USER_PREFIX: &str = "user.";

/// Longest xattr name the kernel accepts.
const XATTR_NAME_MAX: usize = 255;

/// Longest file name most filesystems accept.
const FILE_NAME_MAX: usize = 255;

/// Marker that starts every attribute file inside a shadow mirror directory.
pub const ATTRIBUTE_FILE_MARKER: char = '@';

/// Marker that starts every store-private entry (temp files, staging dirs).
pub const PRIVATE_ENTRY_MARKER: char = '~';

/// Derives backend keys for one namespace.
#[derive(Debug, Clone, Default)]
pub struct AttributeKeyCodec {
    namespace: Namespace,
}

impl AttributeKeyCodec {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// `<namespace>.<name>`
    pub fn canonical(&self, name: &AttributeName) -> String {
        format!("{}.{}", self.namespace, name)
    }

    /// Inverse of [`canonical`](Self::canonical); `None` for other namespaces.
    pub fn decode_canonical(&self, canonical: &str) -> Option<AttributeName> {
        let (namespace, name) = canonical.split_once('.')?;
        if namespace != self.namespace.as_str() {
            return None;
        }
        AttributeName::new(name).ok()
    }

    // --- native extended attributes ---

    /// `user.<namespace>.<name>`
    pub fn xattr_name(&self, name: &AttributeName) -> Result<String> {
        let key = format!("{}{}", XATTR_USER_PREFIX, self.canonical(name));
        if key.len() > XATTR_NAME_MAX {
            return Err(AttrError::invalid_name(
                name.as_str(),
                format!("native attribute name exceeds {} bytes", XATTR_NAME_MAX),
            ));
        }
        Ok(key)
    }

    pub fn decode_xattr_name(&self, raw: &str) -> Option<AttributeName> {
        self.decode_canonical(raw.strip_prefix(XATTR_USER_PREFIX)?)
    }

    /// Prefix shared by every native attribute this codec produces.
    pub fn xattr_prefix(&self) -> String {
        format!("{}{}.", XATTR_USER_PREFIX, self.namespace)
    }

    // --- shadow tree attribute files ---

    /// `@<escaped canonical>`
    ///
    /// Letters that a case-insensitive volume would fold are escaped too, so
    /// `Snippet` and `snippet` never land on the same file.
    pub fn file_name(&self, name: &AttributeName) -> Result<String> {
        let file_name = format!(
            "{}{}",
            ATTRIBUTE_FILE_MARKER,
            percent_escape(&self.canonical(name), |c| {
                is_plain_file_char(c) && is_case_stable(c)
            })
        );
        if file_name.len() > FILE_NAME_MAX {
            return Err(AttrError::invalid_name(
                name.as_str(),
                format!("encoded attribute file name exceeds {} bytes", FILE_NAME_MAX),
            ));
        }
        Ok(file_name)
    }

    pub fn decode_file_name(&self, raw: &str) -> Option<AttributeName> {
        let escaped = raw.strip_prefix(ATTRIBUTE_FILE_MARKER)?;
        self.decode_canonical(&percent_unescape(escaped)?)
    }

    // --- cloud object metadata ---

    /// Metadata key made only of `[a-z0-9]` and `_hh` escapes.
    ///
    /// Cloud metadata keys are case-insensitive identifiers, so upper-case
    /// letters are escaped too.
    pub fn metadata_key(&self, name: &AttributeName) -> String {
        let canonical = self.canonical(name);
        let mut out = String::with_capacity(canonical.len() * 2);
        for byte in canonical.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
                out.push(byte as char);
            } else {
                out.push('_');
                out.push_str(&hex::encode([byte]));
            }
        }
        out
    }

    pub fn decode_metadata_key(&self, raw: &str) -> Option<AttributeName> {
        let bytes = raw.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut index = 0;
        while index < bytes.len() {
            match bytes[index] {
                b'_' => {
                    let pair = raw.get(index + 1..index + 3)?;
                    decoded.push(*hex::decode(pair).ok()?.first()?);
                    index += 3;
                }
                b if b.is_ascii_alphanumeric() => {
                    decoded.push(b.to_ascii_lowercase());
                    index += 1;
                }
                _ => return None,
            }
        }
        self.decode_canonical(&String::from_utf8(decoded).ok()?)
    }

    /// Metadata values travel as HTTP header values: printable ASCII only,
    /// no leading or trailing whitespace. Everything else is `%HH` escaped.
    pub fn encode_metadata_value(&self, value: &str) -> String {
        percent_escape(value, |c| c.is_ascii_graphic() && c != '%')
    }

    pub fn decode_metadata_value(&self, raw: &str) -> Result<String> {
        percent_unescape(raw).ok_or_else(|| {
            AttrError::backend(
                "Malformed cloud metadata value",
                format!("cannot decode {:?}", raw),
            )
        })
    }
}

/// Characters kept verbatim in attribute file names and mirror segments.
pub(crate) fn is_plain_file_char(c: char) -> bool {
    !c.is_control()
        && !matches!(
            c,
            '%' | '/'
                | '\\'
                | ':'
                | '*'
                | '?'
                | '"'
                | '<'
                | '>'
                | '|'
                | ATTRIBUTE_FILE_MARKER
                | PRIVATE_ENTRY_MARKER
        )
}

/// True if no case folding maps `c` onto another character.
fn is_case_stable(c: char) -> bool {
    let mut lower = c.to_lowercase();
    if lower.next() != Some(c) || lower.next().is_some() {
        return false;
    }
    c.to_uppercase().flat_map(char::to_lowercase).eq(std::iter::once(c))
}

/// Escape every char rejected by `keep` as `%HH` per UTF-8 byte.
pub(crate) fn percent_escape(input: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut buf = [0u8; 4];
    for c in input.chars() {
        if keep(c) {
            out.push(c);
        } else {
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push('%');
                out.push_str(&hex::encode_upper([byte]));
            }
        }
    }
    out
}

/// Inverse of [`percent_escape`]; `None` on malformed escapes or bad UTF-8.
pub(crate) fn percent_unescape(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let pair = input.get(index + 1..index + 3)?;
            decoded.push(*hex::decode(pair).ok()?.first()?);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
