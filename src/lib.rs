//! davattr: Extended Attribute Store for WebDAV servers
//!
//! A uniform key/value metadata layer attached to repository items. Attributes
//! live in native extended attributes, in a shadow tree mirroring the
//! repository, or in cloud object metadata. [`selector::BackendSelector`]
//! picks one at startup and [`store::AttributeStore`] is the facade callers use.

pub mod backend;
pub mod codec;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod selector;
pub mod store;
pub mod tooling;
pub mod types;

pub use backend::{AttributeBackend, ConsistencyReport};
pub use codec::AttributeKeyCodec;
pub use error::{AttrError, Result};
pub use selector::BackendSelector;
pub use store::AttributeStore;
pub use types::{
    AttributeKey, AttributeName, AttributeSet, AttributeValue, BackendCapabilities, BackendKind,
    ItemPath, Namespace,
};
