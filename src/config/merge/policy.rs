//! Built-in defaults, the lowest layer of every load.

use crate::types::DEFAULT_NAMESPACE;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with the `[store]` defaults. `[cloud]` gets none: its mere
/// presence selects the cloud backend.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("store.repository_root", ".")?
        .set_default("store.namespace", DEFAULT_NAMESPACE)
}
