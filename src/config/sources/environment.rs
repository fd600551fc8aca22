//! Environment variable source: DAVATTR__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
/// `DAVATTR__STORE__NAMESPACE=x` sets `store.namespace`. The single-underscore
/// `DAVATTR_LOG*` variables belong to the logger and are not picked up here.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix("DAVATTR")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
