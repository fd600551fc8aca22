//! MergeService: orchestrates sources, applies merge policy, deserializes to DavAttrConfig.

use crate::config::sources::{environment, file};
use crate::config::DavAttrConfig;
use config::ConfigError;
use std::path::Path;

use super::policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> config file -> environment -> repository override (highest).
    pub fn load(
        config_file: Option<&Path>,
        repository_override: Option<&Path>,
    ) -> Result<DavAttrConfig, ConfigError> {
        let builder = policy::builder_with_defaults()?;
        let builder = file::add_to_builder(builder, config_file)?;
        let builder = environment::add_to_builder(builder)?;
        let builder = match repository_override {
            Some(root) => builder.set_override(
                "store.repository_root",
                root.to_string_lossy().into_owned(),
            )?,
            None => builder,
        };

        let config = builder.build()?;
        config.try_deserialize()
    }
}
