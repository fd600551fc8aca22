//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::sources::file;
use super::DavAttrConfig;
use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from files and environment.
    pub fn load(config_file: Option<&Path>, repository: Option<&Path>) -> Result<DavAttrConfig> {
        match config_file.map(Path::to_path_buf).or_else(file::discover) {
            Some(path) => debug!("Loading configuration from {}", path.display()),
            None => debug!("No configuration file found, using defaults and environment"),
        }
        let mut config = MergeService::load(config_file, repository)?;
        config.validate()?;
        Ok(config)
    }
}
