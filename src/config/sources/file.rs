//! Config file source: an explicit path, else the platform config dir, else
//! `./davattr.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "davattr.toml";

/// `<config dir>/davattr/config.toml` on this platform.
pub fn platform_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "davattr", "davattr")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// The file a load without `--config` would read, if any exists.
pub fn discover() -> Option<PathBuf> {
    platform_config_path()
        .filter(|path| path.is_file())
        .or_else(|| Some(PathBuf::from(LOCAL_CONFIG_FILE)).filter(|path| path.is_file()))
}

/// Add the config file layer. An explicit path must exist; a discovered one is
/// optional.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    explicit: Option<&Path>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = match explicit {
        Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
        None => match discover() {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(false)),
            None => builder,
        },
    };
    Ok(builder)
}
