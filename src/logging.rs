//! Logging System
//!
//! Structured logging through `tracing`. Level, format and destination come from
//! the `[logging]` config section, each overridable by a `DAVATTR_LOG*`
//! environment variable.

use crate::error::AttrError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Resolve the log file path with precedence: DAVATTR_LOG_FILE env, config file, default.
///
/// The default lives in the platform state directory (`ProjectDirs`).
pub fn resolve_log_file_path(config_file: Option<PathBuf>) -> Result<PathBuf, AttrError> {
    resolve_log_file_path_from(std::env::var_os("DAVATTR_LOG_FILE"), config_file)
}

fn resolve_log_file_path_from(
    env_path: Option<OsString>,
    config_file: Option<PathBuf>,
) -> Result<PathBuf, AttrError> {
    if let Some(p) = env_path {
        if !p.is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    if let Some(p) = config_file {
        if !p.as_os_str().is_empty() {
            return Ok(p);
        }
    }
    default_log_file_path()
}

fn default_log_file_path() -> Result<PathBuf, AttrError> {
    let project_dirs = directories::ProjectDirs::from("", "davattr", "davattr").ok_or_else(|| {
        AttrError::Config("Could not determine platform directories for log file".to_string())
    })?;
    // No state dir on macOS and Windows.
    let dir = project_dirs
        .state_dir()
        .unwrap_or_else(|| project_dirs.data_local_dir());
    Ok(dir.join("davattr.log"))
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether logging is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file, file+stderr, both
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output includes file; None means use runtime default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Enable colored output (text format only, stdout/stderr only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    // stdout carries command output
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

/// Initialize the logging system
///
/// Priority order (highest to lowest):
/// 1. Environment variables (DAVATTR_LOG, DAVATTR_LOG_FORMAT, etc.)
/// 2. Configuration file
/// 3. Defaults
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), AttrError> {
    let disabled = config.map(|c| !c.enabled).unwrap_or(false);
    if disabled {
        return Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .try_init()
            .map_err(|e| AttrError::Config(format!("Failed to install logger: {}", e)));
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true) && !output.file;

    let writer = if output.file {
        let file = open_log_file(config.and_then(|c| c.file.clone()))?;
        if output.stderr {
            BoxMakeWriter::new(file.and(std::io::stderr))
        } else {
            BoxMakeWriter::new(file)
        }
    } else if output.stdout && output.stderr {
        BoxMakeWriter::new(std::io::stdout.and(std::io::stderr))
    } else if output.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let base_subscriber = Registry::default().with(filter);
    let installed = if format == "json" {
        base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init()
    } else {
        base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(writer),
            )
            .try_init()
    };
    installed.map_err(|e| AttrError::Config(format!("Failed to install logger: {}", e)))
}

fn open_log_file(configured: Option<PathBuf>) -> Result<std::fs::File, AttrError> {
    let log_file = resolve_log_file_path(configured)?;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AttrError::Config(format!("Failed to create log directory: {}", e)))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| AttrError::Config(format!("Failed to open log file {:?}: {}", log_file, e)))
}

/// Build environment filter from config or environment variables
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, AttrError> {
    if let Ok(filter) = EnvFilter::try_from_env("DAVATTR_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| AttrError::Config(format!("Invalid log directive: {}", e)))?,
            );
        }
    }
    Ok(filter)
}

/// Determine output format from config or environment
fn determine_format(config: Option<&LoggingConfig>) -> Result<String, AttrError> {
    if let Ok(format) = std::env::var("DAVATTR_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(AttrError::Config(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }
    Ok(format.to_string())
}

/// Output destinations
#[derive(Debug, PartialEq)]
struct OutputDestinations {
    stdout: bool,
    stderr: bool,
    file: bool,
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<OutputDestinations, AttrError> {
    if let Ok(output) = std::env::var("DAVATTR_LOG_OUTPUT") {
        return parse_output_destinations(&output);
    }
    let output = config.map(|c| c.output.as_str()).unwrap_or("stderr");
    parse_output_destinations(output)
}

fn parse_output_destinations(output: &str) -> Result<OutputDestinations, AttrError> {
    let (stdout, stderr, file) = match output {
        "stdout" => (true, false, false),
        "stderr" => (false, true, false),
        "file" => (false, false, true),
        "file+stderr" => (false, true, true),
        "both" => (true, true, false),
        _ => {
            return Err(AttrError::Config(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                output
            )))
        }
    };
    Ok(OutputDestinations {
        stdout,
        stderr,
        file,
    })
}

/// Validate a logging section without installing anything.
pub fn validate(config: &LoggingConfig) -> Result<(), AttrError> {
    parse_output_destinations(&config.output)?;
    if config.format != "json" && config.format != "text" {
        return Err(AttrError::Config(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            config.format
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "text");
        assert_eq!(config.output, "stderr");
        assert_eq!(config.file, None);
        assert!(config.color);
    }

    #[test]
    fn test_parse_output_destinations() {
        let out = parse_output_destinations("stdout").unwrap();
        assert!(out.stdout);
        assert!(!out.stderr);
        assert!(!out.file);

        let out = parse_output_destinations("both").unwrap();
        assert!(out.stdout);
        assert!(out.stderr);
        assert!(!out.file);

        let out = parse_output_destinations("file+stderr").unwrap();
        assert!(!out.stdout);
        assert!(out.stderr);
        assert!(out.file);

        assert!(matches!(
            parse_output_destinations("syslog"),
            Err(AttrError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let config = LoggingConfig {
            format: "yaml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(validate(&config).is_err());
        assert!(validate(&LoggingConfig::default()).is_ok());
    }

    #[test]
    fn test_resolve_log_file_path_config_wins_over_default() {
        let config = Some(PathBuf::from("/tmp/config.log"));
        let path = resolve_log_file_path_from(None, config).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/config.log"));
    }

    #[test]
    fn test_resolve_log_file_path_env_wins_over_config() {
        let path = resolve_log_file_path_from(
            Some(OsString::from("/tmp/env.log")),
            Some(PathBuf::from("/tmp/config.log")),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/env.log"));

        // An empty variable counts as unset.
        let path =
            resolve_log_file_path_from(Some(OsString::new()), Some(PathBuf::from("/tmp/c.log")))
                .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/c.log"));
    }

    #[test]
    fn test_resolve_log_file_path_default_fallback() {
        let path = resolve_log_file_path_from(None, None).unwrap();
        assert!(path.ends_with("davattr.log"));
        assert!(path.components().count() >= 2);
    }
}
