//! CLI Tooling
//!
//! Operator commands over the attribute store: inspect the selected backend,
//! read and write single attributes, run the copy/move/delete-all operations
//! the WebDAV layer uses, and check a shadow tree for orphans.

use crate::backend::ConsistencyReport;
use crate::config::{ConfigLoader, DavAttrConfig};
use crate::error::AttrError;
use crate::logging;
use crate::selector::{BackendSelector, SelectionReason};
use crate::store::AttributeStore;
use crate::types::AttributeSet;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use serde_json::json;
use std::path::PathBuf;

/// davattr - extended attributes for WebDAV items
#[derive(Parser, Debug)]
#[command(name = "davattr")]
#[command(about = "Inspect and maintain the WebDAV extended attribute store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository root (overrides store.repository_root)
    #[arg(long, global = true)]
    pub repository: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the selected backend and its capabilities
    Backend {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print one attribute value
    Get { path: String, name: String },
    /// Set one attribute value
    Set {
        path: String,
        name: String,
        value: String,
    },
    /// Delete one attribute (succeeds if absent)
    Delete { path: String, name: String },
    /// List the attributes of an item
    List {
        path: String,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Delete every attribute of an item and its descendants
    DeleteAll { path: String },
    /// Copy the attribute set of one item onto another
    Copy { source: String, destination: String },
    /// Move the attribute set of one item onto another
    Move {
        source: String,
        destination: String,
        /// Fail instead of falling back to copy-then-delete
        #[arg(long)]
        atomic: bool,
    },
    /// Report attribute sets whose items are gone, and interrupted-operation leftovers
    Check {
        /// Remove what the check finds
        #[arg(long)]
        purge: bool,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// Load configuration, set up logging, and run one command.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let mut config = ConfigLoader::load(cli.config.as_deref(), cli.repository.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logging::init_logging(Some(&config.logging)).context("Failed to initialize logging")?;

    if let Commands::Config = cli.command {
        return Ok(config.to_toml()?);
    }

    let context = CliContext::new(config, &BackendSelector::new())?;
    let output = context
        .execute(&cli.command)
        .await
        .with_context(|| format!("{} failed", command_name(&cli.command)))?;
    Ok(output)
}

/// A selected store plus the configuration it came from.
pub struct CliContext {
    store: AttributeStore,
    reason: SelectionReason,
    config: DavAttrConfig,
}

impl CliContext {
    pub fn new(config: DavAttrConfig, selector: &BackendSelector) -> Result<Self, AttrError> {
        let selection = selector.select(&config)?;
        Ok(Self {
            store: selection.store,
            reason: selection.reason,
            config,
        })
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, AttrError> {
        match command {
            Commands::Backend { format } => self.handle_backend(*format),
            Commands::Get { path, name } => self.store.get_required(path, name).await,
            Commands::Set { path, name, value } => {
                self.store.set(path, name, value).await?;
                Ok(String::new())
            }
            Commands::Delete { path, name } => {
                self.store.delete(path, name).await?;
                Ok(String::new())
            }
            Commands::List { path, format } => {
                let set = self.store.list(path).await?;
                format_attribute_set(&set, *format)
            }
            Commands::DeleteAll { path } => {
                self.store.delete_all(path).await?;
                Ok(String::new())
            }
            Commands::Copy {
                source,
                destination,
            } => {
                self.store.copy(source, destination).await?;
                Ok(String::new())
            }
            Commands::Move {
                source,
                destination,
                atomic,
            } => {
                if *atomic {
                    self.store.move_to_atomic(source, destination).await?;
                } else {
                    self.store.move_to(source, destination).await?;
                }
                Ok(String::new())
            }
            Commands::Check { purge, format } => self.handle_check(*purge, *format).await,
            Commands::Config => self.config.to_toml(),
        }
    }

    fn handle_backend(&self, format: OutputFormat) -> Result<String, AttrError> {
        let capabilities = self.store.capabilities();
        if format == OutputFormat::Json {
            let out = json!({
                "backend": self.store.kind().as_str(),
                "reason": self.reason,
                "namespace": self.store.namespace().as_str(),
                "capabilities": capabilities,
            });
            return to_json(&out);
        }
        Ok(format!(
            "Backend: {} ({})\nNamespace: {}\nPer-attribute delete: {}\nAtomic copy: {}\nAtomic move: {}",
            self.store.kind().as_str(),
            self.reason,
            self.store.namespace().as_str(),
            yes_no(capabilities.per_attribute_delete),
            yes_no(capabilities.atomic_copy),
            yes_no(capabilities.atomic_move),
        ))
    }

    async fn handle_check(&self, purge: bool, format: OutputFormat) -> Result<String, AttrError> {
        let report = self.store.check().await?;
        let removed = if purge && !report.is_clean() {
            Some(self.store.purge(&report).await?)
        } else {
            None
        };
        format_check_report(&report, removed, format)
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Backend { .. } => "backend",
        Commands::Get { .. } => "get",
        Commands::Set { .. } => "set",
        Commands::Delete { .. } => "delete",
        Commands::List { .. } => "list",
        Commands::DeleteAll { .. } => "delete-all",
        Commands::Copy { .. } => "copy",
        Commands::Move { .. } => "move",
        Commands::Check { .. } => "check",
        Commands::Config => "config",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, AttrError> {
    serde_json::to_string_pretty(value).map_err(|e| AttrError::backend("Failed to render JSON", e))
}

fn format_attribute_set(set: &AttributeSet, format: OutputFormat) -> Result<String, AttrError> {
    if format == OutputFormat::Json {
        return to_json(set);
    }
    if set.is_empty() {
        return Ok("No attributes.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "Value"]);
    for (name, value) in set {
        table.add_row(vec![name.as_str(), value.as_str()]);
    }
    Ok(table.to_string())
}

fn format_check_report(
    report: &ConsistencyReport,
    removed: Option<usize>,
    format: OutputFormat,
) -> Result<String, AttrError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "report": report, "removed": removed }));
    }
    let mut s = format!("Scanned {} attribute sets.", report.scanned_sets);
    if report.is_clean() {
        s.push_str("\nNo orphans or leftovers.");
        return Ok(s);
    }
    if !report.orphaned.is_empty() {
        s.push_str(&format!("\n\nOrphaned ({}):", report.orphaned.len()));
        for item in &report.orphaned {
            s.push_str(&format!("\n  - {}", item));
        }
    }
    if !report.leftovers.is_empty() {
        s.push_str(&format!("\n\nLeftovers ({}):", report.leftovers.len()));
        for entry in &report.leftovers {
            s.push_str(&format!("\n  - {}", entry.display()));
        }
    }
    match removed {
        Some(count) => s.push_str(&format!("\n\nRemoved {} entries.", count)),
        None => s.push_str("\n\nRun with --purge to remove them."),
    }
    Ok(s)
}
