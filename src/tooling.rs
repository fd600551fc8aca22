//! Tooling & Integration Layer
//!
//! Operator-facing entry points built on the attribute store.

pub mod cli;

pub use cli::{run, Cli, CliContext, Commands, OutputFormat};
