//! davattr CLI Binary
//!
//! Command-line interface for the WebDAV extended attribute store.

use clap::Parser;
use davattr::tooling::cli::{run, Cli};
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
