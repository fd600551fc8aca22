//! Integration tests for the extended attribute store

mod backend_properties;
mod cli_contracts;
mod scenarios;
mod support;
