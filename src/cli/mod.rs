//! Command-line interface for fixeval.
//!
//! Provides commands for running evaluations and listing registered
//! components.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
