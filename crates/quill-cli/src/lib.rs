//! Command-line front end for the quill transform engine.

mod bootstrap_helpers;
pub mod cli_args;
pub mod commands;

pub use bootstrap_helpers::init_tracing;
pub use cli_args::{Cli, CliCommand};
pub use commands::execute_cli;
