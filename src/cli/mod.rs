//! Command line interface over the migrations core.

pub mod args;
pub mod commands;
pub mod errors;

pub use args::{Cli, Command};
pub use commands::{run, run_command, CommandContext, DbConfig};
pub use errors::{CliError, CliResult};
