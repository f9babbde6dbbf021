//! CLI argument definitions using clap
//!
//! Commands:
//! - docmigrate migrate [version]
//! - docmigrate execute <version> [--up|--down] [--replay]
//! - docmigrate status [--show-versions]
//! - docmigrate version <version> --add|--delete
//! - docmigrate generate [--format yaml|rust] [--editor-cmd CMD]

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::migrations::TemplateFormat;

/// docmigrate - versioned migrations for document databases
#[derive(Parser, Debug)]
#[command(name = "docmigrate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Migrations configuration file (.yml, .yaml, .toml or .json)
    #[arg(long, global = true, default_value = "./migrations.yml")]
    pub configuration: PathBuf,

    /// Database configuration file (.yml, .yaml, .toml or .json)
    #[arg(long = "db-configuration", global = true)]
    pub db_configuration: Option<PathBuf>,

    /// Do not ask for any confirmation
    #[arg(long = "no-interaction", short = 'n', global = true)]
    pub no_interaction: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Migrate to a specified version or the latest available version
    Migrate {
        /// Version to migrate to; defaults to the latest registered version
        version: Option<String>,
    },

    /// Execute a single migration version up or down manually
    Execute {
        /// Version to execute
        version: String,

        /// Execute the migration up (default)
        #[arg(long, conflicts_with = "down")]
        up: bool,

        /// Execute the migration down
        #[arg(long)]
        down: bool,

        /// Re-run an already applied migration, upserting its record
        #[arg(long)]
        replay: bool,
    },

    /// View the status of a set of migrations
    Status {
        /// List every registered version and whether it is applied
        #[arg(long)]
        show_versions: bool,
    },

    /// Manually add or delete a version from the version collection
    Version {
        /// Version to add or delete
        version: String,

        /// Record the version as applied
        #[arg(long, conflicts_with = "delete")]
        add: bool,

        /// Remove the version's record
        #[arg(long)]
        delete: bool,
    },

    /// Generate a blank migration file
    Generate {
        /// Template to generate. `rust` needs an application that registers
        /// compiled migrations in its catalog.
        #[arg(long, value_enum, default_value_t = GenerateFormat::Yaml)]
        format: GenerateFormat,

        /// Open the generated file with this editor command
        #[arg(long)]
        editor_cmd: Option<String>,
    },
}

/// Template choices of `generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerateFormat {
    Yaml,
    Rust,
}

impl From<GenerateFormat> for TemplateFormat {
    fn from(format: GenerateFormat) -> Self {
        match format {
            GenerateFormat::Yaml => TemplateFormat::Yaml,
            GenerateFormat::Rust => TemplateFormat::Rust,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_globals_after_subcommand() {
        let cli = Cli::parse_from(["docmigrate", "migrate", "20140101000000", "-n"]);

        assert!(cli.no_interaction);
        assert_eq!(cli.configuration, PathBuf::from("./migrations.yml"));
        assert!(matches!(
            cli.command,
            Command::Migrate { version: Some(v) } if v == "20140101000000"
        ));
    }

    #[test]
    fn test_execute_up_and_down_conflict() {
        let result = Cli::try_parse_from(["docmigrate", "execute", "20140101000000", "--up", "--down"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_format() {
        let cli = Cli::parse_from(["docmigrate", "generate", "--format", "rust"]);
        assert!(matches!(
            cli.command,
            Command::Generate {
                format: GenerateFormat::Rust,
                editor_cmd: None
            }
        ));
    }
}
