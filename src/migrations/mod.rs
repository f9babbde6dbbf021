//! # Document Store Migrations
//!
//! Versioned, ordered, reversible changes to a document database, with the
//! set of applied versions tracked in the database itself.
//!
//! # Design Principles
//!
//! 1. **Ordered**: versions are fixed-width `YYYYMMDDHHMMSS` identifiers and
//!    always run in version order (ascending up, descending down)
//! 2. **Tracked**: one `{v, t}` record per applied version, guarded by a
//!    unique index so a version can never be recorded twice
//! 3. **Sequential**: one migration at a time, no parallelism
//! 4. **Fail-fast**: the first failure stops the run; versions applied
//!    before it stay applied
//! 5. **Skippable**: a migration may skip itself and still be recorded
//!
//! # Components
//!
//! - [`Configuration`]: registry of migrations and persisted-state queries
//! - [`Version`]: executor driving one migration through its hooks
//! - [`Migrator`]: plans and drives a whole run
//! - [`Migration`]: trait implemented by migration bodies, either compiled
//!   Rust registered through a [`MigrationCatalog`] or YAML files loaded as
//!   [`DeclarativeMigration`]
//!
//! # Usage
//!
//! ```bash
//! docmigrate generate                      # Scaffold Version<now>.yaml
//! docmigrate migrate                       # Migrate to the latest version
//! docmigrate migrate 20140101000000        # Migrate up or down to a version
//! docmigrate execute 20140101000000 --down # Run one version
//! docmigrate status --show-versions        # Show migration status
//! ```

pub mod builder;
pub mod catalog;
pub mod configuration;
pub mod declarative;
pub mod errors;
pub mod generator;
pub mod migration;
pub mod migrator;
pub mod statistics;
pub mod timestamp;
pub mod version;
pub mod version_id;

pub use builder::{ConfigurationBuilder, FileConfiguration};
pub use catalog::{factory, MigrationCatalog, MigrationFactory};
pub use configuration::{Configuration, ConfigurationDetails, RegisteredMigration};
pub use declarative::{DeclarativeMigration, MigrationStep};
pub use errors::{MigrationError, MigrationResult};
pub use generator::{MigrationGenerator, TemplateFormat};
pub use migration::{Direction, Migration, MigrationContext};
pub use migrator::{MigrationReport, Migrator};
pub use statistics::{CollStatsCollector, Statistics, StatisticsCollector};
pub use version::{ExecutionState, Version};
pub use version_id::VersionId;
