//! # Configuration Builder
//!
//! Assembles a [`Configuration`] from a store handle, an output writer, a
//! migration catalog and, optionally, an on-disk configuration file.
//!
//! The file format follows the extension (`.yml`/`.yaml`, `.toml`, `.json`):
//!
//! ```yaml
//! name: Example Migrations
//! database: app
//! collection_name: migration_versions
//! migrations_namespace: app::migrations
//! migrations_directory: migrations
//! migrations_script_directory: migrations/scripts
//! migrations:
//!   - version: "20140101000000"
//!     class: app::migrations::Version20140101000000
//! ```
//!
//! Relative directories are resolved against the file's own directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::catalog::MigrationCatalog;
use super::configuration::Configuration;
use super::errors::{MigrationError, MigrationResult};
use super::statistics::StatisticsCollector;
use crate::output::OutputWriter;
use crate::store::DocumentStore;

/// Contents of a migrations configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfiguration {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub collection_name: Option<String>,

    #[serde(default)]
    pub migrations_namespace: Option<String>,

    #[serde(default)]
    pub migrations_directory: Option<PathBuf>,

    #[serde(default)]
    pub migrations_script_directory: Option<PathBuf>,

    #[serde(default)]
    pub dry_run: bool,

    /// Explicit registrations, resolved through the catalog
    #[serde(default)]
    pub migrations: Vec<MigrationEntry>,
}

/// One explicit registration of a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub version: String,
    pub class: String,
}

/// Parse a file as YAML, TOML or JSON depending on its extension.
pub fn parse_file<T>(path: &Path) -> MigrationResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| MigrationError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let parse_error = |message: String| MigrationError::ParseError {
        path: path.to_path_buf(),
        message,
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        _ => Err(MigrationError::invalid_argument(format!(
            "Configuration file {} must be .yml, .yaml, .toml or .json",
            path.display()
        ))),
    }
}

impl FileConfiguration {
    pub fn load(path: &Path) -> MigrationResult<Self> {
        parse_file(path)
    }
}

/// Fluent builder for [`Configuration`].
pub struct ConfigurationBuilder {
    store: Arc<dyn DocumentStore>,
    output: OutputWriter,
    catalog: MigrationCatalog,
    statistics_collector: Option<Arc<dyn StatisticsCollector>>,
    file: Option<PathBuf>,
}

impl ConfigurationBuilder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            output: OutputWriter::silent(),
            catalog: MigrationCatalog::new(),
            statistics_collector: None,
            file: None,
        }
    }

    pub fn output(mut self, output: OutputWriter) -> Self {
        self.output = output;
        self
    }

    pub fn catalog(mut self, catalog: MigrationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn statistics_collector(mut self, collector: Arc<dyn StatisticsCollector>) -> Self {
        self.statistics_collector = Some(collector);
        self
    }

    /// Load settings and registrations from a configuration file.
    pub fn on_disk_configuration(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Build the registry.
    ///
    /// With a configuration file, explicit `migrations` entries are
    /// registered first, then the migrations directory is scanned.
    pub fn build(self) -> MigrationResult<Configuration> {
        let mut configuration = Configuration::new(self.store, self.output);
        configuration.set_catalog(self.catalog);
        if let Some(collector) = self.statistics_collector {
            configuration.set_statistics_collector(collector);
        }

        let Some(path) = self.file else {
            return Ok(configuration);
        };

        let file = FileConfiguration::load(&path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        configuration.set_file(&path);
        if let Some(name) = file.name {
            configuration.set_name(name);
        }
        if let Some(database) = file.database {
            configuration.set_migrations_database_name(database);
        }
        if let Some(collection) = file.collection_name {
            configuration.set_migrations_collection_name(collection);
        }
        if let Some(namespace) = file.migrations_namespace {
            configuration.set_migrations_namespace(namespace);
        }
        if let Some(directory) = &file.migrations_script_directory {
            configuration.set_migrations_script_directory(resolve_path(&base, directory));
        }
        configuration.set_dry_run(file.dry_run);

        for entry in &file.migrations {
            configuration.register_migration(&entry.version, &entry.class)?;
        }

        if let Some(directory) = &file.migrations_directory {
            let directory = resolve_path(&base, directory);
            configuration.set_migrations_directory(&directory);
            if directory.is_dir() {
                configuration.register_migrations_from_directory(&directory)?;
            }
        }

        debug!(
            file = %path.display(),
            migrations = configuration.number_of_available_migrations(),
            "Loaded migrations configuration"
        );
        Ok(configuration)
    }
}

/// Resolve `path` against `base`, canonicalised when it exists.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    fs::canonicalize(&joined).unwrap_or(joined)
}
