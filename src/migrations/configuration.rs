//! # Migration Registry
//!
//! `Configuration` owns the set of registered migrations for one run and
//! answers every question about persisted migration state. Each run builds
//! its own registry; nothing here is process-global.
//!
//! Persisted state lives in a tracking collection (default
//! `antimattr_migration_versions`) holding one `{v, t}` record per applied
//! version, guarded by a unique index named `version`.

use std::cell::{Cell, OnceCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::catalog::{self, MigrationCatalog, MigrationFactory};
use super::declarative::DeclarativeMigration;
use super::errors::{MigrationError, MigrationResult};
use super::migration::Direction;
use super::statistics::{CollStatsCollector, StatisticsCollector};
use super::timestamp;
use super::version::Version;
use super::version_id::VersionId;
use crate::output::OutputWriter;
use crate::store::{
    doc, Collection, Database, Document, DocumentStore, FindOptions, IndexOptions, SortOrder,
    UpdateOptions,
};

/// Default tracking collection name.
pub const DEFAULT_COLLECTION_NAME: &str = "antimattr_migration_versions";

/// Name used when none is configured.
pub const DEFAULT_NAME: &str = "Database Migrations";

/// Name of the unique index on the tracking collection.
pub const VERSION_INDEX_NAME: &str = "version";

const FILE_PATTERN: &str = r"^Version(\d{14})\.([A-Za-z0-9]+)$";

/// A migration known to the registry.
#[derive(Clone)]
pub struct RegisteredMigration {
    version: VersionId,
    class: String,
    factory: MigrationFactory,
}

impl RegisteredMigration {
    pub fn version(&self) -> VersionId {
        self.version
    }

    /// Class name or source file the migration was registered from
    pub fn class(&self) -> &str {
        &self.class
    }

    pub(crate) fn factory(&self) -> &MigrationFactory {
        &self.factory
    }
}

impl fmt::Debug for RegisteredMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredMigration")
            .field("version", &self.version)
            .field("class", &self.class)
            .finish()
    }
}

/// Snapshot of registry state used by status reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationDetails {
    pub name: String,
    pub database: Option<String>,
    pub collection: String,
    pub namespace: Option<String>,
    pub directory: Option<PathBuf>,
    pub current_version: VersionId,
    pub latest_version: VersionId,
    pub executed_migrations: u64,
    pub executed_unavailable_migrations: usize,
    pub available_migrations: usize,
    pub new_migrations: usize,
}

/// Registry of migrations plus accessors for persisted state.
pub struct Configuration {
    store: Arc<dyn DocumentStore>,
    output: OutputWriter,
    catalog: MigrationCatalog,
    statistics_collector: Arc<dyn StatisticsCollector>,

    name: Option<String>,
    file: Option<PathBuf>,
    migrations_database_name: Option<String>,
    migrations_collection_name: String,
    migrations_namespace: Option<String>,
    migrations_directory: Option<PathBuf>,
    migrations_script_directory: Option<PathBuf>,
    dry_run: bool,

    migrations: BTreeMap<VersionId, RegisteredMigration>,

    database: OnceCell<Arc<dyn Database>>,
    collection: OnceCell<Arc<dyn Collection>>,
    collection_created: Cell<bool>,
}

impl Configuration {
    pub fn new(store: Arc<dyn DocumentStore>, output: OutputWriter) -> Self {
        Self {
            store,
            output,
            catalog: MigrationCatalog::new(),
            statistics_collector: Arc::new(CollStatsCollector),
            name: None,
            file: None,
            migrations_database_name: None,
            migrations_collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            migrations_namespace: None,
            migrations_directory: None,
            migrations_script_directory: None,
            dry_run: false,
            migrations: BTreeMap::new(),
            database: OnceCell::new(),
            collection: OnceCell::new(),
            collection_created: Cell::new(false),
        }
    }

    // ---- settings ----

    pub fn output(&self) -> &OutputWriter {
        &self.output
    }

    pub fn set_output(&mut self, output: OutputWriter) {
        self.output = output;
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn set_catalog(&mut self, catalog: MigrationCatalog) {
        self.catalog = catalog;
    }

    pub fn statistics_collector(&self) -> &dyn StatisticsCollector {
        self.statistics_collector.as_ref()
    }

    pub fn set_statistics_collector(&mut self, collector: Arc<dyn StatisticsCollector>) {
        self.statistics_collector = collector;
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Configuration file this registry was loaded from, if any
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn set_file(&mut self, file: impl Into<PathBuf>) {
        self.file = Some(file.into());
    }

    pub fn migrations_database_name(&self) -> Option<&str> {
        self.migrations_database_name.as_deref()
    }

    pub fn set_migrations_database_name(&mut self, name: impl Into<String>) {
        self.migrations_database_name = Some(name.into());
        self.reset_handles();
    }

    pub fn migrations_collection_name(&self) -> &str {
        &self.migrations_collection_name
    }

    pub fn set_migrations_collection_name(&mut self, name: impl Into<String>) {
        self.migrations_collection_name = name.into();
        self.reset_handles();
    }

    pub fn migrations_namespace(&self) -> Option<&str> {
        self.migrations_namespace.as_deref()
    }

    pub fn set_migrations_namespace(&mut self, namespace: impl Into<String>) {
        self.migrations_namespace = Some(namespace.into());
    }

    pub fn migrations_directory(&self) -> Option<&Path> {
        self.migrations_directory.as_deref()
    }

    pub fn set_migrations_directory(&mut self, directory: impl Into<PathBuf>) {
        self.migrations_directory = Some(directory.into());
    }

    pub fn migrations_script_directory(&self) -> Option<&Path> {
        self.migrations_script_directory.as_deref()
    }

    pub fn set_migrations_script_directory(&mut self, directory: impl Into<PathBuf>) {
        self.migrations_script_directory = Some(directory.into());
    }

    /// In dry-run mode hooks and statistics run but tracking records are never written.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn reset_handles(&mut self) {
        self.database = OnceCell::new();
        self.collection = OnceCell::new();
        self.collection_created.set(false);
    }

    // ---- validation and handles ----

    /// Check required settings, naming the first one missing.
    pub fn validate(&self) -> MigrationResult<()> {
        if self.migrations_database_name.is_none() {
            return Err(MigrationError::validation(
                "Migrations Database Name must be configured in order to use migrations.",
            ));
        }
        if self.migrations_namespace.is_none() {
            return Err(MigrationError::validation(
                "Migrations namespace must be configured in order to use migrations.",
            ));
        }
        if self.migrations_directory.is_none() {
            return Err(MigrationError::validation(
                "Migrations directory must be configured in order to use migrations.",
            ));
        }
        Ok(())
    }

    /// Handle on the database holding the tracking collection.
    pub fn database(&self) -> MigrationResult<Arc<dyn Database>> {
        if let Some(database) = self.database.get() {
            return Ok(Arc::clone(database));
        }

        let name = self.migrations_database_name.as_deref().ok_or_else(|| {
            MigrationError::validation(
                "Migrations Database Name must be configured in order to use migrations.",
            )
        })?;
        let database = self.store.select_database(name)?;
        let _ = self.database.set(Arc::clone(&database));
        Ok(database)
    }

    /// Handle on the tracking collection.
    pub fn collection(&self) -> MigrationResult<Arc<dyn Collection>> {
        if let Some(collection) = self.collection.get() {
            return Ok(Arc::clone(collection));
        }

        let collection = self
            .database()?
            .select_collection(&self.migrations_collection_name)?;
        let _ = self.collection.set(Arc::clone(&collection));
        Ok(collection)
    }

    /// Ensure the tracking collection and its unique index exist.
    ///
    /// Validates first. The index is only requested once per registry.
    pub fn create_migration_collection(&self) -> MigrationResult<bool> {
        self.validate()?;

        if !self.collection_created.get() {
            let collection = self.collection()?;
            collection.create_index(
                &doc([("v", json!(-1))]),
                &IndexOptions {
                    name: Some(VERSION_INDEX_NAME.to_string()),
                    unique: true,
                },
            )?;
            self.collection_created.set(true);
            debug!(collection = %self.migrations_collection_name, "Tracking collection ready");
        }

        Ok(true)
    }

    // ---- registration ----

    /// Register a migration whose class resolves through the catalog.
    pub fn register_migration(
        &mut self,
        version: &str,
        class: &str,
    ) -> MigrationResult<RegisteredMigration> {
        let factory = self.catalog.resolve(class)?;
        self.register_factory(version, class, factory)
    }

    /// Register a migration with an explicit factory.
    pub fn register_factory(
        &mut self,
        version: &str,
        class: &str,
        factory: MigrationFactory,
    ) -> MigrationResult<RegisteredMigration> {
        let version = VersionId::parse(version)?;
        if version.is_zero() {
            return Err(MigrationError::InvalidVersion(version.to_string()));
        }

        if let Some(existing) = self.migrations.get(&version) {
            return Err(MigrationError::DuplicateVersion {
                version: version.to_string(),
                class: existing.class.clone(),
            });
        }

        let entry = RegisteredMigration {
            version,
            class: class.to_string(),
            factory,
        };
        self.migrations.insert(version, entry.clone());
        debug!(version = %version, class, "Registered migration");
        Ok(entry)
    }

    /// Register every `(version, class)` pair.
    pub fn register_migrations<'a, I>(
        &mut self,
        migrations: I,
    ) -> MigrationResult<Vec<RegisteredMigration>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        migrations
            .into_iter()
            .map(|(version, class)| self.register_migration(version, class))
            .collect()
    }

    /// Register every `Version<14 digits>.<ext>` file of a directory.
    ///
    /// YAML files are loaded as declarative migrations. Other files resolve
    /// to `<namespace>::Version<digits>` in the catalog.
    pub fn register_migrations_from_directory(
        &mut self,
        path: &Path,
    ) -> MigrationResult<Vec<RegisteredMigration>> {
        let pattern = Regex::new(FILE_PATTERN)
            .map_err(|e| MigrationError::invalid_argument(e.to_string()))?;

        let entries = fs::read_dir(path).map_err(|e| MigrationError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;
            let file_path = entry.path();
            if !file_path.is_file() {
                continue;
            }
            let Some(file_name) = file_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(caps) = pattern.captures(file_name) {
                files.push((caps[1].to_string(), caps[2].to_string(), file_path.clone()));
            }
        }
        files.sort();

        let mut registered = Vec::with_capacity(files.len());
        for (digits, extension, file_path) in files {
            let entry = match extension.as_str() {
                "yaml" | "yml" => {
                    let definition = DeclarativeMigration::load(&file_path)?;
                    let factory = catalog::factory(move || definition.clone());
                    let class = file_path.display().to_string();
                    self.register_factory(&digits, &class, factory)?
                }
                _ => {
                    let namespace = self.migrations_namespace.as_deref().ok_or_else(|| {
                        MigrationError::validation(
                            "Migrations namespace must be configured in order to use migrations.",
                        )
                    })?;
                    let class = format!("{}::Version{}", namespace, digits);
                    self.register_migration(&digits, &class)?
                }
            };
            registered.push(entry);
        }

        info!(
            directory = %path.display(),
            count = registered.len(),
            "Registered migrations from directory"
        );
        Ok(registered)
    }

    // ---- registered versions ----

    /// Registered migrations in ascending version order.
    pub fn migrations(&self) -> &BTreeMap<VersionId, RegisteredMigration> {
        &self.migrations
    }

    /// All registered versions, ascending.
    pub fn available_versions(&self) -> Vec<VersionId> {
        self.migrations.keys().copied().collect()
    }

    pub fn has_version(&self, version: &VersionId) -> bool {
        self.migrations.contains_key(version)
    }

    pub fn get_version(&self, version: &VersionId) -> MigrationResult<&RegisteredMigration> {
        self.migrations
            .get(version)
            .ok_or_else(|| MigrationError::UnknownVersion(version.to_string()))
    }

    /// Executor for a registered version.
    pub fn version(&self, version: &VersionId) -> MigrationResult<Version<'_>> {
        let entry = self.get_version(version)?;
        Ok(Version::new(self, entry))
    }

    /// Highest registered version, or the sentinel.
    pub fn latest_version(&self) -> VersionId {
        self.migrations
            .keys()
            .next_back()
            .copied()
            .unwrap_or(VersionId::ZERO)
    }

    pub fn number_of_available_migrations(&self) -> usize {
        self.migrations.len()
    }

    // ---- persisted state ----

    /// Every version recorded in the tracking collection.
    pub fn migrated_versions(&self) -> MigrationResult<Vec<VersionId>> {
        self.create_migration_collection()?;

        let records = self
            .collection()?
            .find(&Document::new(), &FindOptions::default())?;
        let mut versions = records
            .iter()
            .filter_map(|record| record.get("v"))
            .map(version_of)
            .collect::<MigrationResult<Vec<_>>>()?;
        versions.sort();
        Ok(versions)
    }

    /// Versions recorded as applied that are no longer registered.
    pub fn unavailable_migrated_versions(&self) -> MigrationResult<Vec<VersionId>> {
        Ok(self
            .migrated_versions()?
            .into_iter()
            .filter(|v| !self.migrations.contains_key(v))
            .collect())
    }

    pub fn has_version_migrated(&self, version: &VersionId) -> MigrationResult<bool> {
        self.create_migration_collection()?;

        let found = self
            .collection()?
            .find_one(&doc([("v", json!(version.to_string()))]))?;
        Ok(found.is_some())
    }

    /// Highest version that is both registered and applied, or the sentinel.
    pub fn current_version(&self) -> MigrationResult<VersionId> {
        self.create_migration_collection()?;

        let registered: Vec<Value> = self
            .migrations
            .keys()
            .map(|v| json!(v.to_string()))
            .collect();
        let filter = doc([("v", json!({ "$in": registered }))]);
        let options = FindOptions::sorted("v", SortOrder::Descending).with_limit(1);

        match self.collection()?.find(&filter, &options)?.first() {
            Some(record) => record
                .get("v")
                .map(version_of)
                .unwrap_or(Ok(VersionId::ZERO)),
            None => Ok(VersionId::ZERO),
        }
    }

    pub fn number_of_executed_migrations(&self) -> MigrationResult<u64> {
        self.create_migration_collection()?;
        Ok(self
            .collection()?
            .count_documents(&Document::new())?)
    }

    /// Epoch seconds at which `version` was recorded.
    ///
    /// More than one record for a version means the unique index was
    /// bypassed and is reported as a domain error.
    pub fn migrated_timestamp(&self, version: &VersionId) -> MigrationResult<i64> {
        self.create_migration_collection()?;

        let records = self.collection()?.find(
            &doc([("v", json!(version.to_string()))]),
            &FindOptions::default(),
        )?;

        match records.as_slice() {
            [] => Err(MigrationError::UnknownVersion(version.to_string())),
            [record] => match record.get("t") {
                Some(t) => timestamp::normalize(t),
                None => Err(MigrationError::Domain(format!(
                    "Tracking record for version {} has no timestamp",
                    version
                ))),
            },
            _ => Err(MigrationError::Domain(format!(
                "Unexpected duplicate version records in the database for version {}",
                version
            ))),
        }
    }

    /// Record `version` as applied. With `replay` the record is upserted.
    pub fn mark_version_migrated(&self, version: &VersionId, replay: bool) -> MigrationResult<()> {
        self.create_migration_collection()?;

        let collection = self.collection()?;
        let record = doc([("v", json!(version.to_string())), ("t", timestamp::now())]);
        if replay {
            collection.update_one(
                &doc([("v", json!(version.to_string()))]),
                record,
                &UpdateOptions { upsert: true },
            )?;
        } else {
            collection.insert_one(record)?;
        }

        debug!(version = %version, replay, "Marked version migrated");
        Ok(())
    }

    /// Remove the tracking record of `version`. Absent records are fine.
    pub fn mark_version_not_migrated(&self, version: &VersionId) -> MigrationResult<()> {
        self.create_migration_collection()?;

        let deleted = self
            .collection()?
            .delete_one(&doc([("v", json!(version.to_string()))]))?;
        debug!(version = %version, deleted, "Marked version not migrated");
        Ok(())
    }

    // ---- planning ----

    /// Ordered plan of migrations to run towards `to`.
    ///
    /// Up: unapplied versions `<= to`, ascending. Down: applied versions
    /// `> to`, descending.
    pub fn migrations_to_execute(
        &self,
        direction: Direction,
        to: &VersionId,
    ) -> MigrationResult<Vec<RegisteredMigration>> {
        let migrated: BTreeSet<VersionId> = self.migrated_versions()?.into_iter().collect();

        let plan: Vec<RegisteredMigration> = match direction {
            Direction::Up => self
                .migrations
                .values()
                .filter(|m| !migrated.contains(&m.version) && m.version <= *to)
                .cloned()
                .collect(),
            Direction::Down => self
                .migrations
                .values()
                .rev()
                .filter(|m| migrated.contains(&m.version) && m.version > *to)
                .cloned()
                .collect(),
        };

        debug!(direction = %direction, to = %to, planned = plan.len(), "Computed migration plan");
        Ok(plan)
    }

    /// Status report of the registry and the tracking collection.
    pub fn details(&self) -> MigrationResult<ConfigurationDetails> {
        let migrated: BTreeSet<VersionId> = self.migrated_versions()?.into_iter().collect();
        let available = self.migrations.len();
        let executed_unavailable = migrated
            .iter()
            .filter(|v| !self.migrations.contains_key(v))
            .count();
        let new_migrations = self
            .migrations
            .keys()
            .filter(|v| !migrated.contains(v))
            .count();

        Ok(ConfigurationDetails {
            name: self.name().to_string(),
            database: self.migrations_database_name.clone(),
            collection: self.migrations_collection_name.clone(),
            namespace: self.migrations_namespace.clone(),
            directory: self.migrations_directory.clone(),
            current_version: self.current_version()?,
            latest_version: self.latest_version(),
            executed_migrations: self.number_of_executed_migrations()?,
            executed_unavailable_migrations: executed_unavailable,
            available_migrations: available,
            new_migrations,
        })
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("name", &self.name())
            .field("database", &self.migrations_database_name)
            .field("collection", &self.migrations_collection_name)
            .field("namespace", &self.migrations_namespace)
            .field("directory", &self.migrations_directory)
            .field("dry_run", &self.dry_run)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

fn version_of(value: &Value) -> MigrationResult<VersionId> {
    match value {
        Value::String(s) => VersionId::parse(s),
        other => Err(MigrationError::InvalidVersion(other.to_string())),
    }
}
