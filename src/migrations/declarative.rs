//! # Declarative Migrations
//!
//! Migrations written as YAML instead of Rust. Each direction is a list of
//! steps executed in order against the target database:
//!
//! ```yaml
//! description: Add unique email index
//! up:
//!   - analyze:
//!       collection: users
//!   - create_index:
//!       collection: users
//!       fields: [email]
//!       unique: true
//!       name: email_unique
//! down:
//!   - drop_index:
//!       collection: users
//!       name: email_unique
//! ```
//!
//! A field prefixed with `-` in `fields` is indexed descending. An empty
//! `down` list makes the migration irreversible.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::errors::{MigrationError, MigrationResult};
use super::migration::{Migration, MigrationContext};
use crate::store::{Document, IndexOptions, UpdateOptions};

/// A single declarative step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Track before/after statistics for a collection
    Analyze { collection: String },

    /// Create an index
    CreateIndex {
        collection: String,
        fields: Vec<String>,
        #[serde(default)]
        unique: bool,
        #[serde(default)]
        name: Option<String>,
    },

    /// Drop an index by name
    DropIndex { collection: String, name: String },

    /// Drop a whole collection
    DropCollection { name: String },

    /// Insert documents
    Insert {
        collection: String,
        documents: Vec<Document>,
    },

    /// Update the first matching document
    Update {
        collection: String,
        filter: Document,
        update: Document,
        #[serde(default)]
        upsert: bool,
    },

    /// Delete every matching document
    Delete { collection: String, filter: Document },

    /// Raw database command (escape hatch)
    Command { command: Document },

    /// Script file from the script directory
    Script { file: String },

    /// Skip the migration when a matching document exists
    SkipIf {
        collection: String,
        filter: Document,
        #[serde(default)]
        reason: String,
    },

    /// Abort the run when a matching document exists
    AbortIf {
        collection: String,
        filter: Document,
        #[serde(default)]
        reason: String,
    },

    /// Progress message
    Write { message: String },
}

/// A migration loaded from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeMigration {
    #[serde(default)]
    pub description: String,

    pub up: Vec<MigrationStep>,

    #[serde(default)]
    pub down: Vec<MigrationStep>,

    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl DeclarativeMigration {
    /// Read and validate a migration file.
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| MigrationError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut migration: DeclarativeMigration =
            serde_yaml::from_str(&content).map_err(|e| MigrationError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        migration.file_path = Some(path.to_path_buf());
        if migration.description.is_empty() {
            migration.description = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
        }

        migration.validate().map_err(|reason| MigrationError::ParseError {
            path: path.to_path_buf(),
            message: reason,
        })?;
        Ok(migration)
    }

    fn validate(&self) -> Result<(), String> {
        if self.up.is_empty() {
            return Err("Migration must have at least one 'up' step".to_string());
        }
        Ok(())
    }
}

impl Migration for DeclarativeMigration {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn up(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        run_steps(&self.up, ctx)
    }

    fn down(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        if self.down.is_empty() {
            return Err(ctx.irreversible(None));
        }
        run_steps(&self.down, ctx)
    }
}

fn run_steps(steps: &[MigrationStep], ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
    for (i, step) in steps.iter().enumerate() {
        debug!(version = %ctx.version(), step = i, "Running declarative step");
        apply(step, ctx)?;
    }
    Ok(())
}

fn apply(step: &MigrationStep, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
    match step {
        MigrationStep::Analyze { collection } => {
            ctx.analyze(collection);
        }
        MigrationStep::CreateIndex {
            collection,
            fields,
            unique,
            name,
        } => {
            let keys: Document = fields.iter().map(|field| index_key(field)).collect();
            ctx.collection(collection)?.create_index(
                &keys,
                &IndexOptions {
                    name: name.clone(),
                    unique: *unique,
                },
            )?;
        }
        MigrationStep::DropIndex { collection, name } => {
            let mut command = Document::new();
            command.insert("dropIndexes".to_string(), json!(collection));
            command.insert("index".to_string(), json!(name));
            ctx.database().command(&command)?;
        }
        MigrationStep::DropCollection { name } => {
            let mut command = Document::new();
            command.insert("drop".to_string(), json!(name));
            ctx.database().command(&command)?;
        }
        MigrationStep::Insert {
            collection,
            documents,
        } => {
            let collection = ctx.collection(collection)?;
            for document in documents {
                collection.insert_one(document.clone())?;
            }
        }
        MigrationStep::Update {
            collection,
            filter,
            update,
            upsert,
        } => {
            ctx.collection(collection)?.update_one(
                filter,
                update.clone(),
                &UpdateOptions { upsert: *upsert },
            )?;
        }
        MigrationStep::Delete { collection, filter } => {
            let collection = ctx.collection(collection)?;
            while collection.delete_one(filter)? > 0 {}
        }
        MigrationStep::Command { command } => {
            ctx.database().command(command)?;
        }
        MigrationStep::Script { file } => {
            ctx.execute_script(file)?;
        }
        MigrationStep::SkipIf {
            collection,
            filter,
            reason,
        } => {
            let exists = ctx.collection(collection)?.find_one(filter)?.is_some();
            ctx.skip_if(exists, reason)?;
        }
        MigrationStep::AbortIf {
            collection,
            filter,
            reason,
        } => {
            let exists = ctx.collection(collection)?.find_one(filter)?.is_some();
            ctx.abort_if(exists, reason)?;
        }
        MigrationStep::Write { message } => ctx.write(message),
    }
    Ok(())
}

fn index_key(field: &str) -> (String, Value) {
    match field.strip_prefix('-') {
        Some(name) => (name.to_string(), json!(-1)),
        None => (field.to_string(), json!(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::catalog::factory;
    use crate::migrations::configuration::Configuration;
    use crate::migrations::migration::Direction;
    use crate::migrations::version_id::VersionId;
    use crate::output::OutputWriter;
    use crate::store::{doc, Collection, DocumentStore, MemoryStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    const INDEX_MIGRATION: &str = r#"
description: Add unique email index
up:
  - create_index:
      collection: users
      fields: [email, -created]
      unique: true
      name: email_unique
  - insert:
      collection: users
      documents:
        - { email: ada@example.com, created: 1 }
down:
  - delete:
      collection: users
      filter: { email: ada@example.com }
  - drop_index:
      collection: users
      name: email_unique
"#;

    fn configuration(store: &MemoryStore, migration: DeclarativeMigration) -> Configuration {
        let mut config = Configuration::new(Arc::new(store.clone()), OutputWriter::silent());
        config.set_migrations_database_name("app");
        config.set_migrations_namespace("app::migrations");
        config.set_migrations_directory("/tmp/migrations");
        config
            .register_factory("20140101000000", "declarative", factory(move || migration.clone()))
            .unwrap();
        config
    }

    fn users(store: &MemoryStore) -> Arc<dyn Collection> {
        store
            .select_database("app")
            .unwrap()
            .select_collection("users")
            .unwrap()
    }

    fn v() -> VersionId {
        VersionId::parse("20140101000000").unwrap()
    }

    #[test]
    fn test_step_serialization() {
        let step = MigrationStep::DropIndex {
            collection: "users".to_string(),
            name: "email_unique".to_string(),
        };

        let yaml = serde_yaml::to_string(&step).unwrap();
        assert!(yaml.contains("drop_index"));
        assert!(yaml.contains("email_unique"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Version20140101000000.yaml");
        fs::write(&path, INDEX_MIGRATION).unwrap();

        let migration = DeclarativeMigration::load(&path).unwrap();
        assert_eq!(migration.description, "Add unique email index");
        assert_eq!(migration.up.len(), 2);
        assert_eq!(migration.down.len(), 2);
        assert_eq!(migration.file_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_rejects_empty_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Version20140101000000.yaml");
        fs::write(&path, "description: nothing\nup: []\n").unwrap();

        let result = DeclarativeMigration::load(&path);
        assert!(matches!(result, Err(MigrationError::ParseError { message, .. }) if message.contains("up")));
    }

    #[test]
    fn test_up_and_down_against_store() {
        let migration: DeclarativeMigration = serde_yaml::from_str(INDEX_MIGRATION).unwrap();
        let store = MemoryStore::new();
        let config = configuration(&store, migration);

        let mut version = config.version(&v()).unwrap();
        version.execute(Direction::Up, false).unwrap();
        assert_eq!(users(&store).count_documents(&Document::new()).unwrap(), 1);

        let duplicate = users(&store).insert_one(doc([
            ("email", json!("ada@example.com")),
            ("created", json!(1)),
        ]));
        assert!(duplicate.is_err());

        version.execute(Direction::Down, false).unwrap();
        assert_eq!(users(&store).count_documents(&Document::new()).unwrap(), 0);
        assert!(!config.has_version_migrated(&v()).unwrap());
    }

    #[test]
    fn test_empty_down_is_irreversible() {
        let migration: DeclarativeMigration =
            serde_yaml::from_str("up:\n  - write:\n      message: hello\n").unwrap();
        let store = MemoryStore::new();
        let config = configuration(&store, migration);

        let mut version = config.version(&v()).unwrap();
        version.execute(Direction::Up, false).unwrap();

        let err = version.execute(Direction::Down, false).unwrap_err();
        assert!(matches!(err, MigrationError::Irreversible(m) if m.contains("irreversible")));
        assert!(config.has_version_migrated(&v()).unwrap());
    }

    #[test]
    fn test_skip_if_existing_document() {
        let migration: DeclarativeMigration = serde_yaml::from_str(
            r#"
up:
  - skip_if:
      collection: users
      filter: { email: ada@example.com }
      reason: already seeded
  - insert:
      collection: users
      documents:
        - { email: ada@example.com }
"#,
        )
        .unwrap();
        let store = MemoryStore::new();
        users(&store)
            .insert_one(doc([("email", json!("ada@example.com"))]))
            .unwrap();
        let config = configuration(&store, migration);

        let mut version = config.version(&v()).unwrap();
        version.execute(Direction::Up, false).unwrap();

        assert_eq!(users(&store).count_documents(&Document::new()).unwrap(), 1);
        assert!(config.has_version_migrated(&v()).unwrap());
    }
}
