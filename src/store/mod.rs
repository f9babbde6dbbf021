//! # Document Store Capabilities
//!
//! The migration core never talks to a concrete driver. It only needs the
//! narrow surface defined here: database and collection handles, simple
//! queries, single-document writes, index creation and raw commands.
//!
//! Three implementations ship with the crate:
//!
//! - [`MemoryStore::new`]: purely in-memory, used by tests and dry embedding
//! - [`MemoryStore::open`]: the same engine persisted to a JSON snapshot in a
//!   data directory, for local use of the command line tool
//! - [`MongoStore`]: a MongoDB server reached through the official driver

pub mod file;
pub mod filter;
pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored document.
pub type Document = Map<String, Value>;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a document store.
///
/// These pass through the migration core unmodified.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid name '{0}': names must be non-empty and must not contain '$' or NUL")]
    InvalidName(String),

    #[error("Failed to read store snapshot {path:?}: {source}")]
    SnapshotRead { path: PathBuf, source: io::Error },

    #[error("Failed to write store snapshot {path:?}: {source}")]
    SnapshotWrite { path: PathBuf, source: io::Error },

    #[error("Corrupt store snapshot {path:?}: {message}")]
    SnapshotCorrupt { path: PathBuf, message: String },

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Cannot convert value for the server: {0}")]
    Conversion(String),
}

/// Sort direction for `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Options accepted by [`Collection::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Field to sort by and its direction
    pub sort: Option<(String, SortOrder)>,

    /// Maximum number of documents to return
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sorted(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort: Some((field.into(), order)),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options accepted by [`Collection::update_one`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Insert the replacement when nothing matches
    pub upsert: bool,
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// Options accepted by [`Collection::create_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Index name; derived from the keys when absent
    pub name: Option<String>,

    /// Reject documents sharing the same key values
    #[serde(default)]
    pub unique: bool,
}

/// A connection capable of handing out database handles.
pub trait DocumentStore: Send + Sync {
    /// Select (lazily create) a database.
    fn select_database(&self, name: &str) -> StoreResult<Arc<dyn Database>>;
}

/// A database handle.
pub trait Database: Send + Sync {
    /// Database name
    fn name(&self) -> &str;

    /// Select (lazily create) a collection.
    fn select_collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>>;

    /// Run a raw database command.
    fn command(&self, command: &Document) -> StoreResult<Document>;
}

/// A collection handle.
pub trait Collection: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// Return every document matching `filter`.
    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>>;

    /// Return the first document matching `filter`.
    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>>;

    /// Insert a document. Fails with `DuplicateKey` on a unique index violation.
    fn insert_one(&self, document: Document) -> StoreResult<()>;

    /// Replace the first document matching `filter` (or insert when upserting).
    fn update_one(
        &self,
        filter: &Document,
        replacement: Document,
        options: &UpdateOptions,
    ) -> StoreResult<UpdateResult>;

    /// Delete the first document matching `filter`. Returns the number deleted.
    fn delete_one(&self, filter: &Document) -> StoreResult<u64>;

    /// Count documents matching `filter`.
    fn count_documents(&self, filter: &Document) -> StoreResult<u64>;

    /// Ensure an index exists. Returns its name.
    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String>;
}

/// Build a document from `(key, value)` pairs.
pub fn doc<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Verbs recognised when locating the command name inside a command document.
const KNOWN_COMMANDS: [&str; 16] = [
    "ping",
    "collStats",
    "dbStats",
    "drop",
    "dropDatabase",
    "dropIndexes",
    "create",
    "createIndexes",
    "collMod",
    "renameCollection",
    "listCollections",
    "listIndexes",
    "validate",
    "compact",
    "$eval",
    "eval",
];

/// Name of the command in `command`.
///
/// Document keys are sorted, so a known verb is looked up by name before
/// falling back to the first key.
pub fn command_name(command: &Document) -> Option<&str> {
    command
        .keys()
        .find(|key| KNOWN_COMMANDS.contains(&key.as_str()))
        .or_else(|| command.keys().next())
        .map(String::as_str)
}

/// Default index name for a key specification: `field_1_other_-1`.
pub fn index_name_for(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}
