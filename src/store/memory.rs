//! # In-Memory Document Store
//!
//! A small document engine implementing the store capability traits.
//! Unique indexes are enforced on every write, which is what makes the
//! migration tracking collection safe against double application.
//!
//! When opened over a data directory every successful mutation is persisted
//! to a JSON snapshot (see [`super::file`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::file::{load_snapshot, write_snapshot, SNAPSHOT_FILE};
use super::filter::{compare, lookup, matches};
use super::{
    command_name, index_name_for, Collection, Database, Document, DocumentStore, FindOptions,
    IndexOptions, SortOrder, StoreError, StoreResult, UpdateOptions, UpdateResult,
};

/// Complete store contents, as persisted in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseData {
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionData {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Document,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    fn key_of(&self, document: &Document) -> Vec<Value> {
        self.keys
            .keys()
            .map(|field| lookup(document, field).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl CollectionData {
    /// Check `candidate` against every unique index, ignoring the document at `skip`.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.key_of(candidate);
            let clash = self
                .documents
                .iter()
                .enumerate()
                .any(|(pos, existing)| Some(pos) != skip && index.key_of(existing) == key);
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name.clone(),
                    key: Value::Array(key).to_string(),
                });
            }
        }
        Ok(())
    }

    fn position(&self, filter: &Document) -> StoreResult<Option<usize>> {
        for (pos, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    fn stats(&self, namespace: &str) -> Document {
        let sizes: Vec<usize> = self
            .documents
            .iter()
            .map(|d| Value::Object(d.clone()).to_string().len())
            .collect();
        let size: usize = sizes.iter().sum();
        let count = self.documents.len();
        let avg = if count == 0 { 0 } else { size / count };
        let total_index_size: usize = self
            .indexes
            .iter()
            .map(|index| {
                self.documents
                    .iter()
                    .map(|d| Value::Array(index.key_of(d)).to_string().len())
                    .sum::<usize>()
            })
            .sum();

        let stats = json!({
            "ns": namespace,
            "count": count,
            "size": size,
            "avgObjSize": avg,
            "storageSize": size,
            "nindexes": self.indexes.len(),
            "totalIndexSize": total_index_size,
            "ok": 1,
        });
        match stats {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    data: RwLock<StoreSnapshot>,
    snapshot_path: Option<PathBuf>,
    evaluated: RwLock<Vec<String>>,
}

impl StoreInner {
    fn read<R>(&self, f: impl FnOnce(&StoreSnapshot) -> R) -> R {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }

    /// Apply a mutation to a staged copy and persist it when backed by a
    /// snapshot. The live contents change only once both steps succeed.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreSnapshot) -> StoreResult<R>) -> StoreResult<R> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut staged = data.clone();
        let result = f(&mut staged)?;
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &staged)?;
        }
        *data = staged;
        Ok(result)
    }

    fn with_collection<R>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(Option<&CollectionData>) -> R,
    ) -> R {
        self.read(|data| {
            f(data
                .databases
                .get(database)
                .and_then(|db| db.collections.get(collection)))
        })
    }

    fn with_collection_mut<R>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(&mut CollectionData) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.mutate(|data| {
            let coll = data
                .databases
                .entry(database.to_string())
                .or_default()
                .collections
                .entry(collection.to_string())
                .or_default();
            f(coll)
        })
    }
}

/// In-memory document store, optionally persisted to a data directory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(StoreSnapshot::default()),
                snapshot_path: None,
                evaluated: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Open a store persisted under `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).map_err(|e| StoreError::SnapshotWrite {
                path: data_dir.to_path_buf(),
                source: e,
            })?;
        }

        let path = data_dir.join(SNAPSHOT_FILE);
        let snapshot = load_snapshot(&path)?;
        debug!(path = %path.display(), databases = snapshot.databases.len(), "Opened file store");

        Ok(Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(snapshot),
                snapshot_path: Some(path),
                evaluated: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Scripts received through `$eval`, in arrival order. Only a store
    /// created with [`MemoryStore::new`] accepts scripts.
    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.inner
            .evaluated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Insert without any unique index check, simulating a corrupted collection.
    #[cfg(test)]
    pub(crate) fn force_insert(&self, database: &str, collection: &str, document: Document) {
        let mut data = self.inner.data.write().unwrap_or_else(PoisonError::into_inner);
        data.databases
            .entry(database.to_string())
            .or_default()
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .push(document);
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains('$') || name.contains('\0') {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    fn select_database(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        validate_name(name)?;
        Ok(Arc::new(MemoryDatabase {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }))
    }
}

/// Database handle of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryDatabase {
    inner: Arc<StoreInner>,
    name: String,
}

impl MemoryDatabase {
    fn command_target<'a>(&self, command: &'a Document, key: &str) -> StoreResult<&'a str> {
        command
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::CommandFailed {
                command: key.to_string(),
                message: "expected a collection name".to_string(),
            })
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        validate_name(name)?;
        Ok(Arc::new(MemoryCollection {
            inner: Arc::clone(&self.inner),
            database: self.name.clone(),
            name: name.to_string(),
        }))
    }

    fn command(&self, command: &Document) -> StoreResult<Document> {
        let name = command_name(command)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnsupportedCommand("<empty>".to_string()))?;

        match name.as_str() {
            "ping" => Ok(ok_document()),
            "collStats" => {
                let target = self.command_target(command, "collStats")?;
                let namespace = format!("{}.{}", self.name, target);
                Ok(self.inner.with_collection(&self.name, target, |coll| match coll {
                    Some(coll) => coll.stats(&namespace),
                    None => {
                        let mut reply = Document::new();
                        reply.insert("ok".to_string(), json!(0));
                        reply.insert("errmsg".to_string(), json!(format!("ns not found {}", namespace)));
                        reply
                    }
                }))
            }
            "drop" => {
                let target = self.command_target(command, "drop")?.to_string();
                self.inner.mutate(|data| {
                    if let Some(db) = data.databases.get_mut(&self.name) {
                        db.collections.remove(&target);
                    }
                    Ok(ok_document())
                })
            }
            "dropIndexes" => {
                let target = self.command_target(command, "dropIndexes")?.to_string();
                let index = command
                    .get("index")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::CommandFailed {
                        command: "dropIndexes".to_string(),
                        message: "expected an index name".to_string(),
                    })?
                    .to_string();
                self.inner.with_collection_mut(&self.name, &target, |coll| {
                    let before = coll.indexes.len();
                    coll.indexes.retain(|i| i.name != index);
                    if coll.indexes.len() == before {
                        return Err(StoreError::CommandFailed {
                            command: "dropIndexes".to_string(),
                            message: format!("index not found with name [{}]", index),
                        });
                    }
                    Ok(ok_document())
                })
            }
            "$eval" | "eval" => {
                let script = command
                    .get(&name)
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::CommandFailed {
                        command: name.clone(),
                        message: "expected script source".to_string(),
                    })?;
                if self.inner.snapshot_path.is_some() {
                    return Err(StoreError::UnsupportedCommand(format!(
                        "{} (the file store cannot run server-side scripts)",
                        name
                    )));
                }
                self.inner
                    .evaluated
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(script.to_string());
                let mut reply = ok_document();
                reply.insert("retval".to_string(), Value::Null);
                Ok(reply)
            }
            other => Err(StoreError::UnsupportedCommand(other.to_string())),
        }
    }
}

fn ok_document() -> Document {
    let mut reply = Document::new();
    reply.insert("ok".to_string(), json!(1));
    reply
}

/// Collection handle of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryCollection {
    inner: Arc<StoreInner>,
    database: String,
    name: String,
}

impl MemoryCollection {
    fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }
}

/// Apply a replacement or `$set`/`$unset` update to an existing document.
fn apply_update(existing: &Document, update: &Document) -> Document {
    let is_operator_update = !update.is_empty() && update.keys().all(|k| k.starts_with('$'));
    if !is_operator_update {
        return update.clone();
    }

    let mut updated = existing.clone();
    if let Some(Value::Object(set)) = update.get("$set") {
        for (k, v) in set {
            updated.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Object(unset)) = update.get("$unset") {
        for k in unset.keys() {
            updated.remove(k);
        }
    }
    updated
}

/// Seed an upserted document with the equality fields of the filter.
fn upsert_seed(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(k, v)| {
            !k.starts_with('$') && !matches!(v, Value::Object(m) if m.keys().any(|k| k.starts_with('$')))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        let mut found = self.inner.with_collection(&self.database, &self.name, |coll| {
            let mut found = Vec::new();
            if let Some(coll) = coll {
                for document in &coll.documents {
                    if matches(document, filter)? {
                        found.push(document.clone());
                    }
                }
            }
            Ok::<_, StoreError>(found)
        })?;

        if let Some((field, order)) = &options.sort {
            found.sort_by(|a, b| {
                let ordering = match (lookup(a, field), lookup(b, field)) {
                    (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(std::cmp::Ordering::Equal),
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = options.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self
            .find(filter, &FindOptions::default().with_limit(1))?
            .into_iter()
            .next())
    }

    fn insert_one(&self, document: Document) -> StoreResult<()> {
        let namespace = self.namespace();
        self.inner
            .with_collection_mut(&self.database, &self.name, |coll| {
                coll.check_unique(&namespace, &document, None)?;
                coll.documents.push(document);
                Ok(())
            })
    }

    fn update_one(
        &self,
        filter: &Document,
        replacement: Document,
        options: &UpdateOptions,
    ) -> StoreResult<UpdateResult> {
        let namespace = self.namespace();
        self.inner
            .with_collection_mut(&self.database, &self.name, |coll| {
                match coll.position(filter)? {
                    Some(pos) => {
                        let updated = apply_update(&coll.documents[pos], &replacement);
                        coll.check_unique(&namespace, &updated, Some(pos))?;
                        let modified = coll.documents[pos] != updated;
                        coll.documents[pos] = updated;
                        Ok(UpdateResult {
                            matched: 1,
                            modified: u64::from(modified),
                            upserted: false,
                        })
                    }
                    None if options.upsert => {
                        let document = apply_update(&upsert_seed(filter), &replacement);
                        coll.check_unique(&namespace, &document, None)?;
                        coll.documents.push(document);
                        Ok(UpdateResult {
                            matched: 0,
                            modified: 0,
                            upserted: true,
                        })
                    }
                    None => Ok(UpdateResult::default()),
                }
            })
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<u64> {
        self.inner
            .with_collection_mut(&self.database, &self.name, |coll| {
                match coll.position(filter)? {
                    Some(pos) => {
                        coll.documents.remove(pos);
                        Ok(1)
                    }
                    None => Ok(0),
                }
            })
    }

    fn count_documents(&self, filter: &Document) -> StoreResult<u64> {
        self.inner.with_collection(&self.database, &self.name, |coll| -> StoreResult<u64> {
            let mut count = 0;
            if let Some(coll) = coll {
                for document in &coll.documents {
                    if matches(document, filter)? {
                        count += 1;
                    }
                }
            }
            Ok(count)
        })
    }

    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String> {
        let name = options.name.clone().unwrap_or_else(|| index_name_for(keys));
        let namespace = self.namespace();
        let spec = IndexSpec {
            name: name.clone(),
            keys: keys.clone(),
            unique: options.unique,
        };

        self.inner
            .with_collection_mut(&self.database, &self.name, |coll| {
                if let Some(existing) = coll.indexes.iter().find(|i| i.name == spec.name) {
                    if *existing == spec {
                        return Ok(spec.name.clone());
                    }
                    return Err(StoreError::CommandFailed {
                        command: "createIndexes".to_string(),
                        message: format!(
                            "Index with name: {} already exists with different options",
                            spec.name
                        ),
                    });
                }

                if spec.unique {
                    let mut seen: Vec<Vec<Value>> = Vec::new();
                    for document in &coll.documents {
                        let key = spec.key_of(document);
                        if seen.contains(&key) {
                            return Err(StoreError::DuplicateKey {
                                collection: namespace.clone(),
                                index: spec.name.clone(),
                                key: Value::Array(key).to_string(),
                            });
                        }
                        seen.push(key);
                    }
                }

                coll.indexes.push(spec.clone());
                Ok(spec.name.clone())
            })?;

        debug!(namespace = %self.namespace(), index = %name, "Ensured index");
        Ok(name)
    }
}
