//! # MongoDB Store
//!
//! [`DocumentStore`] over a MongoDB server, using the driver's blocking API.
//!
//! Documents cross the boundary as JSON. Values going to the server are
//! converted field by field, with `{"$date": ...}` objects becoming BSON
//! dates. Values coming back are rendered as relaxed extended JSON, so dates
//! read back as `{"$date": "<rfc3339>"}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use mongodb::bson::{self, Bson, Document as BsonDocument};
use mongodb::options::{
    FindOptions as DriverFindOptions, IndexOptions as DriverIndexOptions, ReplaceOptions,
    UpdateOptions as DriverUpdateOptions,
};
use mongodb::sync::{Client, Collection as DriverCollection, Database as DriverDatabase};
use mongodb::IndexModel;
use serde_json::{Number, Value};
use tracing::debug;

use super::{
    command_name, index_name_for, Collection, Database, Document, DocumentStore, FindOptions,
    IndexOptions, SortOrder, StoreError, StoreResult, UpdateOptions, UpdateResult,
};

/// Default MongoDB port
pub const DEFAULT_PORT: u16 = 27017;

/// Server address and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConnection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database named in the URI path, used for authentication
    pub database: Option<String>,
    /// Extra URI options such as `replicaSet` or `authSource`
    pub options: BTreeMap<String, String>,
}

impl Default for MongoConnection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            database: None,
            options: BTreeMap::new(),
        }
    }
}

impl MongoConnection {
    /// `mongodb://[user[:password]@]host:port[/database][?options]`
    pub fn uri(&self) -> String {
        let mut uri = String::from("mongodb://");

        if let Some(username) = &self.username {
            uri.push_str(&urlencoding::encode(username));
            if let Some(password) = &self.password {
                uri.push(':');
                uri.push_str(&urlencoding::encode(password));
            }
            uri.push('@');
        }

        uri.push_str(&format!("{}:{}", self.host, self.port));

        if let Some(database) = &self.database {
            uri.push('/');
            uri.push_str(&urlencoding::encode(database));
        }

        if !self.options.is_empty() {
            if self.database.is_none() {
                uri.push('/');
            }
            let query: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            uri.push('?');
            uri.push_str(&query.join("&"));
        }

        uri
    }
}

/// Store backed by a MongoDB server.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Create a client for `connection`. The driver connects lazily, so an
    /// unreachable server surfaces on the first operation.
    pub fn connect(connection: &MongoConnection) -> StoreResult<Self> {
        let client = Client::with_uri_str(connection.uri())?;
        debug!(host = %connection.host, port = connection.port, "Created MongoDB client");
        Ok(Self { client })
    }
}

impl DocumentStore for MongoStore {
    fn select_database(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        Ok(Arc::new(MongoDatabase {
            database: self.client.database(name),
        }))
    }
}

/// Database handle of a [`MongoStore`].
#[derive(Debug)]
pub struct MongoDatabase {
    database: DriverDatabase,
}

impl Database for MongoDatabase {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn select_collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        Ok(Arc::new(MongoCollection {
            collection: self.database.collection::<BsonDocument>(name),
        }))
    }

    fn command(&self, command: &Document) -> StoreResult<Document> {
        let reply = self.database.run_command(command_document(command)?, None)?;
        Ok(from_bson_document(reply))
    }
}

/// Collection handle of a [`MongoStore`].
#[derive(Debug)]
pub struct MongoCollection {
    collection: DriverCollection<BsonDocument>,
}

impl Collection for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        let sort = options.sort.as_ref().map(|(field, order)| {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            let mut sort = BsonDocument::new();
            sort.insert(field.as_str(), direction);
            sort
        });
        let limit = options
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let find_options = DriverFindOptions::builder().sort(sort).limit(limit).build();

        let cursor = self
            .collection
            .find(to_bson_document(filter)?, find_options)?;
        let mut found = Vec::new();
        for document in cursor {
            found.push(from_bson_document(document?));
        }
        Ok(found)
    }

    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self
            .collection
            .find_one(to_bson_document(filter)?, None)?
            .map(from_bson_document))
    }

    fn insert_one(&self, document: Document) -> StoreResult<()> {
        self.collection
            .insert_one(to_bson_document(&document)?, None)?;
        Ok(())
    }

    fn update_one(
        &self,
        filter: &Document,
        replacement: Document,
        options: &UpdateOptions,
    ) -> StoreResult<UpdateResult> {
        let filter = to_bson_document(filter)?;
        let update = to_bson_document(&replacement)?;
        let is_operator_update = !update.is_empty() && update.keys().all(|k| k.starts_with('$'));

        let result = if is_operator_update {
            let driver_options = DriverUpdateOptions::builder()
                .upsert(Some(options.upsert))
                .build();
            self.collection.update_one(filter, update, driver_options)?
        } else {
            let driver_options = ReplaceOptions::builder()
                .upsert(Some(options.upsert))
                .build();
            self.collection.replace_one(filter, update, driver_options)?
        };

        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<u64> {
        let result = self.collection.delete_one(to_bson_document(filter)?, None)?;
        Ok(result.deleted_count)
    }

    fn count_documents(&self, filter: &Document) -> StoreResult<u64> {
        Ok(self
            .collection
            .count_documents(to_bson_document(filter)?, None)?)
    }

    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String> {
        let name = options.name.clone().unwrap_or_else(|| index_name_for(keys));
        let index_options = DriverIndexOptions::builder()
            .name(Some(name))
            .unique(Some(options.unique))
            .build();
        let model = IndexModel::builder()
            .keys(to_bson_document(keys)?)
            .options(Some(index_options))
            .build();

        let created = self.collection.create_index(model, None)?;
        debug!(collection = %self.collection.name(), index = %created.index_name, "Ensured index");
        Ok(created.index_name)
    }
}

/// Build a server command with its verb as the first key.
fn command_document(command: &Document) -> StoreResult<BsonDocument> {
    let name = command_name(command)
        .ok_or_else(|| StoreError::UnsupportedCommand("<empty>".to_string()))?;

    let mut document = BsonDocument::new();
    if let Some(value) = command.get(name) {
        document.insert(name, to_bson(value)?);
    }
    for (key, value) in command.iter().filter(|(key, _)| key.as_str() != name) {
        document.insert(key.as_str(), to_bson(value)?);
    }
    Ok(document)
}

pub(crate) fn to_bson_document(document: &Document) -> StoreResult<BsonDocument> {
    let mut converted = BsonDocument::new();
    for (key, value) in document {
        converted.insert(key.as_str(), to_bson(value)?);
    }
    Ok(converted)
}

pub(crate) fn to_bson(value: &Value) -> StoreResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_bson(n)?,
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect::<StoreResult<_>>()?),
        Value::Object(map) => match map.get("$date") {
            Some(date) if map.len() == 1 => Bson::DateTime(date_to_bson(date)?),
            _ => Bson::Document(to_bson_document(map)?),
        },
    })
}

fn number_to_bson(n: &Number) -> StoreResult<Bson> {
    if let Some(i) = n.as_i64() {
        return Ok(match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        });
    }
    n.as_f64()
        .map(Bson::Double)
        .ok_or_else(|| StoreError::Conversion(format!("number {} is out of range", n)))
}

fn date_to_bson(date: &Value) -> StoreResult<bson::DateTime> {
    match date {
        Value::Number(ms) => ms
            .as_i64()
            .map(bson::DateTime::from_millis)
            .ok_or_else(|| StoreError::Conversion(format!("invalid $date {}", date))),
        Value::String(s) => bson::DateTime::parse_rfc3339_str(s)
            .map_err(|e| StoreError::Conversion(format!("invalid $date {}: {}", s, e))),
        Value::Object(inner) => inner
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .map(bson::DateTime::from_millis)
            .ok_or_else(|| StoreError::Conversion(format!("invalid $date {}", date))),
        other => Err(StoreError::Conversion(format!("invalid $date {}", other))),
    }
}

pub(crate) fn from_bson_document(document: BsonDocument) -> Document {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
