//! Document and blob storage behind the workspace.
//!
//! [`SledGateway`] keeps one sled tree per collection, keyed by document id, with JSON
//! values. [`MemoryGateway`] is the DashMap-backed equivalent for tests and ephemeral runs.
//! Documents are always JSON objects; the store injects the `id` field on write.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sled::Db;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, warn};

/// Collection holding one serialized workspace per session.
pub const WORKSPACES: &str = "workspaces";

const DEFAULT_DATA_PATH: &str = "./data/aura_store";
const BLOB_TREE: &str = "__blobs";
const BLOB_SCHEME: &str = "blob://";

/// Comparison operator for [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "array-contains")]
    ArrayContains,
}

/// `{field, op, value}` triple. `field` may be a dotted path into nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Missing fields never match (not even `!=`).
    pub fn matches(&self, doc: &Value) -> bool {
        let Some(actual) = lookup(doc, &self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Le => matches!(compare(actual, &self.value), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Ge => matches!(compare(actual, &self.value), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::ArrayContains => actual
                .as_array()
                .map(|items| items.iter().any(|v| values_equal(v, &self.value)))
                .unwrap_or(false),
        }
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |v, key| v.get(key))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_document(data: Value, id: &str) -> StoreResult<Map<String, Value>> {
    match data {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(id.to_string()));
            Ok(map)
        }
        other => Err(StoreError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Document store contract consumed by the workspace session and context fetch.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Documents in the collection that match every filter.
    async fn list(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Value>>;

    /// Stores a new document under a generated id and returns the id.
    async fn create(&self, collection: &str, data: Value) -> StoreResult<String>;

    /// Writes a document under a caller-chosen id, replacing any existing one.
    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()>;

    /// Shallow-merges `partial` into an existing document.
    async fn update(&self, collection: &str, id: &str, partial: Value) -> StoreResult<()>;

    /// Removing a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;
}

/// Typed read on top of [`PersistenceGateway::get`].
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn PersistenceGateway,
    collection: &str,
    id: &str,
) -> StoreResult<Option<T>> {
    match store.get(collection, id).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

/// Typed list on top of [`PersistenceGateway::list`]. Documents that don't fit `T` are skipped.
pub async fn list_as<T: DeserializeOwned>(
    store: &dyn PersistenceGateway,
    collection: &str,
    filters: &[Filter],
) -> StoreResult<Vec<T>> {
    let docs = store.list(collection, filters).await?;
    Ok(docs
        .into_iter()
        .filter_map(|doc| match serde_json::from_value(doc) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(collection = %collection, error = %e, "skipping document with unexpected shape");
                None
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Sled
// ---------------------------------------------------------------------------

/// Persistent gateway: one sled tree per collection.
#[derive(Clone)]
pub struct SledGateway {
    db: Db,
}

impl SledGateway {
    /// Opens or creates the store at `./data/aura_store`.
    pub fn new() -> StoreResult<Self> {
        Self::open_path(DEFAULT_DATA_PATH)
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Shares the underlying database, e.g. with a [`SledBlobStore`].
    pub fn db(&self) -> &Db {
        &self.db
    }

    fn tree(&self, collection: &str) -> StoreResult<sled::Tree> {
        if collection.is_empty() || collection == BLOB_TREE {
            return Err(StoreError::InvalidDocument(format!(
                "invalid collection name '{collection}'"
            )));
        }
        Ok(self.db.open_tree(collection)?)
    }

    fn read(&self, tree: &sled::Tree, id: &str) -> StoreResult<Option<Value>> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, tree: &sled::Tree, id: &str, doc: Map<String, Value>) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&Value::Object(doc))?;
        tree.insert(id.as_bytes(), bytes)?;
        Ok(())
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SledGateway {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let tree = self.tree(collection)?;
        self.read(&tree, id)
    }

    async fn list(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        let tree = self.tree(collection)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(doc) if filters.iter().all(|f| f.matches(&doc)) => out.push(doc),
                Ok(_) => {}
                Err(e) => warn!(
                    collection = %collection,
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "unreadable document skipped"
                ),
            }
        }
        Ok(out)
    }

    async fn create(&self, collection: &str, data: Value) -> StoreResult<String> {
        let tree = self.tree(collection)?;
        let id = new_id();
        let doc = as_document(data, &id)?;
        self.write(&tree, &id, doc)?;
        debug!(collection = %collection, id = %id, "document created");
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        let tree = self.tree(collection)?;
        let doc = as_document(data, id)?;
        self.write(&tree, id, doc)
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> StoreResult<()> {
        let tree = self.tree(collection)?;
        let Some(Value::Object(mut existing)) = self.read(&tree, id)? else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        for (k, v) in as_document(partial, id)? {
            existing.insert(k, v);
        }
        self.write(&tree, id, existing)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let tree = self.tree(collection)?;
        tree.remove(id.as_bytes())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Volatile gateway keyed by `(collection, id)`.
#[derive(Default)]
pub struct MemoryGateway {
    docs: DashMap<(String, String), Map<String, Value>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn key(collection: &str, id: &str) -> (String, String) {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .docs
            .get(&key(collection, id))
            .map(|doc| Value::Object(doc.clone())))
    }

    async fn list(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        let mut out: Vec<(String, Value)> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.key().1.clone(), Value::Object(entry.value().clone())))
            .filter(|(_, doc)| filters.iter().all(|f| f.matches(doc)))
            .collect();
        // key order, like sled
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn create(&self, collection: &str, data: Value) -> StoreResult<String> {
        let id = new_id();
        let doc = as_document(data, &id)?;
        self.docs.insert(key(collection, &id), doc);
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        let doc = as_document(data, id)?;
        self.docs.insert(key(collection, id), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> StoreResult<()> {
        let patch = as_document(partial, id)?;
        match self.docs.get_mut(&key(collection, id)) {
            Some(mut doc) => {
                for (k, v) in patch {
                    doc.insert(k, v);
                }
                Ok(())
            }
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.docs.remove(&key(collection, id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

/// Binary object store. Serialized workspace state only ever holds the URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key` and returns its URL.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<String>;
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
    fn get_url(&self, key: &str) -> String;
}

/// Extracts the key from a `blob://` URL.
pub fn blob_key(url: &str) -> Option<&str> {
    url.strip_prefix(BLOB_SCHEME).filter(|k| !k.is_empty())
}

/// Blobs in a dedicated tree of a sled database.
#[derive(Clone)]
pub struct SledBlobStore {
    tree: sled::Tree,
}

impl SledBlobStore {
    pub fn open(db: &Db) -> StoreResult<Self> {
        Ok(Self {
            tree: db.open_tree(BLOB_TREE)?,
        })
    }
}

#[async_trait]
impl BlobStore for SledBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<String> {
        if key.is_empty() {
            return Err(StoreError::InvalidDocument("empty blob key".to_string()));
        }
        let len = bytes.len();
        self.tree.insert(key.as_bytes(), bytes)?;
        debug!(key = %key, bytes = len, "blob stored");
        Ok(self.get_url(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn get_url(&self, key: &str) -> String {
        format!("{BLOB_SCHEME}{key}")
    }
}
