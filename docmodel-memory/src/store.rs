//! In-memory storage implementation for document stores.
//!
//! Databases and collections live in maps behind async-aware read-write locks.
//! Each collection keeps its documents in insertion order, addressed by
//! `(partition key value, id)`, and answers queries by parsing the query text and
//! scanning every document.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::debug;
use uuid::Uuid;

use docmodel_core::{
    backend::{
        CollectionBackend, CollectionHandle, CollectionSpec, DatabaseBackend, DatabaseHandle,
        StoreBackend, StoreBackendBuilder, partition_key_or_default,
    },
    config::ConnectionConfig,
    error::{ModelError, ModelResult},
    query::QuerySpec,
};

use crate::evaluator;

type DocumentKey = (String, String);

/// The documents of one collection, in insertion order.
#[derive(Debug, Default)]
struct Documents {
    next_seq: u64,
    index: HashMap<DocumentKey, u64>,
    rows: BTreeMap<u64, Value>,
}

impl Documents {
    fn get(&self, key: &DocumentKey) -> Option<&Value> {
        self.index.get(key).and_then(|seq| self.rows.get(seq))
    }

    /// Stores `document` under `key`, keeping the position of a document it replaces.
    fn put(&mut self, key: DocumentKey, document: Value) {
        let seq = match self.index.get(&key) {
            Some(seq) => *seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.index.insert(key, seq);
                seq
            }
        };

        self.rows.insert(seq, document);
    }

    fn remove(&mut self, key: &DocumentKey) -> Option<Value> {
        let seq = self.index.remove(key)?;
        self.rows.remove(&seq)
    }
}

#[derive(Debug)]
struct CollectionState {
    partition_key_path: String,
    documents: Arc<RwLock<Documents>>,
}

type DatabaseMap = HashMap<String, HashMap<String, CollectionState>>;

/// Thread-safe in-memory document store.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). This is meant for
/// development and tests, not for large datasets.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{CollectionSpec, StoreBackend};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// let db = store.create_database_if_not_exists("app").await?;
/// let users = db.create_collection_if_not_exists(CollectionSpec::new("users", None)).await?;
///
/// users.create(json!({ "id": "1", "name": "Ada" })).await?;
/// assert!(users.read("1", "1").await?.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    databases: Arc<RwLock<DatabaseMap>>,
    database_creations: Arc<AtomicUsize>,
    collection_creations: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore` from connection settings.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Number of `create_database_if_not_exists` calls received.
    pub fn database_creations(&self) -> usize {
        self.database_creations.load(Ordering::SeqCst)
    }

    /// Number of `create_collection_if_not_exists` calls received.
    pub fn collection_creations(&self) -> usize {
        self.collection_creations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn create_database_if_not_exists(&self, name: &str) -> ModelResult<DatabaseHandle> {
        self.database_creations.fetch_add(1, Ordering::SeqCst);
        self.databases
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        debug!(database = name, "in-memory database ready");

        Ok(Arc::new(InMemoryDatabase { name: name.to_string(), store: self.clone() }))
    }
}

/// A database of an [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    name: String,
    store: InMemoryStore,
}

#[async_trait]
impl DatabaseBackend for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_collection_if_not_exists(&self, spec: CollectionSpec) -> ModelResult<CollectionHandle> {
        self.store.collection_creations.fetch_add(1, Ordering::SeqCst);

        let mut databases = self.store.databases.write().await;
        let collections = databases
            .get_mut(&self.name)
            .ok_or_else(|| ModelError::Backend(format!("Database {} does not exist", self.name)))?;

        // An existing collection keeps the partition key it was created with.
        let state = collections.entry(spec.name.clone()).or_insert_with(|| CollectionState {
            partition_key_path: spec.partition_key_path.clone(),
            documents: Arc::new(RwLock::new(Documents::default())),
        });

        debug!(
            database = %self.name,
            collection = %spec.name,
            partition_key = %state.partition_key_path,
            "in-memory collection ready"
        );

        Ok(Arc::new(InMemoryCollection {
            name: spec.name,
            partition_key_path: state.partition_key_path.clone(),
            documents: state.documents.clone(),
        }))
    }
}

/// A collection of an [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    name: String,
    partition_key_path: String,
    documents: Arc<RwLock<Documents>>,
}

impl InMemoryCollection {
    /// Checks that `document` is an object, assigns an id when missing and returns its key.
    fn prepare(&self, document: &mut Value) -> ModelResult<DocumentKey> {
        let Value::Object(fields) = document else {
            return Err(ModelError::Backend("Documents must be JSON objects".to_string()));
        };

        let id = match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            None | Some(Value::Null) => {
                let id = Uuid::new_v4().to_string();
                fields.insert("id".to_string(), Value::String(id.clone()));
                id
            }
            Some(other) => {
                return Err(ModelError::Backend(format!("Document id must be a string, received {other}")));
            }
        };

        Ok((self.partition_key(document, &id), id))
    }

    fn partition_key(&self, document: &Value, id: &str) -> String {
        partition_key_or_default(document, &self.partition_key_path, id)
    }

    fn not_found(&self, id: &str) -> ModelError {
        ModelError::DocumentNotFound(id.to_string(), self.name.clone())
    }
}

#[async_trait]
impl CollectionBackend for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition_key_path(&self) -> &str {
        &self.partition_key_path
    }

    async fn create(&self, mut document: Value) -> ModelResult<Value> {
        let key = self.prepare(&mut document)?;
        let mut documents = self.documents.write().await;

        if documents.get(&key).is_some() {
            return Err(ModelError::DocumentAlreadyExists(key.1, self.name.clone()));
        }

        documents.put(key, document.clone());
        Ok(document)
    }

    async fn read(&self, id: &str, partition_key: &str) -> ModelResult<Option<Value>> {
        let key = (partition_key.to_string(), id.to_string());

        Ok(self.documents.read().await.get(&key).cloned())
    }

    async fn replace(&self, id: &str, partition_key: &str, mut document: Value) -> ModelResult<Value> {
        let key = (partition_key.to_string(), id.to_string());
        if self.prepare(&mut document)? != key {
            return Err(ModelError::Backend(format!(
                "Replacement for document {id} must keep its id and partition key"
            )));
        }

        let mut documents = self.documents.write().await;
        if documents.get(&key).is_none() {
            return Err(self.not_found(id));
        }

        documents.put(key, document.clone());
        Ok(document)
    }

    async fn upsert(&self, mut document: Value) -> ModelResult<Value> {
        let key = self.prepare(&mut document)?;

        self.documents.write().await.put(key, document.clone());
        Ok(document)
    }

    async fn delete(&self, id: &str, partition_key: &str) -> ModelResult<()> {
        let key = (partition_key.to_string(), id.to_string());

        match self.documents.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => Err(self.not_found(id)),
        }
    }

    async fn query(&self, spec: QuerySpec) -> ModelResult<Vec<Value>> {
        let documents = self.documents.read().await;
        let rows = evaluator::execute(&spec, documents.rows.values())?;

        debug!(collection = %self.name, query = %spec.query, rows = rows.len(), "in-memory query executed");

        Ok(rows)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// The connection settings are accepted for parity with remote backends and
/// otherwise ignored.
///
/// # Example
///
/// ```ignore
/// use docmodel::{config::ConnectionConfig, connection::ConnectionCache, memory::InMemoryStore};
///
/// let config = ConnectionConfig::new("memory://local", "unused")?;
/// let cache = ConnectionCache::connect(&config, InMemoryStore::builder()).await?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self, _config: &ConnectionConfig) -> ModelResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collection(store: &InMemoryStore, partition_key_path: Option<&str>) -> CollectionHandle {
        store
            .create_database_if_not_exists("app")
            .await
            .unwrap()
            .create_collection_if_not_exists(CollectionSpec::new("users", partition_key_path))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn point_operations() {
        let store = InMemoryStore::new();
        let users = collection(&store, None).await;

        users.create(json!({ "id": "1", "name": "Ada" })).await.unwrap();
        assert_eq!(
            users.create(json!({ "id": "1" })).await,
            Err(ModelError::DocumentAlreadyExists("1".into(), "users".into()))
        );

        assert_eq!(users.read("1", "1").await.unwrap(), Some(json!({ "id": "1", "name": "Ada" })));
        assert_eq!(users.read("1", "other").await.unwrap(), None);

        users.replace("1", "1", json!({ "id": "1", "name": "Grace" })).await.unwrap();
        assert_eq!(users.read("1", "1").await.unwrap().unwrap()["name"], "Grace");
        assert!(users.replace("2", "2", json!({ "id": "2" })).await.is_err());

        users.delete("1", "1").await.unwrap();
        assert_eq!(
            users.delete("1", "1").await,
            Err(ModelError::DocumentNotFound("1".into(), "users".into()))
        );
    }

    #[tokio::test]
    async fn generates_missing_ids() {
        let store = InMemoryStore::new();
        let users = collection(&store, None).await;

        let created = users.create(json!({ "name": "Ada" })).await.unwrap();
        let id = created["id"].as_str().unwrap();

        assert!(Uuid::parse_str(id).is_ok());
        assert!(users.read(id, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_documents_by_partition() {
        let store = InMemoryStore::new();
        let users = collection(&store, Some("/tenant")).await;

        users.create(json!({ "id": "1", "tenant": "a" })).await.unwrap();
        users.create(json!({ "id": "1", "tenant": "b" })).await.unwrap();
        users.upsert(json!({ "id": "1", "tenant": "a", "seen": true })).await.unwrap();

        assert_eq!(users.read("1", "a").await.unwrap().unwrap()["seen"], true);
        assert!(users.read("1", "b").await.unwrap().unwrap().get("seen").is_none());
    }

    #[tokio::test]
    async fn documents_without_a_partition_value_are_keyed_by_id() {
        let store = InMemoryStore::new();
        let users = collection(&store, Some("/tenant")).await;

        users.create(json!({ "id": "1" })).await.unwrap();

        assert!(users.read("1", "1").await.unwrap().is_some());
        assert!(users.read("1", "").await.unwrap().is_none());
        users.delete("1", "1").await.unwrap();
    }

    #[tokio::test]
    async fn queries_in_insertion_order() {
        let store = InMemoryStore::new();
        let users = collection(&store, None).await;

        for id in ["b", "a", "c"] {
            users.create(json!({ "id": id })).await.unwrap();
        }
        users.upsert(json!({ "id": "b", "touched": true })).await.unwrap();

        let rows = users.query(QuerySpec::new("SELECT VALUE c.id FROM c", vec![])).await.unwrap();
        assert_eq!(rows, vec![json!("b"), json!("a"), json!("c")]);
    }

    #[tokio::test]
    async fn existing_collections_keep_their_partition_key() {
        let store = InMemoryStore::new();
        collection(&store, Some("/tenant")).await;
        let again = collection(&store, None).await;

        assert_eq!(again.partition_key_path(), "/tenant");
        assert_eq!(store.database_creations(), 2);
        assert_eq!(store.collection_creations(), 2);
    }
}
