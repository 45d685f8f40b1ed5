//! Lazily resolved, memoized database and collection handles.
//!
//! [`ConnectionCache`] resolves each database and each collection through the
//! store's "create if absent" calls exactly once. Concurrent first-time callers
//! for the same name are coalesced onto one shared in-flight creation, so the
//! store sees a single provisioning request and every caller observes the same
//! handle (or the same error).
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{connection::ConnectionCache, memory::InMemoryStore};
//!
//! let cache = ConnectionCache::new(InMemoryStore::new());
//! let users = cache.resolve_collection("app", "users", Some("/tenantId")).await?;
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use mea::mutex::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, warn};

use crate::{
    backend::{
        CollectionHandle, CollectionSpec, DatabaseHandle, StoreBackend, StoreBackendBuilder,
        DEFAULT_PARTITION_KEY_PATH,
    },
    config::ConnectionConfig,
    error::{ModelError, ModelResult},
    model::Model,
    schema::Schema,
};

type PendingDatabase = Shared<BoxFuture<'static, ModelResult<DatabaseHandle>>>;
type PendingCollection = Shared<BoxFuture<'static, ModelResult<CollectionHandle>>>;

/// Characters that would break a resource path.
const RESERVED_NAME_CHARS: [char; 4] = ['/', '\\', '?', '#'];

#[derive(Default)]
struct CacheState {
    /// Bumped by `close()` so completions of forgotten creations are ignored.
    generation: u64,
    databases: HashMap<String, DatabaseHandle>,
    collections: HashMap<String, HashMap<String, CollectionHandle>>,
    pending_databases: HashMap<String, PendingDatabase>,
    pending_collections: HashMap<String, PendingCollection>,
}

/// Counts of cached and in-flight entries, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheSnapshot {
    pub databases: usize,
    pub collections: usize,
    pub pending_databases: usize,
    pub pending_collections: usize,
}

/// Memoizes database and collection handles with single-flight creation.
#[derive(Clone)]
pub struct ConnectionCache {
    backend: Arc<dyn StoreBackend>,
    default_partition_key: String,
    state: Arc<Mutex<CacheState>>,
}

impl fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("backend", &self.backend)
            .field("default_partition_key", &self.default_partition_key)
            .finish_non_exhaustive()
    }
}

impl ConnectionCache {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            default_partition_key: DEFAULT_PARTITION_KEY_PATH.to_string(),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Validates `config`, builds a store client with `builder` and wraps it in a cache.
    pub async fn connect<B>(config: &ConnectionConfig, builder: B) -> ModelResult<Self>
    where
        B: StoreBackendBuilder,
        B::Backend: 'static,
    {
        config.validate()?;
        let backend = builder.build(config).await?;

        debug!(endpoint = %config.endpoint, "connected store client");

        Ok(Self::new(backend).with_default_partition_key(config.default_partition_key.clone()))
    }

    /// Partition key path used by [`resolve_collection`](Self::resolve_collection)
    /// when none is given.
    pub fn with_default_partition_key(mut self, path: impl Into<String>) -> Self {
        self.default_partition_key = path.into();
        self
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Returns the handle of the named database, creating the database on first use.
    pub async fn resolve_database(&self, name: &str) -> ModelResult<DatabaseHandle> {
        validate_name(name, "Database")?;

        let pending = {
            let mut state = self.state.lock().await;

            if let Some(database) = state.databases.get(name) {
                return Ok(database.clone());
            }

            match state.pending_databases.get(name) {
                Some(pending) => {
                    debug!(database = name, "joining in-flight database creation");
                    pending.clone()
                }
                None => {
                    let pending = self.create_database(name.to_string(), state.generation);
                    state.pending_databases.insert(name.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Returns the handle of a collection, creating the database and the collection
    /// on first use. `partition_key_path` defaults to the cache's default (`/id`).
    ///
    /// A collection that is already cached is returned as-is, whatever partition
    /// key path is passed.
    pub async fn resolve_collection(
        &self,
        database: &str,
        collection: &str,
        partition_key_path: Option<&str>,
    ) -> ModelResult<CollectionHandle> {
        validate_name(database, "Database")?;
        validate_name(collection, "Collection")?;

        let database_handle = self.resolve_database(database).await?;
        let key = format!("{database}:{collection}");

        let pending = {
            let mut state = self.state.lock().await;

            if let Some(handle) = state
                .collections
                .get(database)
                .and_then(|collections| collections.get(collection))
            {
                return Ok(handle.clone());
            }

            match state.pending_collections.get(&key) {
                Some(pending) => {
                    debug!(database, collection, "joining in-flight collection creation");
                    pending.clone()
                }
                None => {
                    let spec = CollectionSpec::new(
                        collection,
                        Some(partition_key_path.unwrap_or(&self.default_partition_key)),
                    );
                    let pending = self.create_collection(
                        database_handle,
                        spec,
                        key.clone(),
                        state.generation,
                    );
                    state.pending_collections.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Resolves a collection and binds a [`Model`] to it.
    pub async fn model<S: Schema>(
        &self,
        database: &str,
        collection: &str,
        partition_key_path: Option<&str>,
        schema: S,
    ) -> ModelResult<Model<S>> {
        let handle = self
            .resolve_collection(database, collection, partition_key_path)
            .await?;

        Ok(Model::new(schema, handle))
    }

    /// Forgets every cached and in-flight entry.
    ///
    /// Outstanding creations are not cancelled, and handles handed out earlier
    /// remain usable.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;

        state.generation += 1;
        state.databases.clear();
        state.collections.clear();
        state.pending_databases.clear();
        state.pending_collections.clear();

        debug!(generation = state.generation, "connection cache cleared");
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.lock().await;

        CacheSnapshot {
            databases: state.databases.len(),
            collections: state.collections.values().map(HashMap::len).sum(),
            pending_databases: state.pending_databases.len(),
            pending_collections: state.pending_collections.len(),
        }
    }

    fn create_database(&self, name: String, generation: u64) -> PendingDatabase {
        let backend = self.backend.clone();
        let state = self.state.clone();

        async move {
            debug!(database = %name, "creating database if not exists");
            let result = backend.create_database_if_not_exists(&name).await;

            let mut state = state.lock().await;
            if state.generation == generation {
                if let Ok(database) = &result {
                    state.databases.insert(name.clone(), database.clone());
                }
                state.pending_databases.remove(&name);
            }

            if let Err(err) = &result {
                warn!(database = %name, error = %err, "database creation failed");
            }

            result
        }
        .boxed()
        .shared()
    }

    fn create_collection(
        &self,
        database: DatabaseHandle,
        spec: CollectionSpec,
        key: String,
        generation: u64,
    ) -> PendingCollection {
        let state = self.state.clone();

        async move {
            let database_name = database.name().to_string();
            let collection_name = spec.name.clone();

            debug!(
                database = %database_name,
                collection = %collection_name,
                partition_key = %spec.partition_key_path,
                "creating collection if not exists"
            );
            let result = database.create_collection_if_not_exists(spec).await;

            let mut state = state.lock().await;
            if state.generation == generation {
                if let Ok(handle) = &result {
                    state
                        .collections
                        .entry(database_name.clone())
                        .or_default()
                        .insert(collection_name.clone(), handle.clone());
                }
                state.pending_collections.remove(&key);
            }

            if let Err(err) = &result {
                warn!(
                    database = %database_name,
                    collection = %collection_name,
                    error = %err,
                    "collection creation failed"
                );
            }

            result
        }
        .boxed()
        .shared()
    }
}

fn validate_name(name: &str, kind: &str) -> ModelResult<()> {
    if name.trim().is_empty() {
        return Err(ModelError::InvalidName(format!("{kind} name must be a non-empty string")));
    }
    if name.contains(RESERVED_NAME_CHARS) {
        return Err(ModelError::InvalidName(format!(
            "{kind} name contains invalid characters: {name}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{CollectionBackend, DatabaseBackend},
        query::QuerySpec,
    };
    use async_trait::async_trait;
    use futures::future::join_all;
    use serde_json::Value;
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    #[derive(Debug, Default)]
    struct Calls {
        databases: AtomicUsize,
        collections: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[derive(Debug, Default, Clone)]
    struct SlowBackend {
        calls: Arc<Calls>,
    }

    #[derive(Debug)]
    struct SlowDatabase {
        name: String,
        calls: Arc<Calls>,
    }

    #[derive(Debug)]
    struct StubCollection {
        spec: CollectionSpec,
    }

    async fn provision(calls: &Calls) -> ModelResult<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;

        if calls.fail_next.swap(false, Ordering::SeqCst) {
            Err(ModelError::Backend("throttled".into()))
        } else {
            Ok(())
        }
    }

    #[async_trait]
    impl StoreBackend for SlowBackend {
        async fn create_database_if_not_exists(&self, name: &str) -> ModelResult<DatabaseHandle> {
            self.calls.databases.fetch_add(1, Ordering::SeqCst);
            provision(&self.calls).await?;

            Ok(Arc::new(SlowDatabase { name: name.to_string(), calls: self.calls.clone() }))
        }
    }

    #[async_trait]
    impl DatabaseBackend for SlowDatabase {
        fn name(&self) -> &str {
            &self.name
        }

        async fn create_collection_if_not_exists(
            &self,
            spec: CollectionSpec,
        ) -> ModelResult<CollectionHandle> {
            self.calls.collections.fetch_add(1, Ordering::SeqCst);
            provision(&self.calls).await?;

            Ok(Arc::new(StubCollection { spec }))
        }
    }

    fn unsupported<T>() -> ModelResult<T> {
        Err(ModelError::Backend("unsupported".into()))
    }

    #[async_trait]
    impl CollectionBackend for StubCollection {
        fn name(&self) -> &str {
            &self.spec.name
        }

        fn partition_key_path(&self) -> &str {
            &self.spec.partition_key_path
        }

        async fn create(&self, _document: Value) -> ModelResult<Value> {
            unsupported()
        }

        async fn read(&self, _id: &str, _partition_key: &str) -> ModelResult<Option<Value>> {
            unsupported()
        }

        async fn replace(&self, _id: &str, _pk: &str, _document: Value) -> ModelResult<Value> {
            unsupported()
        }

        async fn upsert(&self, _document: Value) -> ModelResult<Value> {
            unsupported()
        }

        async fn delete(&self, _id: &str, _partition_key: &str) -> ModelResult<()> {
            unsupported()
        }

        async fn query(&self, _spec: QuerySpec) -> ModelResult<Vec<Value>> {
            unsupported()
        }
    }

    #[tokio::test]
    async fn concurrent_database_resolution_creates_once() {
        let backend = SlowBackend::default();
        let cache = ConnectionCache::new(backend.clone());

        let handles = join_all((0..8).map(|_| cache.resolve_database("app"))).await;

        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 1);
        let first = handles[0].as_ref().unwrap();
        for handle in &handles {
            assert!(Arc::ptr_eq(first, handle.as_ref().unwrap()));
        }

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.databases, 1);
        assert_eq!(snapshot.pending_databases, 0);
    }

    #[tokio::test]
    async fn cached_database_skips_the_store() {
        let backend = SlowBackend::default();
        let cache = ConnectionCache::new(backend.clone());

        let first = cache.resolve_database("app").await.unwrap();
        let second = cache.resolve_database("app").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_collection_resolution_creates_once() {
        let backend = SlowBackend::default();
        let cache = ConnectionCache::new(backend.clone());

        let handles = join_all((0..5).map(|_| cache.resolve_collection("app", "users", None))).await;

        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.collections.load(Ordering::SeqCst), 1);
        let first = handles[0].as_ref().unwrap();
        assert_eq!(first.partition_key_path(), "/id");
        assert!(handles.iter().all(|handle| Arc::ptr_eq(first, handle.as_ref().unwrap())));
    }

    #[tokio::test]
    async fn failed_creation_reaches_every_waiter_and_can_be_retried() {
        let backend = SlowBackend::default();
        backend.calls.fail_next.store(true, Ordering::SeqCst);
        let cache = ConnectionCache::new(backend.clone());

        let results = join_all((0..4).map(|_| cache.resolve_database("app"))).await;

        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 1);
        for result in &results {
            assert_eq!(result.as_ref().unwrap_err(), &ModelError::Backend("throttled".into()));
        }
        assert_eq!(cache.snapshot().await, CacheSnapshot::default());

        assert!(cache.resolve_database("app").await.is_ok());
        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_malformed_names() {
        let cache = ConnectionCache::new(SlowBackend::default());

        for name in ["", "   ", "a/b", "a\\b", "a?b", "a#b"] {
            assert!(matches!(
                cache.resolve_database(name).await,
                Err(ModelError::InvalidName(_))
            ));
        }
        assert!(matches!(
            cache.resolve_collection("app", "", None).await,
            Err(ModelError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn close_forgets_entries_but_keeps_handles_valid() {
        let backend = SlowBackend::default();
        let cache = ConnectionCache::new(backend.clone());

        let before = cache
            .resolve_collection("app", "users", Some("/tenantId"))
            .await
            .unwrap();
        cache.close().await;

        assert_eq!(cache.snapshot().await, CacheSnapshot::default());
        assert_eq!(before.partition_key_path(), "/tenantId");

        cache.resolve_collection("app", "users", None).await.unwrap();
        assert_eq!(backend.calls.databases.load(Ordering::SeqCst), 2);
        assert_eq!(backend.calls.collections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn completion_after_close_does_not_repopulate() {
        let backend = SlowBackend::default();
        let cache = ConnectionCache::new(backend.clone());

        let (resolved, _) = tokio::join!(cache.resolve_database("app"), async {
            tokio::task::yield_now().await;
            cache.close().await;
        });

        assert!(resolved.is_ok());
        assert_eq!(cache.snapshot().await.databases, 0);
    }

    #[tokio::test]
    async fn connect_validates_config() {
        struct Builder;

        #[async_trait]
        impl StoreBackendBuilder for Builder {
            type Backend = SlowBackend;

            async fn build(self, _config: &ConnectionConfig) -> ModelResult<SlowBackend> {
                Ok(SlowBackend::default())
            }
        }

        let mut config = ConnectionConfig::new("https://localhost:8081", "secret")
            .unwrap()
            .with_default_partition_key("/tenantId");
        let cache = ConnectionCache::connect(&config, Builder).await.unwrap();
        let handle = cache.resolve_collection("app", "users", None).await.unwrap();
        assert_eq!(handle.partition_key_path(), "/tenantId");

        config.key.clear();
        assert!(matches!(
            ConnectionCache::connect(&config, Builder).await,
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
