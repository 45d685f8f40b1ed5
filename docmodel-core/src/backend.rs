//! Storage backend abstraction for the document store.
//!
//! These traits are the only surface the model layer needs from a remote store:
//! provisioning ("create if absent") for databases and collections, point
//! operations by id and partition key, and a parameterized query endpoint.
//!
//! # Traits
//!
//! - [`StoreBackend`]: the store client, provisions databases
//! - [`DatabaseBackend`]: a database, provisions collections
//! - [`CollectionBackend`]: a collection, executes document operations and queries
//! - [`StoreBackendBuilder`]: factory for creating a client from a [`ConnectionConfig`]
//!
//! Implementations must be thread-safe and support concurrent calls; the model
//! layer issues batch operations in parallel and never retries on its own.

use async_trait::async_trait;
use serde_json::Value;
use std::{fmt::Debug, sync::Arc};

use crate::{config::ConnectionConfig, error::ModelResult, query::QuerySpec};

/// Partition key path used when a collection is provisioned without one.
pub const DEFAULT_PARTITION_KEY_PATH: &str = "/id";

/// A resolved database.
pub type DatabaseHandle = Arc<dyn DatabaseBackend>;

/// A resolved collection, the I/O target of a [`Model`](crate::model::Model).
pub type CollectionHandle = Arc<dyn CollectionBackend>;

/// Provisioning parameters for a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Slash-separated path of the partition key inside each document, e.g. `/tenantId`.
    pub partition_key_path: String,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, partition_key_path: Option<&str>) -> Self {
        Self {
            name: name.into(),
            partition_key_path: partition_key_path
                .unwrap_or(DEFAULT_PARTITION_KEY_PATH)
                .to_string(),
        }
    }
}

/// The store client.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the named database, creating it if it does not exist.
    async fn create_database_if_not_exists(&self, name: &str) -> ModelResult<DatabaseHandle>;

    /// Releases client resources. Handles obtained earlier may stop working.
    async fn shutdown(&self) -> ModelResult<()> {
        Ok(())
    }
}

/// A database inside the store.
#[async_trait]
pub trait DatabaseBackend: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Returns the collection described by `spec`, creating it if it does not exist.
    async fn create_collection_if_not_exists(
        &self,
        spec: CollectionSpec,
    ) -> ModelResult<CollectionHandle>;
}

/// A collection of JSON documents.
///
/// Documents are JSON objects carrying a string `id`. Point operations address a
/// document by `(id, partition key value)`.
#[async_trait]
pub trait CollectionBackend: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// The partition key path the collection was provisioned with.
    fn partition_key_path(&self) -> &str;

    /// Creates a document, failing if one with the same id already exists.
    /// A missing `id` is generated by the store.
    async fn create(&self, document: Value) -> ModelResult<Value>;

    /// Reads a document, returning `None` when it does not exist.
    async fn read(&self, id: &str, partition_key: &str) -> ModelResult<Option<Value>>;

    /// Replaces an existing document, failing if it does not exist.
    async fn replace(&self, id: &str, partition_key: &str, document: Value) -> ModelResult<Value>;

    /// Creates or replaces a document, matching on id and partition key.
    async fn upsert(&self, document: Value) -> ModelResult<Value>;

    /// Deletes a document, failing if it does not exist.
    async fn delete(&self, id: &str, partition_key: &str) -> ModelResult<()>;

    /// Executes a parameterized query and returns every result row.
    async fn query(&self, spec: QuerySpec) -> ModelResult<Vec<Value>>;
}

/// Factory trait for creating store clients from connection settings.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self, config: &ConnectionConfig) -> ModelResult<Self::Backend>;
}

/// Reads the partition key value of `document` at a slash-separated `path`.
///
/// String values are returned as-is and other scalars in their JSON form.
/// Returns `None` when the path does not resolve to a scalar.
pub fn partition_key_value(document: &Value, path: &str) -> Option<String> {
    let mut current = document;

    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current = current.get(segment)?;
    }

    match current {
        Value::String(value) => Some(value.clone()),
        Value::Number(_) | Value::Bool(_) => Some(current.to_string()),
        _ => None,
    }
}

/// Partition key of `document` at `path`, falling back to the document id.
///
/// Stores and models must agree on this key for a document that does not carry
/// a value at the partition key path.
pub fn partition_key_or_default(document: &Value, path: &str, id: &str) -> String {
    partition_key_value(document, path).unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_partition_keys() {
        let doc = json!({ "id": "1", "tenant": { "id": "acme" }, "shard": 4 });

        assert_eq!(partition_key_value(&doc, "/id").as_deref(), Some("1"));
        assert_eq!(partition_key_value(&doc, "/tenant/id").as_deref(), Some("acme"));
        assert_eq!(partition_key_value(&doc, "/shard").as_deref(), Some("4"));
        assert_eq!(partition_key_value(&doc, "/tenant"), None);
        assert_eq!(partition_key_value(&doc, "/missing"), None);
    }

    #[test]
    fn missing_partition_keys_fall_back_to_the_id() {
        let doc = json!({ "id": "7", "tenant": "acme" });

        assert_eq!(partition_key_or_default(&doc, "/tenant", "7"), "acme");
        assert_eq!(partition_key_or_default(&doc, "/region", "7"), "7");
        assert_eq!(partition_key_or_default(&json!({}), "/id", "7"), "7");
    }

    #[test]
    fn collection_spec_defaults_partition_key() {
        assert_eq!(CollectionSpec::new("users", None).partition_key_path, "/id");
        assert_eq!(CollectionSpec::new("users", Some("/tenantId")).partition_key_path, "/tenantId");
    }
}
