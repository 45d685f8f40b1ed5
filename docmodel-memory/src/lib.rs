//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the store backend
//! traits. It uses async-aware read-write locks for concurrent access and is meant
//! for development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Partitioned point operations** - Documents are addressed by id and partition key
//! - **Query dialect** - Executes the parameterized `SELECT ... FROM c WHERE ...` queries the model layer emits
//! - **Provisioning counters** - Observe how many database and collection creations were requested
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{connection::ConnectionCache, memory::InMemoryStore, prelude::*};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ConnectionCache::new(InMemoryStore::new());
//!     let schema = ObjectSchema::new().required("name", FieldKind::String);
//!     let users = cache.model("app", "users", None, schema).await?;
//!
//!     users.insert(json!({ "name": "Alice" })).await.into_result()?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

mod evaluator;
mod parser;
pub mod store;

pub use store::{InMemoryCollection, InMemoryDatabase, InMemoryStore, InMemoryStoreBuilder};
