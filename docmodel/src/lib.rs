//! Main docmodel crate: schema-validated models over SQL-queryable document stores.
//!
//! This crate is the primary entry point for users of the docmodel framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the bundled storage backend.
//!
//! # Features
//!
//! - **Injection-safe queries** - Predicates compile to parameterized query text; values never touch the query string
//! - **Schema-validated writes** - Every document is validated before it reaches the store
//! - **Uniform results** - Every model operation returns the same [`Outcome`](outcome::Outcome) envelope
//! - **Single-flight provisioning** - Databases and collections are created once, however many callers race for them
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Shape)]
//! pub struct User {
//!     pub id: String,
//!     pub name: String,
//!     pub status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ConnectionCache::new(InMemoryStore::new());
//!     let users = cache.model("app", "users", None, TypedSchema::<User>::new()).await?;
//!
//!     users
//!         .insert(json!({ "id": "1", "name": "Alice", "status": "active" }))
//!         .await
//!         .into_result()?;
//!
//!     let status = users.fields().get("status").unwrap();
//!     let active = users
//!         .find(FindOptions::new().filter(qb().eq(status, "active")).order_by([asc("name")]))
//!         .await
//!         .into_result()?;
//!
//!     println!("Active users: {:?}", active.resources_as::<User>()?);
//!
//!     cache.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Connection settings can come from a TOML file or the environment:
//!
//! ```ignore
//! use docmodel::{config::ConnectionConfig, connection::ConnectionCache, memory::InMemoryStore};
//!
//! let config = ConnectionConfig::from_env()?;
//! let cache = ConnectionCache::connect(&config, InMemoryStore::builder()).await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing

pub mod prelude;

pub use docmodel_core::{backend, config, connection, error, fields, model, outcome, query, schema};
pub use docmodel_macros::Shape;

// Re-export JSON types for convenience
pub use serde_json;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryCollection, InMemoryDatabase, InMemoryStore, InMemoryStoreBuilder};
}
