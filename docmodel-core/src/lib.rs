//! A schema-validated model layer over a remote JSON document store with a SQL-like query endpoint.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Query builder** ([`query`]) - Composable, injection-safe predicates compiled to parameterized query text
//! - **Field maps** ([`fields`]) - Addressable field descriptors derived from a document's shape
//! - **Schemas** ([`schema`]) - The validation capability a model is built on
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different document stores
//! - **Connection cache** ([`connection`]) - Memoized database and collection handles with single-flight creation
//! - **Models** ([`model`]) - Schema-validated CRUD over one collection
//! - **Result envelopes** ([`outcome`]) - The uniform result of every model operation
//! - **Configuration** ([`config`]) - Connection settings from code, TOML or the environment
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Shape)]
//! pub struct User {
//!     pub id: String,
//!     pub name: String,
//!     pub status: String,
//! }
//!
//! let cache = ConnectionCache::new(InMemoryStore::new());
//! let users = cache.model("app", "users", None, TypedSchema::<User>::new()).await?;
//!
//! users.insert(json!({ "id": "1", "name": "Ada", "status": "active" })).await;
//!
//! let status = users.fields().get("status").unwrap();
//! let active = users.count(CountOptions::new().filter(qb().eq(status, "active"))).await;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod fields;
pub mod model;
pub mod outcome;
pub mod query;
pub mod schema;
