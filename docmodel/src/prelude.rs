//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The query builder and sort helpers
//! - Models, their options and result envelopes
//! - Schemas and field descriptors
//! - The connection cache, backend traits and error types

pub use docmodel_core::{
    backend::{CollectionBackend, CollectionHandle, CollectionSpec, DatabaseBackend, StoreBackend, StoreBackendBuilder},
    config::ConnectionConfig,
    connection::ConnectionCache,
    error::{ModelError, ModelResult},
    fields::{Field, FieldMap, HasShape, Shape},
    model::{BatchMode, CountOptions, FindOneOptions, FindOptions, Model, ModelOptions, Update, UpdateById},
    outcome::{ItemError, Outcome},
    query::{QueryBuilder, SortClause, SortDirection, SqlParameter, asc, desc, order, qb},
    schema::{FieldKind, ObjectSchema, Schema, TypedSchema, ValidationErrors},
};
pub use docmodel_macros::Shape;
pub use serde_json::{Value, json};
