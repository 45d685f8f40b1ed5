//! The uniform result envelope returned by every [`Model`](crate::model::Model) operation.
//!
//! Operations never return `Err`: a failure is reported as an [`Outcome`] with
//! `success == false` and `error` set, so single-item and batch operations can be
//! handled the same way. [`Outcome::into_result`] converts back into a `Result`
//! when that is more convenient.
//!
//! # Example
//!
//! ```ignore
//! let outcome = users.find_by_id("42", None).await;
//!
//! if let Some(user) = outcome.resource_as::<User>()? {
//!     println!("{}", user.name);
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::{ModelError, ModelResult},
    query::QuerySpec,
};

/// The failure of one item in a batch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// Position of the item in the batch.
    pub index: usize,
    /// Document id, when the item had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub error: ModelError,
}

impl ItemError {
    pub fn new(index: usize, id: Option<String>, error: ModelError) -> Self {
        Self { index, id, error }
    }
}

/// Result envelope of a model operation.
///
/// Only the fields meaningful for the operation are populated; the rest are
/// `None` and omitted when serialized. A failed outcome always carries `error`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// The single document produced or read by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// The documents produced or read by a multi-document operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Value>>,
    /// Number of matching documents for reads and counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_updated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ModelError>,
    /// Per-item failures of a batch operation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub item_errors: Vec<ItemError>,
    pub success: bool,
    /// The query issued against the store, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_spec: Option<QuerySpec>,
}

impl Outcome {
    /// A successful outcome with no payload.
    pub fn ok() -> Self {
        Self { success: true, ..Self::default() }
    }

    /// A failed outcome carrying `error`.
    pub fn failure(error: impl Into<ModelError>) -> Self {
        Self { error: Some(error.into()), ..Self::default() }
    }

    pub fn with_resource(mut self, resource: Option<Value>) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Value>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn with_items_updated(mut self, items: usize) -> Self {
        self.items_updated = Some(items);
        self
    }

    pub fn with_items_failed(mut self, items: usize) -> Self {
        self.items_failed = Some(items);
        self
    }

    pub fn with_item_errors(mut self, errors: Vec<ItemError>) -> Self {
        self.item_errors = errors;
        self
    }

    pub fn with_query_spec(mut self, spec: QuerySpec) -> Self {
        self.query_spec = Some(spec);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Deserializes `resource` into `T`.
    pub fn resource_as<T: DeserializeOwned>(&self) -> ModelResult<Option<T>> {
        match &self.resource {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Deserializes every element of `resources` into `T`.
    pub fn resources_as<T: DeserializeOwned>(&self) -> ModelResult<Vec<T>> {
        self.resources
            .iter()
            .flatten()
            .map(|value| serde_json::from_value(value.clone()).map_err(ModelError::from))
            .collect()
    }

    /// Returns the outcome on success and its error otherwise.
    pub fn into_result(self) -> ModelResult<Self> {
        if self.success {
            return Ok(self);
        }

        Err(self
            .error
            .unwrap_or_else(|| ModelError::Backend("operation failed without an error".to_string())))
    }
}

impl From<ModelError> for Outcome {
    fn from(error: ModelError) -> Self {
        Outcome::failure(error)
    }
}
