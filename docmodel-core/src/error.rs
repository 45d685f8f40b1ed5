//! Error types and result types for model, query and connection operations.
//!
//! Model operations report failures inside an [`Outcome`](crate::outcome::Outcome)
//! rather than returning them, but every fallible building block underneath
//! (backends, the connection cache, schemas) speaks [`ModelResult<T>`].

use serde::{Serialize, Serializer};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::schema::ValidationErrors;

/// Represents all possible errors that can occur when working with a model or its store.
///
/// The enum is `Clone` so a single failure can be handed to every caller awaiting
/// the same in-flight operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// The document was rejected by the schema.
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),
    /// A database or collection name is empty or contains reserved characters.
    #[error("Invalid name: {0}")]
    InvalidName(String),
    /// Connection settings are missing or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} not found in collection {1}")]
    DocumentNotFound(String, String),
    /// A filter-based operation required at least one match and found none.
    #[error("Documents not found in collection {0}")]
    DocumentsNotFound(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// An update was requested with an empty patch.
    #[error("Nothing to update")]
    NothingToUpdate,
    /// Either the patch or the stored document is not a JSON object.
    #[error("Cannot merge non-object types")]
    CannotMerge,
    /// An update would change the partition key of the given document.
    #[error("Update would change the partition key of document {0}")]
    PartitionKeyChanged(String),
    /// A strict batch operation had at least one failed item.
    #[error("Batch failed: {failed} of {total} items failed")]
    BatchFailed { failed: usize, total: usize },
    /// The query text could not be parsed or executed.
    #[error("Query error: {0}")]
    Query(String),
    /// Serialization/deserialization error when converting documents.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for model and store operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<ValidationErrors> for ModelError {
    fn from(errors: ValidationErrors) -> Self {
        ModelError::Validation(errors)
    }
}

impl Serialize for ModelError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl ModelError {
    /// Returns `true` for failures caused by the caller's input rather than the store.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ModelError::Validation(_)
                | ModelError::InvalidName(_)
                | ModelError::InvalidConfig(_)
                | ModelError::NothingToUpdate
                | ModelError::CannotMerge
                | ModelError::PartitionKeyChanged(_)
        )
    }

    /// Returns `true` when the error reports a missing document or an empty match set.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelError::DocumentNotFound(..) | ModelError::DocumentsNotFound(_)
        )
    }
}
