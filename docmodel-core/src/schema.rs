//! Schema validation for documents written through a [`Model`](crate::model::Model).
//!
//! A [`Schema`] validates a JSON document and returns its normalized form, or a list
//! of [`ValidationIssue`]s. It also describes the document's [`Shape`], which the
//! model turns into a [`FieldMap`](crate::fields::FieldMap).
//!
//! Two implementations ship with the crate:
//!
//! - [`ObjectSchema`] - a declarative schema built at runtime
//! - [`TypedSchema`] - validates by round-tripping through a serde type
//!
//! # Example
//!
//! ```ignore
//! use docmodel::schema::{FieldKind, ObjectSchema};
//!
//! let schema = ObjectSchema::new()
//!     .required("id", FieldKind::String)
//!     .required("name", FieldKind::String)
//!     .optional("age", FieldKind::Integer)
//!     .optional(
//!         "address",
//!         FieldKind::Object(ObjectSchema::new().required("city", FieldKind::String)),
//!     );
//! ```

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{fmt, marker::PhantomData};

use crate::fields::{HasShape, Shape};

/// A single schema violation at a dot/index path inside the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Path to the offending value, e.g. `address.city` or `[2].name`. Empty for the root.
    pub path: String,
    /// Human readable description of the violation.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The full set of issues reported by one validation run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn single(issue: ValidationIssue) -> Self {
        Self { issues: vec![issue] }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Prefixes every issue path with `[index]`, used when validating a batch.
    fn at_index(self, index: usize) -> Self {
        Self {
            issues: self
                .issues
                .into_iter()
                .map(|issue| ValidationIssue {
                    path: if issue.path.is_empty() {
                        format!("[{index}]")
                    } else {
                        format!("[{index}].{}", issue.path)
                    },
                    message: issue.message,
                })
                .collect(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        write!(f, "{joined}")
    }
}

impl std::error::Error for ValidationErrors {}

/// A validation capability describing the shape of the documents in a collection.
///
/// Implementations must be pure: a model never mutates its schema and may call it
/// from several concurrent operations.
pub trait Schema: Send + Sync {
    /// Validates a single document, returning the normalized document on success.
    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors>;

    /// Validates a batch as a whole.
    ///
    /// The batch is rejected if any document is invalid; issue paths are prefixed
    /// with the index of the offending document.
    fn validate_many(&self, values: &[Value]) -> Result<Vec<Value>, ValidationErrors> {
        let mut validated = Vec::with_capacity(values.len());
        let mut issues = Vec::new();

        for (index, value) in values.iter().enumerate() {
            match self.validate(value) {
                Ok(doc) => validated.push(doc),
                Err(errors) => issues.extend(errors.at_index(index).issues),
            }
        }

        if issues.is_empty() {
            Ok(validated)
        } else {
            Err(ValidationErrors::new(issues))
        }
    }

    /// Describes the field tree of a valid document.
    fn shape(&self) -> Shape;
}

/// The type a field declared in an [`ObjectSchema`] must have.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    /// Any JSON number.
    Number,
    /// A JSON number without a fractional part.
    Integer,
    Boolean,
    /// An array whose elements all match the inner kind.
    Array(Box<FieldKind>),
    /// A nested object validated by its own schema.
    Object(ObjectSchema),
    /// Any value, including null.
    Any,
}

impl FieldKind {
    pub fn array(element: FieldKind) -> Self {
        FieldKind::Array(Box::new(element))
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array(_) => "array",
            FieldKind::Object(_) => "object",
            FieldKind::Any => "any",
        }
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
        let matches = match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Array(element), Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    element.check(item, &format!("{path}[{index}]"), issues);
                }
                true
            }
            (FieldKind::Object(schema), Value::Object(map)) => {
                schema.check_object(map, path, issues);
                true
            }
            _ => false,
        };

        if !matches {
            issues.push(ValidationIssue::new(
                path,
                format!("expected {}, received {}", self.describe(), type_name(value)),
            ));
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

/// A declarative object schema.
///
/// Declared fields are type-checked; keys that are not declared pass through
/// untouched, since stored documents commonly carry store-managed metadata.
/// An optional field may be absent or `null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    fields: Vec<FieldSpec>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declares a field that must be present and non-null.
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec { name: name.into(), kind, required: true });
        self
    }

    /// Declares a field that may be absent or null.
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec { name: name.into(), kind, required: false });
        self
    }

    fn check_object(&self, map: &Map<String, Value>, prefix: &str, issues: &mut Vec<ValidationIssue>) {
        for field in &self.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{prefix}.{}", field.name)
            };

            match map.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    issues.push(ValidationIssue::new(path, "required"));
                }
                None | Some(Value::Null) => {}
                Some(value) => field.kind.check(value, &path, issues),
            }
        }
    }
}

impl Schema for ObjectSchema {
    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        let map = value.as_object().ok_or_else(|| {
            ValidationErrors::single(ValidationIssue::new(
                "",
                format!("expected object, received {}", type_name(value)),
            ))
        })?;

        let mut issues = Vec::new();
        self.check_object(map, "", &mut issues);

        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(ValidationErrors::new(issues))
        }
    }

    fn shape(&self) -> Shape {
        Shape::Object(
            self.fields
                .iter()
                .map(|field| {
                    let shape = match &field.kind {
                        FieldKind::Object(nested) => nested.shape(),
                        _ => Shape::Value,
                    };
                    (field.name.clone(), shape)
                })
                .collect(),
        )
    }
}

/// A schema backed by a serde type.
///
/// Validation deserializes the document into `T` and serializes it back, so the
/// normalized document is exactly `T`'s serialized form: keys unknown to `T` are
/// dropped unless `T` keeps them (for instance with `#[serde(flatten)]`).
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedSchema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: Serialize + DeserializeOwned + HasShape,
{
    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        let typed: T = serde_json::from_value(value.clone())
            .map_err(|err| ValidationErrors::single(ValidationIssue::new("", err.to_string())))?;

        serde_json::to_value(&typed)
            .map_err(|err| ValidationErrors::single(ValidationIssue::new("", err.to_string())))
    }

    fn shape(&self) -> Shape {
        T::shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn user_schema() -> ObjectSchema {
        ObjectSchema::new()
            .required("id", FieldKind::String)
            .required("name", FieldKind::String)
            .optional("age", FieldKind::Integer)
            .optional("tags", FieldKind::array(FieldKind::String))
            .optional(
                "address",
                FieldKind::Object(ObjectSchema::new().required("city", FieldKind::String)),
            )
    }

    #[test]
    fn accepts_valid_document_and_passes_unknown_keys() {
        let doc = json!({ "id": "1", "name": "Ada", "age": 36, "_etag": "abc" });

        assert_eq!(user_schema().validate(&doc).unwrap(), doc);
    }

    #[test]
    fn reports_every_issue_with_paths() {
        let doc = json!({
            "id": 7,
            "age": 1.5,
            "tags": ["a", 3],
            "address": { "city": null }
        });

        let errors = user_schema().validate(&doc).unwrap_err();
        let paths = errors
            .issues()
            .iter()
            .map(|issue| issue.path.as_str())
            .collect::<Vec<_>>();

        assert_eq!(paths, vec!["id", "name", "age", "tags[1]", "address.city"]);
    }

    #[test]
    fn rejects_non_objects() {
        let errors = user_schema().validate(&json!([1, 2])).unwrap_err();

        assert_eq!(errors.to_string(), "expected object, received array");
    }

    #[test]
    fn validate_many_is_all_or_nothing() {
        let docs = vec![
            json!({ "id": "1", "name": "Ada" }),
            json!({ "id": "2" }),
            json!({ "id": "3", "name": "Grace" }),
        ];

        let errors = user_schema().validate_many(&docs).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors.issues()[0].path, "[1].name");
        assert_eq!(user_schema().validate_many(&docs[..1]).unwrap().len(), 1);
    }

    #[test]
    fn object_shape_mirrors_nested_fields() {
        let shape = user_schema().shape();

        let Shape::Object(fields) = shape else {
            panic!("expected object shape");
        };
        let names = fields.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();

        assert_eq!(names, vec!["id", "name", "age", "tags", "address"]);
        assert!(matches!(&fields[4].1, Shape::Object(inner) if inner.len() == 1));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        #[serde(default)]
        pinned: bool,
    }

    impl HasShape for Note {
        fn shape() -> Shape {
            Shape::Object(vec![
                ("id".into(), Shape::Value),
                ("body".into(), Shape::Value),
                ("pinned".into(), Shape::Value),
            ])
        }
    }

    #[test]
    fn typed_schema_normalizes_through_serde() {
        let schema = TypedSchema::<Note>::new();

        let normalized = schema
            .validate(&json!({ "id": "n1", "body": "hi", "extra": true }))
            .unwrap();

        assert_eq!(normalized, json!({ "id": "n1", "body": "hi", "pinned": false }));
        assert!(schema.validate(&json!({ "id": "n1" })).is_err());
    }
}
