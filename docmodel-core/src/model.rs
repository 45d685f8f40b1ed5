//! Schema-validated CRUD over a single collection.
//!
//! A [`Model`] binds a [`Schema`] to a resolved collection handle. Reads compile
//! their options into one parameterized query; writes validate every document
//! they produce before it reaches the store. Every operation returns an
//! [`Outcome`] envelope instead of a `Result`.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let users = cache.model("app", "users", None, TypedSchema::<User>::new()).await?;
//! let status = users.fields().get("status").unwrap();
//!
//! let active = users
//!     .find(FindOptions::new().filter(qb().eq(status, "active")).limit(20))
//!     .await;
//! ```
//!
//! # Batches
//!
//! Multi-document writes issue their store calls concurrently and report each
//! item's failure in `item_errors`. In [`BatchMode::Lenient`] (the default) a
//! batch with failed items is still a success; in [`BatchMode::Strict`] it is
//! reported as [`ModelError::BatchFailed`].

use futures::future::join_all;
use serde_json::{Map, Value};
use std::fmt::{self, Write};
use tracing::{debug, warn};

use crate::{
    backend::{CollectionHandle, partition_key_or_default},
    error::{ModelError, ModelResult},
    fields::{Field, FieldMap},
    outcome::{ItemError, Outcome},
    query::{QueryBuilder, QuerySpec, SortClause, SqlParameter, field_path, order},
    schema::Schema,
};

/// Page size used by [`Model::find`] when no limit is given.
pub const DEFAULT_LIMIT: u64 = 100;

/// How a multi-document write reports items that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Failed items are listed in `item_errors`; the outcome stays successful.
    #[default]
    Lenient,
    /// Any failed item fails the whole outcome.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOptions {
    pub batch_mode: BatchMode,
    pub default_limit: u64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self { batch_mode: BatchMode::default(), default_limit: DEFAULT_LIMIT }
    }
}

/// Options for [`Model::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<QueryBuilder>,
    /// Fields to project; every field when empty.
    pub fields: Vec<Field>,
    /// Maximum number of documents; the model's default limit when `None`.
    pub limit: Option<u64>,
    pub offset: u64,
    pub order_by: Vec<SortClause>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryBuilder) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by(mut self, clauses: impl IntoIterator<Item = SortClause>) -> Self {
        self.order_by = clauses.into_iter().collect();
        self
    }
}

/// Options for [`Model::find_one`].
#[derive(Debug, Clone, Default)]
pub struct FindOneOptions {
    pub filter: Option<QueryBuilder>,
    pub fields: Vec<Field>,
    pub order_by: Vec<SortClause>,
}

impl FindOneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryBuilder) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, clauses: impl IntoIterator<Item = SortClause>) -> Self {
        self.order_by = clauses.into_iter().collect();
        self
    }
}

/// Options for [`Model::count`].
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub filter: Option<QueryBuilder>,
    /// Only documents where this field is defined are counted.
    pub field: Option<Field>,
}

impl CountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryBuilder) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn field(mut self, field: impl Into<Field>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// A partial update addressed by document id.
#[derive(Debug, Clone)]
pub struct UpdateById {
    /// Fields to overwrite; must be a non-empty object.
    pub doc: Value,
    pub id: String,
    /// Partition key value; the id when `None`.
    pub partition_key: Option<String>,
}

impl UpdateById {
    pub fn new(id: impl Into<String>, doc: Value) -> Self {
        Self { doc, id: id.into(), partition_key: None }
    }

    pub fn partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }
}

/// A partial update applied to every document matching `filter`.
#[derive(Debug, Clone)]
pub struct Update {
    pub doc: Value,
    pub filter: QueryBuilder,
}

impl Update {
    pub fn new(filter: QueryBuilder, doc: Value) -> Self {
        Self { doc, filter }
    }
}

/// Schema-validated access to one collection.
pub struct Model<S> {
    schema: S,
    collection: CollectionHandle,
    fields: FieldMap,
    options: ModelOptions,
}

impl<S> fmt::Debug for Model<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("collection", &self.collection.name())
            .field("fields", &self.fields)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: Schema> Model<S> {
    pub fn new(schema: S, collection: CollectionHandle) -> Self {
        Self::with_options(schema, collection, ModelOptions::default())
    }

    pub fn with_options(schema: S, collection: CollectionHandle, options: ModelOptions) -> Self {
        let fields = FieldMap::from_shape(&schema.shape());

        Self { schema, collection, fields, options }
    }

    /// Field descriptors derived from the schema's shape.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Reads one document by id. `partition_key` defaults to the id.
    ///
    /// A missing document is a success with `count == 0` and no `resource`.
    pub async fn find_by_id(&self, id: &str, partition_key: Option<&str>) -> Outcome {
        let partition_key = partition_key.unwrap_or(id);

        match self.collection.read(id, partition_key).await {
            Ok(document) => Outcome::ok()
                .with_count(u64::from(document.is_some()))
                .with_resource(document),
            Err(err) => self.fail("find_by_id", err),
        }
    }

    /// Reads a page of documents.
    pub async fn find(&self, options: FindOptions) -> Outcome {
        let limit = options.limit.unwrap_or(self.options.default_limit);
        let spec = select_query(
            options.filter.as_ref(),
            &options.fields,
            &options.order_by,
            Some((options.offset, limit)),
        );

        match self.run_query(&spec).await {
            Ok(documents) => Outcome::ok()
                .with_count(documents.len() as u64)
                .with_resources(documents)
                .with_query_spec(spec),
            Err(err) => self.fail("find", err).with_query_spec(spec),
        }
    }

    /// Reads the first matching document.
    pub async fn find_one(&self, options: FindOneOptions) -> Outcome {
        let mut outcome = self
            .find(FindOptions {
                filter: options.filter,
                fields: options.fields,
                limit: Some(1),
                offset: 0,
                order_by: options.order_by,
            })
            .await;

        if outcome.success {
            outcome.resource = outcome.resources.take().and_then(|docs| docs.into_iter().next());
        }

        outcome
    }

    /// Counts matching documents.
    pub async fn count(&self, options: CountOptions) -> Outcome {
        let target = options
            .field
            .as_ref()
            .map_or_else(|| "1".to_string(), |field| field_path(field.name()));
        let mut query = format!("SELECT VALUE COUNT({target}) FROM c");
        let params = push_where(&mut query, options.filter.as_ref());
        let spec = QuerySpec::new(query, params);

        match self.run_query(&spec).await {
            Ok(rows) => Outcome::ok()
                .with_count(rows.first().and_then(Value::as_u64).unwrap_or(0))
                .with_query_spec(spec),
            Err(err) => self.fail("count", err).with_query_spec(spec),
        }
    }

    /// Runs a caller-written query as-is.
    pub async fn find_by_query(&self, query: impl Into<String>, params: Vec<SqlParameter>) -> Outcome {
        let spec = QuerySpec::new(query, params);

        match self.run_query(&spec).await {
            Ok(documents) => Outcome::ok()
                .with_count(documents.len() as u64)
                .with_resources(documents)
                .with_query_spec(spec),
            Err(err) => self.fail("find_by_query", err).with_query_spec(spec),
        }
    }

    /// Validates and creates one document.
    pub async fn insert(&self, doc: Value) -> Outcome {
        let validated = match self.schema.validate(&doc) {
            Ok(validated) => validated,
            Err(errors) => return self.fail("insert", errors.into()),
        };

        match self.collection.create(validated).await {
            Ok(created) => Outcome::ok().with_resource(Some(created)).with_items_updated(1),
            Err(err) => self.fail("insert", err),
        }
    }

    /// Validates the batch as a whole, then creates every document concurrently.
    ///
    /// An invalid document rejects the whole batch before any write.
    pub async fn insert_many(&self, docs: Vec<Value>) -> Outcome {
        let total = docs.len();

        let validated = match self.schema.validate_many(&docs) {
            Ok(validated) => validated,
            Err(errors) => {
                return self
                    .fail("insert_many", errors.into())
                    .with_items_updated(0)
                    .with_items_failed(total);
            }
        };

        let results = join_all(validated.into_iter().map(|doc| async move {
            let id = document_id(&doc);
            (id, self.collection.create(doc).await)
        }))
        .await;

        let tally = self.tally("insert_many", results);
        self.batch_outcome(&tally).with_resources(tally.succeeded)
    }

    /// Merges `doc` into the stored document, revalidates and writes it back.
    pub async fn update_by_id(&self, update: UpdateById) -> Outcome {
        let patch = match patch_from(update.doc) {
            Ok(patch) => patch,
            Err(err) => return self.fail("update_by_id", err),
        };
        let partition_key = update.partition_key.as_deref().unwrap_or(&update.id);

        let existing = match self.collection.read(&update.id, partition_key).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                let err = ModelError::DocumentNotFound(update.id.clone(), self.collection.name().to_string());
                return self.fail("update_by_id", err);
            }
            Err(err) => return self.fail("update_by_id", err),
        };

        match self.merge_and_write(existing, &patch).await {
            Ok(updated) => Outcome::ok().with_resource(Some(updated)).with_items_updated(1),
            Err(err) => self.fail("update_by_id", err),
        }
    }

    /// Merges `doc` into every document matching the filter.
    ///
    /// Fails with [`ModelError::DocumentsNotFound`] when nothing matches.
    pub async fn update(&self, update: Update) -> Outcome {
        let patch = match patch_from(update.doc) {
            Ok(patch) => patch,
            Err(err) => return self.fail("update", err),
        };

        let spec = select_query(Some(&update.filter), &[], &[], None);
        let matches = match self.matching(&spec, "update").await {
            Ok(matches) => matches,
            Err(outcome) => return outcome,
        };

        let results = join_all(matches.into_iter().map(|existing| {
            let patch = &patch;
            async move {
                let id = document_id(&existing);
                (id, self.merge_and_write(existing, patch).await)
            }
        }))
        .await;

        let tally = self.tally("update", results);
        self.batch_outcome(&tally)
            .with_resources(tally.succeeded)
            .with_query_spec(spec)
    }

    /// Updates the documents matching the filter, or inserts `doc` when none match.
    ///
    /// The outcome carries a single `resource`: the inserted document or the first
    /// updated one.
    pub async fn upsert_one(&self, update: Update) -> Outcome {
        let doc = update.doc.clone();
        let mut outcome = self.update(update).await;

        if matches!(outcome.error, Some(ModelError::DocumentsNotFound(_))) {
            debug!(collection = self.collection.name(), "no match for upsert, inserting");
            return self.insert(doc).await;
        }

        outcome.resource = outcome.resources.take().and_then(|docs| docs.into_iter().next());
        outcome
    }

    /// Deletes one document. `partition_key` defaults to the id.
    pub async fn delete_by_id(&self, id: &str, partition_key: Option<&str>) -> Outcome {
        let partition_key = partition_key.unwrap_or(id);

        match self.collection.delete(id, partition_key).await {
            Ok(()) => Outcome::ok().with_deleted(true).with_items_updated(1),
            Err(err) => self.fail("delete_by_id", err).with_deleted(false),
        }
    }

    /// Deletes every document matching `filter`.
    ///
    /// Fails with [`ModelError::DocumentsNotFound`] and deletes nothing when
    /// nothing matches.
    pub async fn delete_by_filter(&self, filter: QueryBuilder) -> Outcome {
        let spec = select_query(Some(&filter), &[], &[], None);
        let matches = match self.matching(&spec, "delete_by_filter").await {
            Ok(matches) => matches,
            Err(outcome) => return outcome.with_deleted(false),
        };

        let partition_key_path = self.collection.partition_key_path();
        let results = join_all(matches.iter().map(|document| async move {
            let Some(id) = document_id(document) else {
                return (None, Err(ModelError::Backend("matched document has no id".to_string())));
            };
            let partition_key = partition_key_or_default(document, partition_key_path, &id);
            let result = self.collection.delete(&id, &partition_key).await;

            (Some(id), result)
        }))
        .await;

        let tally = self.tally("delete_by_filter", results);
        self.batch_outcome(&tally)
            .with_deleted(tally.errors.is_empty())
            .with_query_spec(spec)
    }

    async fn run_query(&self, spec: &QuerySpec) -> ModelResult<Vec<Value>> {
        debug!(
            collection = self.collection.name(),
            query = %spec.query,
            parameters = spec.parameters().len(),
            "issuing query"
        );

        self.collection.query(spec.clone()).await
    }

    /// Runs `spec` and requires at least one match.
    async fn matching(&self, spec: &QuerySpec, operation: &'static str) -> Result<Vec<Value>, Outcome> {
        match self.run_query(spec).await {
            Ok(matches) if matches.is_empty() => {
                let err = ModelError::DocumentsNotFound(self.collection.name().to_string());
                Err(self.fail(operation, err).with_query_spec(spec.clone()))
            }
            Ok(matches) => Ok(matches),
            Err(err) => Err(self.fail(operation, err).with_query_spec(spec.clone())),
        }
    }

    /// Merges, revalidates and writes back. A patch may not move the document to
    /// another partition.
    async fn merge_and_write(&self, existing: Value, patch: &Map<String, Value>) -> ModelResult<Value> {
        let id = document_id(&existing).unwrap_or_default();
        let path = self.collection.partition_key_path();
        let partition_key = partition_key_or_default(&existing, path, &id);

        let merged = merge_patch(existing, patch)?;
        let validated = self.schema.validate(&merged)?;
        if partition_key_or_default(&validated, path, &id) != partition_key {
            return Err(ModelError::PartitionKeyChanged(id));
        }

        self.collection.upsert(validated).await
    }

    fn tally<T>(&self, operation: &'static str, results: Vec<(Option<String>, ModelResult<T>)>) -> Tally<T> {
        let total = results.len();
        let mut succeeded = Vec::with_capacity(total);
        let mut errors = Vec::new();

        for (index, (id, result)) in results.into_iter().enumerate() {
            match result {
                Ok(item) => succeeded.push(item),
                Err(error) => {
                    warn!(
                        collection = self.collection.name(),
                        operation,
                        index,
                        id = id.as_deref().unwrap_or_default(),
                        error = %error,
                        "batch item failed"
                    );
                    errors.push(ItemError::new(index, id, error));
                }
            }
        }

        Tally { succeeded, errors, total }
    }

    fn batch_outcome<T>(&self, tally: &Tally<T>) -> Outcome {
        let failed = tally.errors.len();
        let outcome = if failed > 0 && self.options.batch_mode == BatchMode::Strict {
            Outcome::failure(ModelError::BatchFailed { failed, total: tally.total })
        } else {
            Outcome::ok()
        };

        outcome
            .with_items_updated(tally.succeeded.len())
            .with_items_failed(failed)
            .with_item_errors(tally.errors.clone())
    }

    fn fail(&self, operation: &'static str, error: ModelError) -> Outcome {
        warn!(
            collection = self.collection.name(),
            operation,
            error = %error,
            "model operation failed"
        );

        Outcome::failure(error)
    }
}

struct Tally<T> {
    succeeded: Vec<T>,
    errors: Vec<ItemError>,
    total: usize,
}

/// Builds `SELECT <projection> FROM c [WHERE ..] [ORDER BY ..] [OFFSET o LIMIT l]`.
///
/// The projection is `*` when `fields` is empty, otherwise each field aliased by
/// [`Field::alias`].
pub fn select_query(
    filter: Option<&QueryBuilder>,
    fields: &[Field],
    order_by: &[SortClause],
    page: Option<(u64, u64)>,
) -> QuerySpec {
    let projection = if fields.is_empty() {
        "*".to_string()
    } else {
        fields
            .iter()
            .map(|field| format!("{} AS {}", field_path(field.name()), field.alias()))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut query = format!("SELECT {projection} FROM c");
    let params = push_where(&mut query, filter);

    let ordering = order(order_by);
    if !ordering.is_empty() {
        query.push(' ');
        query.push_str(&ordering);
    }

    if let Some((offset, limit)) = page {
        let _ = write!(query, " OFFSET {offset} LIMIT {limit}");
    }

    QuerySpec::new(query, params)
}

/// Appends a `WHERE` clause for a non-empty filter and returns its parameters.
fn push_where(query: &mut String, filter: Option<&QueryBuilder>) -> Vec<SqlParameter> {
    match filter.filter(|filter| !filter.is_empty()) {
        Some(filter) => {
            let built = filter.build();
            query.push_str(" WHERE ");
            query.push_str(&built.query);
            built.params
        }
        None => Vec::new(),
    }
}

fn document_id(document: &Value) -> Option<String> {
    document.get("id").and_then(Value::as_str).map(str::to_string)
}

/// Accepts a non-empty object as an update patch.
fn patch_from(doc: Value) -> ModelResult<Map<String, Value>> {
    match doc {
        Value::Object(patch) if patch.is_empty() => Err(ModelError::NothingToUpdate),
        Value::Object(patch) => Ok(patch),
        Value::Null => Err(ModelError::NothingToUpdate),
        _ => Err(ModelError::CannotMerge),
    }
}

/// Shallow merge: top-level keys of `patch` replace those of `existing`.
/// The stored `id` is kept.
fn merge_patch(existing: Value, patch: &Map<String, Value>) -> ModelResult<Value> {
    let Value::Object(mut merged) = existing else {
        return Err(ModelError::CannotMerge);
    };
    let id = merged.get("id").cloned();

    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    if let Some(id) = id {
        merged.insert("id".to_string(), id);
    }

    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{asc, desc, qb};
    use serde_json::json;

    #[test]
    fn selects_everything_without_options() {
        let spec = select_query(None, &[], &[], None);

        assert_eq!(spec.query, "SELECT * FROM c");
        assert!(spec.parameters.is_none());
    }

    #[test]
    fn builds_paged_projection() {
        let filter = qb().eq("status", "active");
        let fields = [Field::new("id"), Field::new("address.city")];
        let spec = select_query(
            Some(&filter),
            &fields,
            &[asc("name"), desc("age")],
            Some((20, 10)),
        );

        assert_eq!(
            spec.query,
            "SELECT c.id AS id, c.address.city AS address_city FROM c WHERE c.status = @param1 \
             ORDER BY c.name ASC, c.age DESC OFFSET 20 LIMIT 10"
        );
        assert_eq!(spec.parameters(), &[SqlParameter::new("@param1", "active")]);
    }

    #[test]
    fn empty_filter_adds_no_where_clause() {
        let spec = select_query(Some(&qb()), &[], &[], Some((0, 5)));

        assert_eq!(spec.query, "SELECT * FROM c OFFSET 0 LIMIT 5");
    }

    #[test]
    fn patches_must_be_non_empty_objects() {
        assert_eq!(patch_from(json!({})), Err(ModelError::NothingToUpdate));
        assert_eq!(patch_from(Value::Null), Err(ModelError::NothingToUpdate));
        assert_eq!(patch_from(json!([1])), Err(ModelError::CannotMerge));
        assert!(patch_from(json!({ "a": 1 })).is_ok());
    }

    #[test]
    fn merge_is_shallow_and_keeps_id() {
        let patch = patch_from(json!({ "id": "other", "b": 3, "nested": { "y": 1 } })).unwrap();
        let merged = merge_patch(json!({ "id": "1", "a": 1, "b": 2, "nested": { "x": 1 } }), &patch).unwrap();

        assert_eq!(merged, json!({ "id": "1", "a": 1, "b": 3, "nested": { "y": 1 } }));
        assert_eq!(merge_patch(json!("text"), &patch), Err(ModelError::CannotMerge));
    }

    #[test]
    fn default_options() {
        let options = ModelOptions::default();

        assert_eq!(options.batch_mode, BatchMode::Lenient);
        assert_eq!(options.default_limit, 100);
    }
}
