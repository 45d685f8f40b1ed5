//! Parameterized query construction for SQL-queryable document stores.
//!
//! A [`QueryBuilder`] is an immutable `{ clause, params }` pair. Every literal is
//! bound to a generated `@paramN` placeholder, so values never end up in the query
//! text, and field paths are rendered with bracket notation whenever a segment is
//! not a plain identifier.
//!
//! # Building filters
//!
//! ```ignore
//! use docmodel::query::{qb, asc, order};
//!
//! let q = qb();
//! let filter = q.and([
//!     q.eq("status", "active"),
//!     q.or([q.gt("age", 18), q.ieq("role", "Admin")]),
//! ]);
//!
//! let built = filter.build();
//! assert_eq!(
//!     built.query,
//!     "(c.status = @param1) AND ((c.age > @param2) OR (LOWER(c.role) = @param3))"
//! );
//! assert_eq!(order(&[asc("name")]), "ORDER BY c.name ASC");
//! ```
//!
//! # Parameter sessions
//!
//! Placeholder names come from a [`ParamSession`] shared by every builder derived
//! from the same root. Fragments of one session never collide. When a fragment
//! from another session is composed in, its parameters are re-bound to fresh
//! names of the receiving session before its clause is spliced in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Clause used for `IN` over an empty set: valid syntax that matches nothing.
const MATCH_NOTHING: &str = "false";

/// A named query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    /// Placeholder name, including the leading `@`.
    pub name: String,
    pub value: Value,
}

impl SqlParameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// The exact query text and parameters sent to the query endpoint.
///
/// `parameters` is `None` when there is nothing to bind: some endpoints reject an
/// empty parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<SqlParameter>>,
}

impl QuerySpec {
    pub fn new(query: impl Into<String>, parameters: Vec<SqlParameter>) -> Self {
        Self {
            query: query.into(),
            parameters: if parameters.is_empty() { None } else { Some(parameters) },
        }
    }

    /// Bound parameters, empty when none were sent.
    pub fn parameters(&self) -> &[SqlParameter] {
        self.parameters.as_deref().unwrap_or_default()
    }
}

/// The output of [`QueryBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltQuery {
    pub query: String,
    pub params: Vec<SqlParameter>,
}

/// Allocates placeholder names for one family of query fragments.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ParamSession {
    counter: Arc<AtomicU64>,
}

impl ParamSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&self) -> String {
        format!("@param{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn same_as(&self, other: &ParamSession) -> bool {
        Arc::ptr_eq(&self.counter, &other.counter)
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A single `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    field: String,
    direction: SortDirection,
}

impl SortClause {
    pub fn new(field: impl AsRef<str>, direction: SortDirection) -> Self {
        Self { field: field.as_ref().to_string(), direction }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}

impl fmt::Display for SortClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };

        write!(f, "{} {}", field_path(&self.field), direction)
    }
}

/// Ascending sort on `field`.
pub fn asc(field: impl AsRef<str>) -> SortClause {
    SortClause::new(field, SortDirection::Asc)
}

/// Descending sort on `field`.
pub fn desc(field: impl AsRef<str>) -> SortClause {
    SortClause::new(field, SortDirection::Desc)
}

/// Renders an `ORDER BY` clause, or an empty string when there is nothing to sort by.
pub fn order(clauses: &[SortClause]) -> String {
    if clauses.is_empty() {
        return String::new();
    }

    let terms = clauses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!("ORDER BY {terms}")
}

/// Starts a new, empty query builder with its own parameter session.
pub fn qb() -> QueryBuilder {
    QueryBuilder::new()
}

/// An immutable, composable filter fragment.
///
/// Comparison methods called on an empty builder produce the bare comparison.
/// Called on a builder that already holds a clause, the comparison is AND-ed
/// onto it, so `qb().eq("a", 1).gt("b", 2)` reads as both conditions.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    clause: String,
    params: Vec<SqlParameter>,
    session: ParamSession,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::with_session(ParamSession::new())
    }

    /// Starts an empty builder that allocates names from an existing session.
    pub fn with_session(session: ParamSession) -> Self {
        Self { clause: String::new(), params: Vec::new(), session }
    }

    pub fn session(&self) -> &ParamSession {
        &self.session
    }

    /// The clause text built so far.
    pub fn clause(&self) -> &str {
        &self.clause
    }

    /// Parameters bound so far, in binding order.
    pub fn params(&self) -> &[SqlParameter] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    pub fn eq(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, "=", value)
    }

    pub fn ne(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, "!=", value)
    }

    pub fn gt(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, ">", value)
    }

    pub fn gte(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, ">=", value)
    }

    pub fn lt(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, "<", value)
    }

    pub fn lte(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.compare(field, "<=", value)
    }

    /// Membership test: `<field> IN (@p1, @p2, ...)`.
    ///
    /// An empty value list yields a constant false clause.
    pub fn in_array<V>(&self, field: impl AsRef<str>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        let params = values
            .into_iter()
            .map(|value| self.bind(value))
            .collect::<Vec<_>>();

        if params.is_empty() {
            return self.extend(MATCH_NOTHING.to_string(), params);
        }

        let placeholders = params
            .iter()
            .map(|param| param.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        self.extend(
            format!("{} IN ({placeholders})", field_path(field.as_ref())),
            params,
        )
    }

    /// Case-insensitive equality.
    pub fn ieq(&self, field: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let param = self.bind(value.as_ref().to_lowercase());

        self.extend(
            format!("LOWER({}) = {}", field_path(field.as_ref()), param.name),
            vec![param],
        )
    }

    /// Case-insensitive substring containment.
    pub fn ilike(&self, field: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let param = self.bind(value.as_ref().to_lowercase());

        self.extend(
            format!("CONTAINS(LOWER({}), {})", field_path(field.as_ref()), param.name),
            vec![param],
        )
    }

    /// Tests whether an array-valued field contains `value`.
    pub fn array_contains(&self, field: impl AsRef<str>, value: impl Into<Value>) -> Self {
        let param = self.bind(value);

        self.extend(
            format!("ARRAY_CONTAINS({}, {})", field_path(field.as_ref()), param.name),
            vec![param],
        )
    }

    /// Joins this builder (when non-empty) and `fragments` with `AND`.
    ///
    /// Each clause is parenthesized; the parameters are the concatenation of the
    /// inputs' parameters in argument order.
    pub fn and(&self, fragments: impl IntoIterator<Item = QueryBuilder>) -> Self {
        self.combine(" AND ", fragments)
    }

    /// Joins this builder (when non-empty) and `fragments` with `OR`.
    pub fn or(&self, fragments: impl IntoIterator<Item = QueryBuilder>) -> Self {
        self.combine(" OR ", fragments)
    }

    /// Negates `fragment`.
    pub fn not(&self, fragment: QueryBuilder) -> Self {
        if fragment.is_empty() {
            return self.clone();
        }

        let mut params = Vec::new();
        let clause = self.absorb(&fragment, &mut params);

        self.extend(format!("NOT ({clause})"), params)
    }

    /// Returns the clause text and parameters. The builder is left untouched.
    pub fn build(&self) -> BuiltQuery {
        BuiltQuery {
            query: self.clause.clone(),
            params: self.params.clone(),
        }
    }

    fn compare(&self, field: impl AsRef<str>, op: &str, value: impl Into<Value>) -> Self {
        let param = self.bind(value);

        self.extend(
            format!("{} {op} {}", field_path(field.as_ref()), param.name),
            vec![param],
        )
    }

    fn bind(&self, value: impl Into<Value>) -> SqlParameter {
        SqlParameter {
            name: self.session.next_name(),
            value: value.into(),
        }
    }

    fn fragment(&self, clause: String, params: Vec<SqlParameter>) -> Self {
        Self { clause, params, session: self.session.clone() }
    }

    fn extend(&self, clause: String, params: Vec<SqlParameter>) -> Self {
        let fragment = self.fragment(clause, params);

        if self.is_empty() {
            fragment
        } else {
            self.and([fragment])
        }
    }

    fn combine(&self, operator: &str, fragments: impl IntoIterator<Item = QueryBuilder>) -> Self {
        let mut params = Vec::new();
        let mut clauses = Vec::new();

        for fragment in std::iter::once(self.clone()).chain(fragments) {
            if fragment.is_empty() {
                continue;
            }

            let clause = self.absorb(&fragment, &mut params);
            clauses.push(format!("({clause})"));
        }

        self.fragment(clauses.join(operator), params)
    }

    /// Appends `fragment`'s parameters to `params` and returns its clause text.
    ///
    /// Same-session parameters are unique already, so only repeats of the very
    /// same binding are skipped. Foreign parameters get fresh names.
    fn absorb(&self, fragment: &QueryBuilder, params: &mut Vec<SqlParameter>) -> String {
        if self.session.same_as(&fragment.session) {
            for param in &fragment.params {
                if !params.iter().any(|existing| existing.name == param.name) {
                    params.push(param.clone());
                }
            }

            return fragment.clause.clone();
        }

        let mut renames = HashMap::with_capacity(fragment.params.len());

        for param in &fragment.params {
            let rebound = self.bind(param.value.clone());
            renames.insert(param.name.clone(), rebound.name.clone());
            params.push(rebound);
        }

        rename_placeholders(&fragment.clause, &renames)
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Renders a dot-joined field path against the collection alias `c`.
pub fn field_path(field: &str) -> String {
    let mut path = String::from("c");

    for segment in field.split('.') {
        if is_identifier(segment) {
            path.push('.');
            path.push_str(segment);
        } else {
            path.push_str("[\"");
            for c in segment.chars() {
                if c == '"' || c == '\\' {
                    path.push('\\');
                }
                path.push(c);
            }
            path.push_str("\"]");
        }
    }

    path
}

/// Walks `clause`, calling `on_placeholder` for every `@name` token outside string literals.
fn scan_placeholders(clause: &str, mut on_placeholder: impl FnMut(usize, usize)) {
    let bytes = clause.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            quote @ (b'"' | b'\'') => {
                index += 1;
                while index < bytes.len() && bytes[index] != quote {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
                index += 1;
            }
            b'@' => {
                let start = index;
                index += 1;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_')
                {
                    index += 1;
                }
                on_placeholder(start, index);
            }
            _ => index += 1,
        }
    }
}

/// Lists the placeholder tokens referenced by `clause`, in order of appearance.
pub fn placeholders(clause: &str) -> Vec<String> {
    let mut found = Vec::new();
    scan_placeholders(clause, |start, end| found.push(clause[start..end].to_string()));
    found
}

fn rename_placeholders(clause: &str, renames: &HashMap<String, String>) -> String {
    let mut renamed = String::with_capacity(clause.len());
    let mut last = 0;

    scan_placeholders(clause, |start, end| {
        if let Some(new_name) = renames.get(&clause[start..end]) {
            renamed.push_str(&clause[last..start]);
            renamed.push_str(new_name);
            last = end;
        }
    });
    renamed.push_str(&clause[last..]);

    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn assert_well_formed(built: &BuiltQuery) {
        let names = built
            .params
            .iter()
            .map(|param| param.name.clone())
            .collect::<HashSet<_>>();

        assert_eq!(names.len(), built.params.len(), "duplicate parameter names");
        for placeholder in placeholders(&built.query) {
            assert!(names.contains(&placeholder), "unbound placeholder {placeholder}");
        }
    }

    #[test]
    fn comparisons_bind_one_parameter_each() {
        let q = qb();

        assert_eq!(q.eq("name", "Ada").build().query, "c.name = @param1");
        assert_eq!(q.ne("name", "Ada").build().query, "c.name != @param2");
        assert_eq!(q.gt("age", 1).build().query, "c.age > @param3");
        assert_eq!(q.gte("age", 1).build().query, "c.age >= @param4");
        assert_eq!(q.lt("age", 1).build().query, "c.age < @param5");

        let lte = q.lte("age", 9).build();
        assert_eq!(lte.query, "c.age <= @param6");
        assert_eq!(lte.params, vec![SqlParameter::new("@param6", 9)]);
    }

    #[test]
    fn and_or_parenthesize_and_concatenate_params() {
        let q = qb();
        let a = q.eq("status", "active");
        let b = q.or([q.gt("age", 18), q.ieq("role", "Admin")]);

        let combined = a.and([b.clone()]).build();

        assert_eq!(
            combined.query,
            "(c.status = @param1) AND ((c.age > @param2) OR (LOWER(c.role) = @param3))"
        );
        let mut expected = a.build().params;
        expected.extend(b.build().params);
        assert_eq!(combined.params, expected);
        assert_eq!(combined.params[2].value, json!("admin"));
        assert_well_formed(&combined);
    }

    #[test]
    fn empty_root_contributes_nothing() {
        let q = qb();
        let built = q.and([q.eq("a", 1)]).build();

        assert_eq!(built.query, "(c.a = @param1)");
        assert_eq!(q.and(Vec::new()).build().query, "");
    }

    #[test]
    fn chained_comparisons_are_conjoined() {
        let built = qb().eq("a", 1).gt("b", 2).build();

        assert_eq!(built.query, "(c.a = @param1) AND (c.b > @param2)");
        assert_well_formed(&built);
    }

    #[test]
    fn in_array_binds_every_value() {
        let built = qb().in_array("status", ["a", "b", "c"]).build();

        assert_eq!(built.query, "c.status IN (@param1, @param2, @param3)");
        assert_eq!(built.params.len(), 3);
    }

    #[test]
    fn empty_in_array_matches_nothing() {
        let built = qb().in_array("status", Vec::<Value>::new()).build();

        assert_eq!(built.query, "false");
        assert!(built.params.is_empty());
    }

    #[test]
    fn ilike_and_array_contains() {
        let q = qb();

        let ilike = q.ilike("name", "ADA").build();
        assert_eq!(ilike.query, "CONTAINS(LOWER(c.name), @param1)");
        assert_eq!(ilike.params[0].value, json!("ada"));

        let contains = q.array_contains("tags", "rust").build();
        assert_eq!(contains.query, "ARRAY_CONTAINS(c.tags, @param2)");
    }

    #[test]
    fn not_wraps_fragment() {
        let q = qb();
        let built = q.not(q.eq("deleted", true)).build();

        assert_eq!(built.query, "NOT (c.deleted = @param1)");
    }

    #[test]
    fn field_names_cannot_inject() {
        let built = qb().eq("name = 1 OR 1", "x").build();
        assert_eq!(built.query, "c[\"name = 1 OR 1\"] = @param1");

        let quoted = field_path("a\"b.c");
        assert_eq!(quoted, "c[\"a\\\"b\"].c");
        assert_eq!(field_path("address.city"), "c.address.city");
    }

    #[test]
    fn foreign_fragments_are_rebound() {
        let left = qb().eq("a", 1);
        let right = qb().eq("b", 2);
        assert_eq!(left.build().params[0].name, right.build().params[0].name);

        let combined = left.and([right]).build();

        assert_eq!(combined.query, "(c.a = @param1) AND (c.b = @param2)");
        assert_eq!(combined.params[1], SqlParameter::new("@param2", 2));
        assert_well_formed(&combined);
    }

    #[test]
    fn rebinding_skips_quoted_field_names() {
        let foreign = qb().eq("@param1", "x");
        let q = qb();
        let _ = q.eq("z", 0);

        let built = q.and([foreign]).build();

        assert_eq!(built.query, "(c[\"@param1\"] = @param2)");
        assert_eq!(placeholders(&built.query), vec!["@param2"]);
    }

    #[test]
    fn reusing_a_fragment_keeps_names_unique() {
        let q = qb();
        let a = q.eq("a", 1);

        let built = q.or([a.clone(), q.and([a, q.eq("b", 2)])]).build();

        assert_well_formed(&built);
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn build_does_not_mutate() {
        let q = qb().eq("a", 1);

        assert_eq!(q.build(), q.build());
        assert_eq!(q.params().len(), 1);
    }

    #[test]
    fn order_renders_sort_terms() {
        assert_eq!(order(&[asc("name"), desc("address.city")]), "ORDER BY c.name ASC, c.address.city DESC");
        assert_eq!(order(&[]), "");
    }

    #[test]
    fn query_spec_omits_empty_parameters() {
        let spec = QuerySpec::new("SELECT * FROM c", Vec::new());
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({ "query": "SELECT * FROM c" }));

        let spec = QuerySpec::new("SELECT * FROM c WHERE c.a = @p", vec![SqlParameter::new("@p", 1)]);
        assert_eq!(spec.parameters().len(), 1);
    }
}
