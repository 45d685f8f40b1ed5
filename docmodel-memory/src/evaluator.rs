//! Query evaluation for in-memory document filtering.
//!
//! Expressions evaluate to `Option<Value>`, where `None` is an undefined result
//! (a missing property, or an operation on mismatched types). A `WHERE` clause
//! keeps a document only when it evaluates to exactly `true`.

use serde_json::{Map, Value};
use std::{cmp::Ordering, collections::HashMap};

use docmodel_core::{
    error::{ModelError, ModelResult},
    query::{QuerySpec, SortDirection},
};

use crate::parser::{self, BinaryOp, Expr, Function, Projection, Select};

/// Comparable representation of JSON values.
///
/// Numbers are normalized to `f64` so `1` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Comparable::Null,
            Value::Bool(value) => Comparable::Bool(*value),
            Value::Number(value) => Comparable::Number(value.as_f64().unwrap_or(f64::NAN)),
            Value::String(value) => Comparable::String(value),
            Value::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Value::Object(map) => Comparable::Map(
                map.iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    /// Rank of the type in cross-type ordering: null, booleans, numbers, strings, arrays, objects.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Map(_) => 5,
        }
    }

    fn same_type(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

/// Total order used by `ORDER BY`: undefined sorts first, then by type rank, then by value.
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let (a, b) = (Comparable::from(a), Comparable::from(b));
            a.rank()
                .cmp(&b.rank())
                .then_with(|| a.partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
    }
}

/// Parses `spec` and runs it over `documents`.
pub(crate) fn execute<'a>(
    spec: &QuerySpec,
    documents: impl IntoIterator<Item = &'a Value>,
) -> ModelResult<Vec<Value>> {
    let select = parser::parse(&spec.query)?;
    let params = spec
        .parameters()
        .iter()
        .map(|param| (param.name.as_str(), &param.value))
        .collect::<HashMap<_, _>>();

    check(&select, &params)?;

    let mut matched = Vec::new();
    for document in documents {
        let evaluator = DocumentEvaluator { document, alias: &select.alias, params: &params };
        let keep = match &select.filter {
            Some(filter) => evaluator.evaluate(filter)? == Some(Value::Bool(true)),
            None => true,
        };
        if keep {
            matched.push(document);
        }
    }

    if let Some(rows) = aggregate(&select, &matched, &params)? {
        return Ok(rows);
    }

    if !select.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(matched.len());
        for document in matched {
            let evaluator = DocumentEvaluator { document, alias: &select.alias, params: &params };
            let keys = select
                .order_by
                .iter()
                .map(|(expr, _)| evaluator.evaluate(expr))
                .collect::<ModelResult<Vec<_>>>()?;
            keyed.push((keys, document));
        }

        keyed.sort_by(|(left, _), (right, _)| {
            select
                .order_by
                .iter()
                .zip(left.iter().zip(right))
                .map(|((_, direction), (a, b))| match direction {
                    SortDirection::Asc => sort_order(a.as_ref(), b.as_ref()),
                    SortDirection::Desc => sort_order(b.as_ref(), a.as_ref()),
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        matched = keyed.into_iter().map(|(_, document)| document).collect();
    }

    let page = matched
        .into_iter()
        .skip(select.offset.unwrap_or(0))
        .take(select.limit.unwrap_or(usize::MAX));

    let mut rows = Vec::new();
    for document in page {
        let evaluator = DocumentEvaluator { document, alias: &select.alias, params: &params };

        match &select.projection {
            Projection::All => rows.push(document.clone()),
            Projection::Value(expr) => rows.extend(evaluator.evaluate(expr)?),
            Projection::Items(items) => {
                let mut row = Map::new();
                for item in items {
                    if let Some(value) = evaluator.evaluate(&item.expr)? {
                        row.insert(item.alias.clone(), value);
                    }
                }
                rows.push(Value::Object(row));
            }
        }
    }

    Ok(rows)
}

/// Rejects unknown roots, undefined parameters and misplaced aggregates before any document is read.
fn check(select: &Select, params: &HashMap<&str, &Value>) -> ModelResult<()> {
    let top_level_count = match &select.projection {
        Projection::Value(Expr::Call(Function::Count, _)) => true,
        Projection::Items(items) => {
            matches!(items.as_slice(), [item] if matches!(item.expr, Expr::Call(Function::Count, _)))
        }
        _ => false,
    };

    let mut error = None;
    for (position, expr) in select.expressions().into_iter().enumerate() {
        expr.walk(&mut |node| {
            if error.is_some() {
                return;
            }
            match node {
                Expr::Param(name) if !params.contains_key(name.as_str()) => {
                    error = Some(ModelError::Query(format!("Parameter {name} is not defined")));
                }
                Expr::Path { root, .. } if root != &select.alias => {
                    error = Some(ModelError::Query(format!("Identifier '{root}' could not be resolved")));
                }
                Expr::Call(Function::Count, _) if !(top_level_count && position == 0 && std::ptr::eq(node, expr)) => {
                    error = Some(ModelError::Query("COUNT is only supported as the whole projection".to_string()));
                }
                _ => {}
            }
        });
    }

    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Evaluates a `COUNT` projection, if the statement has one.
fn aggregate(select: &Select, matched: &[&Value], params: &HashMap<&str, &Value>) -> ModelResult<Option<Vec<Value>>> {
    let (target, alias) = match &select.projection {
        Projection::Value(Expr::Call(Function::Count, args)) => (&args[0], None),
        Projection::Items(items) => match items.as_slice() {
            [item] => match &item.expr {
                Expr::Call(Function::Count, args) => (&args[0], Some(&item.alias)),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let mut count = 0u64;
    for document in matched.iter().copied() {
        let evaluator = DocumentEvaluator { document, alias: &select.alias, params };
        if evaluator.evaluate(target)?.is_some() {
            count += 1;
        }
    }

    Ok(Some(vec![match alias {
        Some(alias) => Value::Object(Map::from_iter([(alias.clone(), Value::from(count))])),
        None => Value::from(count),
    }]))
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Value,
    alias: &'a str,
    params: &'a HashMap<&'a str, &'a Value>,
}

impl DocumentEvaluator<'_> {
    pub fn evaluate(&self, expr: &Expr) -> ModelResult<Option<Value>> {
        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Param(name) => self
                .params
                .get(name.as_str())
                .map(|value| Some((*value).clone()))
                .ok_or_else(|| ModelError::Query(format!("Parameter {name} is not defined"))),
            Expr::Path { root, segments } => {
                if root != self.alias {
                    return Err(ModelError::Query(format!("Identifier '{root}' could not be resolved")));
                }
                Ok(resolve(self.document, segments).cloned())
            }
            Expr::Not(inner) => Ok(match self.evaluate(inner)? {
                Some(Value::Bool(value)) => Some(Value::Bool(!value)),
                _ => None,
            }),
            Expr::Binary(left, op, right) => self.binary(left, *op, right),
            Expr::In { target, items, negated } => {
                let Some(target) = self.evaluate(target)? else {
                    return Ok(None);
                };
                let target = Comparable::from(&target);

                let mut found = false;
                for item in items {
                    if let Some(item) = self.evaluate(item)? {
                        if Comparable::from(&item) == target {
                            found = true;
                            break;
                        }
                    }
                }

                Ok(Some(Value::Bool(found != *negated)))
            }
            Expr::Call(function, args) => self.call(*function, args),
        }
    }

    fn binary(&self, left: &Expr, op: BinaryOp, right: &Expr) -> ModelResult<Option<Value>> {
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;

        if let BinaryOp::And | BinaryOp::Or = op {
            let (l, r) = (left.as_ref().and_then(Value::as_bool), right.as_ref().and_then(Value::as_bool));
            let result = match (op, l, r) {
                (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => Some(false),
                (BinaryOp::And, Some(true), Some(true)) => Some(true),
                (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Some(true),
                (BinaryOp::Or, Some(false), Some(false)) => Some(false),
                _ => None,
            };
            return Ok(result.map(Value::Bool));
        }

        let (Some(left), Some(right)) = (left, right) else {
            return Ok(None);
        };
        let (left, right) = (Comparable::from(&left), Comparable::from(&right));
        if !left.same_type(&right) {
            return Ok(None);
        }

        let result = match op {
            BinaryOp::Eq => Some(left == right),
            BinaryOp::Ne => Some(left != right),
            _ => left.partial_cmp(&right).map(|ordering| match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Lte => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
        };

        Ok(result.map(Value::Bool))
    }

    fn call(&self, function: Function, args: &[Expr]) -> ModelResult<Option<Value>> {
        let values = args
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<ModelResult<Vec<_>>>()?;
        let flag = values.get(2).and_then(|value| value.as_ref()).and_then(Value::as_bool).unwrap_or(false);

        let result = match (function, values.as_slice()) {
            (Function::IsDefined, [value]) => Some(Value::Bool(value.is_some())),
            (Function::Lower, [Some(Value::String(text))]) => Some(Value::String(text.to_lowercase())),
            (Function::Upper, [Some(Value::String(text))]) => Some(Value::String(text.to_uppercase())),
            (Function::Contains | Function::StartsWith | Function::EndsWith, [Some(Value::String(text)), Some(Value::String(needle)), ..]) => {
                let (text, needle) = if flag {
                    (text.to_lowercase(), needle.to_lowercase())
                } else {
                    (text.clone(), needle.clone())
                };
                Some(Value::Bool(match function {
                    Function::Contains => text.contains(&needle),
                    Function::StartsWith => text.starts_with(&needle),
                    _ => text.ends_with(&needle),
                }))
            }
            (Function::ArrayContains, [Some(Value::Array(items)), Some(needle), ..]) => {
                Some(Value::Bool(items.iter().any(|item| array_item_matches(item, needle, flag))))
            }
            (Function::Count, _) => {
                return Err(ModelError::Query("COUNT is only supported as the whole projection".to_string()));
            }
            _ => None,
        };

        Ok(result)
    }
}

/// Equality, or with `partial` set, an object item containing every property of `needle`.
fn array_item_matches(item: &Value, needle: &Value, partial: bool) -> bool {
    match (item, needle) {
        (Value::Object(item), Value::Object(needle)) if partial => needle
            .iter()
            .all(|(key, value)| item.get(key).is_some_and(|found| Comparable::from(found) == Comparable::from(value))),
        _ => Comparable::from(item) == Comparable::from(needle),
    }
}

/// Follows property names and array indexes from the document root.
fn resolve<'a>(document: &'a Value, segments: &[Value]) -> Option<&'a Value> {
    segments.iter().try_fold(document, |current, segment| match segment {
        Value::String(name) => current.as_object()?.get(name),
        Value::Number(index) => current.as_array()?.get(usize::try_from(index.as_u64()?).ok()?),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::query::SqlParameter;
    use serde_json::json;

    fn people() -> Vec<Value> {
        vec![
            json!({ "id": "1", "name": "Ada", "age": 36, "tags": ["math"], "address": { "city": "London" } }),
            json!({ "id": "2", "name": "alan", "age": 41, "tags": ["logic", "math"] }),
            json!({ "id": "3", "name": "Grace", "age": 85.0, "tags": [], "address": { "city": "NYC" } }),
        ]
    }

    fn run(query: &str, params: Vec<SqlParameter>) -> ModelResult<Vec<Value>> {
        execute(&QuerySpec::new(query, params), &people())
    }

    fn ids(rows: &[Value]) -> Vec<&str> {
        rows.iter().filter_map(|row| row["id"].as_str()).collect()
    }

    #[test]
    fn filters_with_parameters() {
        let rows = run(
            "SELECT * FROM c WHERE (c.age > @param1) AND (ARRAY_CONTAINS(c.tags, @param2))",
            vec![SqlParameter::new("@param1", 40), SqlParameter::new("@param2", "math")],
        )
        .unwrap();

        assert_eq!(ids(&rows), vec!["2"]);
    }

    #[test]
    fn integers_and_floats_compare_equal() {
        let rows = run("SELECT * FROM c WHERE c.age = @p", vec![SqlParameter::new("@p", 85)]).unwrap();

        assert_eq!(ids(&rows), vec!["3"]);
    }

    #[test]
    fn missing_properties_never_match() {
        let rows = run("SELECT * FROM c WHERE c.address.city != 'London'", vec![]).unwrap();
        assert_eq!(ids(&rows), vec!["3"]);

        let rows = run("SELECT * FROM c WHERE NOT (c.address.city = 'London')", vec![]).unwrap();
        assert_eq!(ids(&rows), vec!["3"]);
    }

    #[test]
    fn case_insensitive_helpers() {
        let rows = run(
            "SELECT * FROM c WHERE CONTAINS(LOWER(c.name), @p) OR LOWER(c.name) = 'grace'",
            vec![SqlParameter::new("@p", "al")],
        )
        .unwrap();

        assert_eq!(ids(&rows), vec!["2", "3"]);
    }

    #[test]
    fn in_and_constant_false() {
        let rows = run("SELECT * FROM c WHERE c.id IN ('1', '3')", vec![]).unwrap();
        assert_eq!(ids(&rows), vec!["1", "3"]);

        assert!(run("SELECT * FROM c WHERE false", vec![]).unwrap().is_empty());
    }

    #[test]
    fn orders_and_pages() {
        let rows = run("SELECT * FROM c ORDER BY c.age DESC OFFSET 1 LIMIT 1", vec![]).unwrap();
        assert_eq!(ids(&rows), vec!["2"]);

        let rows = run("SELECT * FROM c ORDER BY c.address.city ASC", vec![]).unwrap();
        assert_eq!(ids(&rows), vec!["2", "1", "3"]);
    }

    #[test]
    fn projects_aliases_and_values() {
        let rows = run("SELECT c.id AS id, c.address.city AS address_city FROM c WHERE c.id = '1'", vec![]).unwrap();
        assert_eq!(rows, vec![json!({ "id": "1", "address_city": "London" })]);

        let rows = run("SELECT VALUE c.name FROM c ORDER BY c.age ASC", vec![]).unwrap();
        assert_eq!(rows, vec![json!("Ada"), json!("alan"), json!("Grace")]);
    }

    #[test]
    fn counts() {
        assert_eq!(run("SELECT VALUE COUNT(1) FROM c", vec![]).unwrap(), vec![json!(3)]);
        assert_eq!(run("SELECT VALUE COUNT(c.address) FROM c", vec![]).unwrap(), vec![json!(2)]);
        assert_eq!(
            run("SELECT COUNT(1) AS total FROM c WHERE c.age < 50", vec![]).unwrap(),
            vec![json!({ "total": 2 })]
        );
        assert!(run("SELECT * FROM c WHERE COUNT(1) > 1", vec![]).is_err());
    }

    #[test]
    fn rejects_undefined_parameters_and_roots() {
        assert_eq!(
            run("SELECT * FROM c WHERE c.id = @param9", vec![]),
            Err(ModelError::Query("Parameter @param9 is not defined".to_string()))
        );
        assert!(run("SELECT * FROM c WHERE d.id = '1'", vec![]).is_err());
        assert!(execute(&QuerySpec::new("SELECT * FROM c WHERE c.id = @p", vec![]), std::iter::empty::<&Value>()).is_err());
    }
}
