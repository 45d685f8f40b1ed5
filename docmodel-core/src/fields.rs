//! Addressable field descriptors derived from a schema's shape.
//!
//! A [`FieldMap`] mirrors the nested structure of a document and hands out a
//! [`Field`] for every leaf and intermediate field, so callers never hardcode
//! path strings:
//!
//! ```ignore
//! let city = model.fields().get("address.city").unwrap();
//! let filter = qb().eq(city, "Lisbon");
//! ```

use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

/// The field tree of a document type.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// An object with named, ordered fields.
    Object(Vec<(String, Shape)>),
    /// Any non-object value (scalars, arrays, free-form maps).
    Value,
}

/// Types that can describe their own [`Shape`].
///
/// Implemented for common scalar and container types; structs usually get it
/// from `#[derive(Shape)]`.
pub trait HasShape {
    fn shape() -> Shape;
}

macro_rules! value_shape {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasShape for $ty {
                fn shape() -> Shape {
                    Shape::Value
                }
            }
        )*
    };
}

value_shape!(
    bool, char, String, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32,
    f64, Value,
);

impl HasShape for &str {
    fn shape() -> Shape {
        Shape::Value
    }
}

impl<T: HasShape> HasShape for Option<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T: HasShape> HasShape for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T> HasShape for Vec<T> {
    fn shape() -> Shape {
        Shape::Value
    }
}

impl<K, V> HasShape for HashMap<K, V> {
    fn shape() -> Shape {
        Shape::Value
    }
}

impl<K, V> HasShape for BTreeMap<K, V> {
    fn shape() -> Shape {
        Shape::Value
    }
}

/// An addressable field: a dot-joined path such as `address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The dot-joined path of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split('.')
    }

    /// The projection alias used when this field is selected: the path with dots
    /// replaced by underscores.
    pub fn alias(&self) -> String {
        self.name.replace('.', "_")
    }

    /// Returns the descriptor of a nested field.
    pub fn child(&self, name: &str) -> Field {
        Field::new(format!("{}.{}", self.name, name))
    }
}

impl AsRef<str> for Field {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::new(name)
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Field::new(name)
    }
}

impl From<&Field> for Field {
    fn from(field: &Field) -> Self {
        field.clone()
    }
}

/// One entry of a [`FieldMap`] together with its nested fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    field: Field,
    children: Vec<FieldNode>,
}

impl FieldNode {
    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn children(&self) -> &[FieldNode] {
        &self.children
    }

    /// Looks up a direct child by its own (unqualified) name.
    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        let path = self.field.child(name);
        self.children.iter().find(|node| node.field == path)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Field descriptors for every (possibly nested) field of a shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap {
    roots: Vec<FieldNode>,
}

impl FieldMap {
    pub fn from_shape(shape: &Shape) -> Self {
        match shape {
            Shape::Object(fields) => Self { roots: build_nodes(None, fields) },
            Shape::Value => Self::default(),
        }
    }

    /// Returns the descriptor for a dot-joined path.
    pub fn get(&self, path: &str) -> Option<&Field> {
        self.node(path).map(FieldNode::field)
    }

    /// Returns the node for a dot-joined path, giving access to its children.
    pub fn node(&self, path: &str) -> Option<&FieldNode> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.roots.iter().find(|node| node.field.name() == first)?;

        for segment in segments {
            node = node.child(segment)?;
        }

        Some(node)
    }

    /// Top-level fields, in declaration order.
    pub fn roots(&self) -> &[FieldNode] {
        &self.roots
    }

    /// Every descriptor, depth first, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        let mut stack = self.roots.iter().rev().collect::<Vec<_>>();

        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(&node.field)
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn build_nodes(parent: Option<&Field>, fields: &[(String, Shape)]) -> Vec<FieldNode> {
    fields
        .iter()
        .map(|(name, shape)| {
            let field = match parent {
                Some(parent) => parent.child(name),
                None => Field::new(name.as_str()),
            };
            let children = match shape {
                Shape::Object(nested) => build_nodes(Some(&field), nested),
                Shape::Value => Vec::new(),
            };

            FieldNode { field, children }
        })
        .collect()
}
