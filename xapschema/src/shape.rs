//! Shape descriptors
//!
//! A [`Shape`] describes the field layout of one schema type: its name, its optional
//! base shape (single inheritance, the derived type embeds its base) and its fields
//! ordered by id. Shapes are created once, usually inside a `static` lazily initialized
//! value, and referenced as `&'static Shape` from then on.
//!
//! Nested shapes are referenced through a [`ShapeLink`] (a plain function returning the
//! shape) rather than a direct reference. This lets a shape mention itself, or a shape
//! that mentions it back, without requiring either to be initialized first.
use std::{
    fmt,
    hash::{Hash, Hasher},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, FromRepr, IntoStaticStr};

use crate::protocol::WireType;

/// Lazy reference to a shape.
pub type ShapeLink = fn() -> &'static Shape;

/// Scalar field types. Scalars are always copied by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, FromRepr, IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Double,
    String,
    Blob,
}

impl ScalarType {
    /// Wire encoding used for this scalar type.
    pub fn wire(self) -> WireType {
        match self {
            ScalarType::Bool => WireType::Bool,
            ScalarType::Int32 | ScalarType::Int64 => WireType::ZigZag,
            ScalarType::UInt32 | ScalarType::UInt64 => WireType::VarInt,
            ScalarType::Double => WireType::Double,
            ScalarType::String | ScalarType::Blob => WireType::Bytes,
        }
    }
}

/// Type of a single field.
#[derive(Clone, Copy)]
pub enum FieldType {
    /// A scalar, copied by value.
    Scalar(ScalarType),

    /// A nested struct embedded by value. The runtime type of a nested struct is always
    /// the declared one.
    Struct(ShapeLink),

    /// A nested struct that may be absent, stored boxed. Recursive shapes go through
    /// nullable or bonded fields.
    Nullable(ShapeLink),

    /// A nested bonded value of the given declared shape. Its payload is never decoded
    /// while the parent is encoded, decoded or copied.
    Bonded(ShapeLink),
}

impl FieldType {
    /// Wire encoding used for this field type.
    pub fn wire(&self) -> WireType {
        match self {
            FieldType::Scalar(scalar) => scalar.wire(),
            FieldType::Struct(_) | FieldType::Nullable(_) => WireType::Struct,
            FieldType::Bonded(_) => WireType::Bonded,
        }
    }

    /// The nested shape, if this is a struct or bonded field.
    pub fn shape(&self) -> Option<&'static Shape> {
        match self {
            FieldType::Scalar(_) => None,
            FieldType::Struct(link) | FieldType::Nullable(link) | FieldType::Bonded(link) => {
                Some(link())
            }
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldType::Scalar(a), FieldType::Scalar(b)) => a == b,
            (FieldType::Struct(a), FieldType::Struct(b))
            | (FieldType::Nullable(a), FieldType::Nullable(b))
            | (FieldType::Bonded(a), FieldType::Bonded(b)) => a().name() == b().name(),
            _ => false,
        }
    }
}

impl Eq for FieldType {}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(scalar) => write!(f, "{:?}", scalar),
            FieldType::Struct(link) => write!(f, "struct<{}>", link().name()),
            FieldType::Nullable(link) => write!(f, "nullable<{}>", link().name()),
            FieldType::Bonded(link) => write!(f, "bonded<{}>", link().name()),
        }
    }
}

/// Field optionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Modifier {
    #[default]
    Optional,
    Required,
}

/// Description of a single field of a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub id: u16,
    pub name: &'static str,
    pub ty: FieldType,
    pub modifier: Modifier,
}

/// Field-level description of a schema type.
///
/// Two shapes are considered equal when they have the same name. The registry
/// ([`crate::registry::ShapeRegistry`]) rejects two different shapes sharing a name.
pub struct Shape {
    name: &'static str,
    base: Option<ShapeLink>,
    fields: Vec<FieldDef>,
}

impl Shape {
    /// Start describing a new shape named `name`.
    pub fn builder(name: &'static str) -> ShapeBuilder {
        ShapeBuilder {
            name,
            base: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Direct base shape, if any.
    pub fn base(&self) -> Option<&'static Shape> {
        self.base.map(|link| link())
    }

    /// Own fields of this shape (base fields excluded), ordered by id.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Lookup an own field by id.
    pub fn field(&self, id: u16) -> Option<&FieldDef> {
        self.fields
            .binary_search_by_key(&id, |field| field.id)
            .ok()
            .map(|idx| &self.fields[idx])
    }

    /// The inheritance chain of this shape, base first and this shape last.
    pub fn hierarchy(&self) -> Vec<&Shape> {
        let mut chain = vec![self];
        let mut current = self.base();
        while let Some(shape) = current {
            chain.push(shape);
            current = shape.base();
        }
        chain.reverse();
        chain
    }

    /// Number of levels in the inheritance chain (1 for a shape without base).
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.base();
        while let Some(shape) = current {
            depth += 1;
            current = shape.base();
        }
        depth
    }

    /// Returns `true` when a value of this shape can stand for a value of `other`, that
    /// is when `other` is this shape or one of its bases.
    pub fn is_assignable_to(&self, other: &Shape) -> bool {
        if self.name == other.name {
            return true;
        }

        let mut current = self.base();
        while let Some(shape) = current {
            if shape.name == other.name {
                return true;
            }
            current = shape.base();
        }
        false
    }

    /// Returns `true` when either shape is assignable to the other.
    pub fn is_related_to(&self, other: &Shape) -> bool {
        self.is_assignable_to(other) || other.is_assignable_to(self)
    }
}

/// Ordered fields of `shape`, as consumed by codec generation.
pub fn fields_of(shape: &Shape) -> &[FieldDef] {
    shape.fields()
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Shape {}

impl Hash for Shape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("name", &self.name)
            .field("base", &self.base().map(Shape::name))
            .field("fields", &self.fields)
            .finish()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Builder for [`Shape`].
pub struct ShapeBuilder {
    name: &'static str,
    base: Option<ShapeLink>,
    fields: Vec<FieldDef>,
}

impl ShapeBuilder {
    /// Set the base shape.
    pub fn base(mut self, base: ShapeLink) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an optional field.
    pub fn field(self, id: u16, name: &'static str, ty: FieldType) -> Self {
        self.push(id, name, ty, Modifier::Optional)
    }

    /// Add a required field.
    pub fn required(self, id: u16, name: &'static str, ty: FieldType) -> Self {
        self.push(id, name, ty, Modifier::Required)
    }

    fn push(mut self, id: u16, name: &'static str, ty: FieldType, modifier: Modifier) -> Self {
        debug_assert!(
            self.fields.iter().all(|field| field.id != id),
            "Field id {} declared twice in shape `{}`",
            id,
            self.name
        );
        self.fields.push(FieldDef {
            id,
            name,
            ty,
            modifier,
        });
        self
    }

    pub fn build(mut self) -> Shape {
        self.fields.sort_by_key(|field| field.id);
        Shape {
            name: self.name,
            base: self.base,
            fields: self.fields,
        }
    }
}

/// Optional reference to the shape a payload was encoded with.
///
/// [`SchemaRef::EMPTY`] means that no explicit schema was attached, in which case the
/// static shape of the requested type is used instead.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaRef(Option<&'static Shape>);

impl SchemaRef {
    pub const EMPTY: SchemaRef = SchemaRef(None);

    pub fn new(shape: &'static Shape) -> Self {
        Self(Some(shape))
    }

    pub fn has_value(&self) -> bool {
        self.0.is_some()
    }

    pub fn shape(&self) -> Option<&'static Shape> {
        self.0
    }

    /// The attached shape, or `fallback` if the reference is empty.
    pub fn or(&self, fallback: &'static Shape) -> &'static Shape {
        self.0.unwrap_or(fallback)
    }
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(shape) => write!(f, "SchemaRef({})", shape.name()),
            None => f.write_str("SchemaRef(<empty>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;

    use super::*;

    static BASE: Lazy<Shape> = Lazy::new(|| {
        Shape::builder("test.Base")
            .field(1, "name", FieldType::Scalar(ScalarType::String))
            .build()
    });
    static DERIVED: Lazy<Shape> = Lazy::new(|| {
        Shape::builder("test.Derived")
            .base(|| &*BASE)
            .field(3, "z", FieldType::Scalar(ScalarType::Int32))
            .required(2, "y", FieldType::Scalar(ScalarType::Bool))
            .build()
    });
    static LIST: Lazy<Shape> = Lazy::new(|| {
        Shape::builder("test.List")
            .field(0, "next", FieldType::Bonded(|| &*LIST))
            .build()
    });

    #[test]
    fn fields_are_sorted_by_id() {
        let ids: Vec<u16> = fields_of(&DERIVED).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(DERIVED.field(2).is_some_and(|f| f.modifier.is_required()));
        assert!(DERIVED.field(1).is_none(), "base fields are not own fields");
    }

    #[test]
    fn hierarchy_is_base_first() {
        let names: Vec<&str> = DERIVED.hierarchy().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["test.Base", "test.Derived"]);
        assert_eq!(DERIVED.depth(), 2);
        assert_eq!(BASE.depth(), 1);
    }

    #[test]
    fn assignability_follows_the_base_chain() {
        assert!(DERIVED.is_assignable_to(&BASE));
        assert!(!BASE.is_assignable_to(&DERIVED));
        assert!(BASE.is_related_to(&DERIVED));
        assert!(!LIST.is_related_to(&BASE));
    }

    #[test]
    fn self_referencing_shape_resolves_lazily() {
        let next = LIST.field(0).and_then(|f| f.ty.shape());
        assert_eq!(next.map(Shape::name), Some("test.List"));
        assert_eq!(format!("{:?}", LIST.field(0).map(|f| f.ty)), "Some(bonded<test.List>)");
    }

    #[test]
    fn schema_ref_falls_back_when_empty() {
        assert!(!SchemaRef::EMPTY.has_value());
        assert_eq!(SchemaRef::EMPTY.or(&BASE).name(), "test.Base");
        assert_eq!(SchemaRef::new(&DERIVED).or(&BASE).name(), "test.Derived");
    }
}
