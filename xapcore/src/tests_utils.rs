//! Schema types shared by the unit tests, integration tests and benches.
//!
//! - [`B`] and [`C`]: a base and a derived type.
//! - [`A`]: holds a bonded [`B`].
//! - [`Tree`]: self-recursive through nullable fields.
//! - [`Even`] and [`Odd`]: mutually recursive.
//! - [`Mixed`]: every scalar type and a nested [`Point`].
//! - [`Strict`] and [`Loose`]: `Strict` requires a field `Loose` does not have.
use once_cell::sync::Lazy;
use xapschema::{FieldType, ScalarType, Shape};

use crate::{
    bonded::{Bonded, BondedField},
    reflect::{FieldMut, FieldRef, Struct, StructType},
    register_struct,
};

const fn scalar(ty: ScalarType) -> FieldType {
    FieldType::Scalar(ty)
}

/// Read-only mark of a fixture. Not part of the value: marks never affect equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnlyMark(bool);

impl ReadOnlyMark {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn get(&self) -> bool {
        self.0
    }
}

impl PartialEq for ReadOnlyMark {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

static SHAPE_B: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.B")
        .field(0, "name", scalar(ScalarType::String))
        .field(1, "x", scalar(ScalarType::Int32))
        .build()
});

#[derive(Debug, Default)]
pub struct B {
    pub name: String,
    pub x: i32,
    read_only: bool,
}

impl B {
    pub fn new(name: &str, x: i32) -> Self {
        Self {
            name: name.to_string(),
            x,
            read_only: false,
        }
    }
}

impl Struct for B {
    fn shape(&self) -> &'static Shape {
        &SHAPE_B
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::String(&self.name)),
            1 => Some(FieldRef::Int32(self.x)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::String(&mut self.name)),
            1 => Some(FieldMut::Int32(&mut self.x)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only = true;
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl StructType for B {
    fn static_shape() -> &'static Shape {
        &SHAPE_B
    }
}

static SHAPE_C: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.C")
        .base(B::static_shape)
        .field(0, "c", scalar(ScalarType::Int32))
        .build()
});

#[derive(Debug, Default)]
pub struct C {
    pub base: B,
    pub c: i32,
}

impl C {
    pub fn new(name: &str, x: i32, c: i32) -> Self {
        Self {
            base: B::new(name, x),
            c,
        }
    }
}

impl Struct for C {
    fn shape(&self) -> &'static Shape {
        &SHAPE_C
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::Int32(self.c)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::Int32(&mut self.c)),
            _ => None,
        }
    }

    fn base(&self) -> Option<&dyn Struct> {
        Some(&self.base)
    }

    fn base_mut(&mut self) -> Option<&mut dyn Struct> {
        Some(&mut self.base)
    }

    fn set_read_only(&mut self) {
        self.base.set_read_only();
    }

    fn is_read_only(&self) -> bool {
        self.base.is_read_only()
    }
}

impl StructType for C {
    fn static_shape() -> &'static Shape {
        &SHAPE_C
    }
}

static SHAPE_A: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.A")
        .field(0, "b", FieldType::Bonded(B::static_shape))
        .field(1, "label", scalar(ScalarType::String))
        .build()
});

#[derive(Debug, Default)]
pub struct A {
    pub b: Bonded<B>,
    pub label: String,
    read_only: bool,
}

impl A {
    pub fn new(label: &str, b: Bonded<B>) -> Self {
        Self {
            b,
            label: label.to_string(),
            read_only: false,
        }
    }
}

impl Struct for A {
    fn shape(&self) -> &'static Shape {
        &SHAPE_A
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::Bonded(&self.b)),
            1 => Some(FieldRef::String(&self.label)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::Bonded(&mut self.b)),
            1 => Some(FieldMut::String(&mut self.label)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only = true;
        BondedField::set_read_only(&mut self.b);
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl StructType for A {
    fn static_shape() -> &'static Shape {
        &SHAPE_A
    }
}

static SHAPE_TREE: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Tree")
        .field(0, "value", scalar(ScalarType::Int64))
        .field(1, "left", FieldType::Nullable(Tree::static_shape))
        .field(2, "right", FieldType::Nullable(Tree::static_shape))
        .build()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Tree {
    pub value: i64,
    pub left: Option<Box<Tree>>,
    pub right: Option<Box<Tree>>,
    read_only: ReadOnlyMark,
}

impl Tree {
    pub fn leaf(value: i64) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn node(value: i64, left: Option<Tree>, right: Option<Tree>) -> Self {
        Self {
            value,
            left: left.map(Box::new),
            right: right.map(Box::new),
            read_only: ReadOnlyMark::default(),
        }
    }

    /// Complete tree of the given depth, values numbered in prefix order from `first`.
    pub fn complete(depth: usize, first: i64) -> Self {
        if depth <= 1 {
            return Self::leaf(first);
        }
        let left = Self::complete(depth - 1, first + 1);
        let right = Self::complete(depth - 1, first + 1 + left.len() as i64);
        Self::node(first, Some(left), Some(right))
    }

    pub fn len(&self) -> usize {
        1 + self.left.as_ref().map_or(0, |t| t.len()) + self.right.as_ref().map_or(0, |t| t.len())
    }

    pub fn sum(&self) -> i64 {
        self.value
            + self.left.as_ref().map_or(0, |t| t.sum())
            + self.right.as_ref().map_or(0, |t| t.sum())
    }
}

impl Struct for Tree {
    fn shape(&self) -> &'static Shape {
        &SHAPE_TREE
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::Int64(self.value)),
            1 => Some(FieldRef::Nullable(self.left.as_deref().map(|t| t as &dyn Struct))),
            2 => Some(FieldRef::Nullable(self.right.as_deref().map(|t| t as &dyn Struct))),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::Int64(&mut self.value)),
            1 => Some(FieldMut::Nullable(&mut self.left)),
            2 => Some(FieldMut::Nullable(&mut self.right)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
        for child in [&mut self.left, &mut self.right].into_iter().flatten() {
            child.set_read_only();
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Tree {
    fn static_shape() -> &'static Shape {
        &SHAPE_TREE
    }
}

static SHAPE_EVEN: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Even")
        .field(0, "value", scalar(ScalarType::UInt32))
        .field(1, "next", FieldType::Nullable(Odd::static_shape))
        .build()
});

static SHAPE_ODD: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Odd")
        .field(0, "value", scalar(ScalarType::UInt32))
        .field(1, "next", FieldType::Nullable(Even::static_shape))
        .build()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Even {
    pub value: u32,
    pub next: Option<Box<Odd>>,
    read_only: ReadOnlyMark,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Odd {
    pub value: u32,
    pub next: Option<Box<Even>>,
    read_only: ReadOnlyMark,
}

impl Even {
    /// Chain `0 -> 1 -> ... -> len - 1`, alternating between even and odd links.
    pub fn chain(len: u32) -> Self {
        fn even(value: u32, len: u32) -> Even {
            Even {
                value,
                next: (value + 1 < len).then(|| Box::new(odd(value + 1, len))),
                read_only: ReadOnlyMark::default(),
            }
        }
        fn odd(value: u32, len: u32) -> Odd {
            Odd {
                value,
                next: (value + 1 < len).then(|| Box::new(even(value + 1, len))),
                read_only: ReadOnlyMark::default(),
            }
        }
        even(0, len)
    }
}

impl Struct for Even {
    fn shape(&self) -> &'static Shape {
        &SHAPE_EVEN
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::UInt32(self.value)),
            1 => Some(FieldRef::Nullable(self.next.as_deref().map(|t| t as &dyn Struct))),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::UInt32(&mut self.value)),
            1 => Some(FieldMut::Nullable(&mut self.next)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
        if let Some(next) = &mut self.next {
            next.set_read_only();
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Even {
    fn static_shape() -> &'static Shape {
        &SHAPE_EVEN
    }
}

impl Struct for Odd {
    fn shape(&self) -> &'static Shape {
        &SHAPE_ODD
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::UInt32(self.value)),
            1 => Some(FieldRef::Nullable(self.next.as_deref().map(|t| t as &dyn Struct))),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::UInt32(&mut self.value)),
            1 => Some(FieldMut::Nullable(&mut self.next)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
        if let Some(next) = &mut self.next {
            next.set_read_only();
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Odd {
    fn static_shape() -> &'static Shape {
        &SHAPE_ODD
    }
}

static SHAPE_POINT: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Point")
        .field(0, "x", scalar(ScalarType::Double))
        .field(1, "y", scalar(ScalarType::Double))
        .build()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    read_only: ReadOnlyMark,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            read_only: ReadOnlyMark::default(),
        }
    }
}

impl Struct for Point {
    fn shape(&self) -> &'static Shape {
        &SHAPE_POINT
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::Double(self.x)),
            1 => Some(FieldRef::Double(self.y)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::Double(&mut self.x)),
            1 => Some(FieldMut::Double(&mut self.y)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Point {
    fn static_shape() -> &'static Shape {
        &SHAPE_POINT
    }
}

static SHAPE_MIXED: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Mixed")
        .field(0, "flag", scalar(ScalarType::Bool))
        .field(1, "small", scalar(ScalarType::Int32))
        .field(2, "big", scalar(ScalarType::Int64))
        .field(3, "count", scalar(ScalarType::UInt32))
        .field(4, "total", scalar(ScalarType::UInt64))
        .field(5, "ratio", scalar(ScalarType::Double))
        .field(6, "text", scalar(ScalarType::String))
        .field(7, "data", scalar(ScalarType::Blob))
        .field(8, "origin", FieldType::Struct(Point::static_shape))
        .build()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Mixed {
    pub flag: bool,
    pub small: i32,
    pub big: i64,
    pub count: u32,
    pub total: u64,
    pub ratio: f64,
    pub text: String,
    pub data: Vec<u8>,
    pub origin: Point,
    read_only: ReadOnlyMark,
}

impl Mixed {
    pub fn sample() -> Self {
        Self {
            flag: true,
            small: -42,
            big: i64::MIN + 1,
            count: u32::MAX,
            total: 1 << 40,
            ratio: 0.125,
            text: "bonded".to_string(),
            data: vec![0, 1, 2, 0xff],
            origin: Point::new(1.5, -2.5),
            read_only: ReadOnlyMark::default(),
        }
    }
}

impl Struct for Mixed {
    fn shape(&self) -> &'static Shape {
        &SHAPE_MIXED
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::Bool(self.flag)),
            1 => Some(FieldRef::Int32(self.small)),
            2 => Some(FieldRef::Int64(self.big)),
            3 => Some(FieldRef::UInt32(self.count)),
            4 => Some(FieldRef::UInt64(self.total)),
            5 => Some(FieldRef::Double(self.ratio)),
            6 => Some(FieldRef::String(&self.text)),
            7 => Some(FieldRef::Blob(&self.data)),
            8 => Some(FieldRef::Struct(&self.origin)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::Bool(&mut self.flag)),
            1 => Some(FieldMut::Int32(&mut self.small)),
            2 => Some(FieldMut::Int64(&mut self.big)),
            3 => Some(FieldMut::UInt32(&mut self.count)),
            4 => Some(FieldMut::UInt64(&mut self.total)),
            5 => Some(FieldMut::Double(&mut self.ratio)),
            6 => Some(FieldMut::String(&mut self.text)),
            7 => Some(FieldMut::Blob(&mut self.data)),
            8 => Some(FieldMut::Struct(&mut self.origin)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
        self.origin.set_read_only();
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Mixed {
    fn static_shape() -> &'static Shape {
        &SHAPE_MIXED
    }
}

static SHAPE_STRICT: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Strict")
        .required(0, "id", scalar(ScalarType::UInt64))
        .field(1, "note", scalar(ScalarType::String))
        .build()
});

static SHAPE_LOOSE: Lazy<Shape> = Lazy::new(|| {
    Shape::builder("Xap.Loose")
        .field(1, "note", scalar(ScalarType::String))
        .build()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Strict {
    pub id: u64,
    pub note: String,
    read_only: ReadOnlyMark,
}

impl Strict {
    pub fn new(id: u64, note: &str) -> Self {
        Self {
            id,
            note: note.to_string(),
            read_only: ReadOnlyMark::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Loose {
    pub note: String,
    read_only: ReadOnlyMark,
}

impl Struct for Strict {
    fn shape(&self) -> &'static Shape {
        &SHAPE_STRICT
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            0 => Some(FieldRef::UInt64(self.id)),
            1 => Some(FieldRef::String(&self.note)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            0 => Some(FieldMut::UInt64(&mut self.id)),
            1 => Some(FieldMut::String(&mut self.note)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Strict {
    fn static_shape() -> &'static Shape {
        &SHAPE_STRICT
    }
}

impl Struct for Loose {
    fn shape(&self) -> &'static Shape {
        &SHAPE_LOOSE
    }

    fn field(&self, id: u16) -> Option<FieldRef<'_>> {
        match id {
            1 => Some(FieldRef::String(&self.note)),
            _ => None,
        }
    }

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>> {
        match id {
            1 => Some(FieldMut::String(&mut self.note)),
            _ => None,
        }
    }

    fn set_read_only(&mut self) {
        self.read_only.set();
    }

    fn is_read_only(&self) -> bool {
        self.read_only.get()
    }
}

impl StructType for Loose {
    fn static_shape() -> &'static Shape {
        &SHAPE_LOOSE
    }
}

register_struct!(A);
register_struct!(B);
register_struct!(C);
register_struct!(Tree);
register_struct!(Even);
register_struct!(Odd);
register_struct!(Point);
register_struct!(Mixed);
register_struct!(Strict);
register_struct!(Loose);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_shapes_are_consistent() {
        assert!(C::static_shape().is_assignable_to(B::static_shape()));
        assert!(!B::static_shape().is_assignable_to(C::static_shape()));
        assert_eq!(C::static_shape().depth(), 2);

        let tree = Tree::complete(3, 0);
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.sum(), (0..7).sum());

        let chain = Even::chain(3);
        assert_eq!(chain.next.as_ref().map(|odd| odd.value), Some(1));
    }
}
