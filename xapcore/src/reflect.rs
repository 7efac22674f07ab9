//! Reflection over schema types
//!
//! Generated codecs never know the Rust type they run against. They reach fields through
//! the [`Struct`] trait, by id, one inheritance level at a time. A derived type embeds its
//! base and exposes it through [`Struct::base`]; [`view`] uses that chain to look at a
//! derived object as any of its bases.
//!
//! Shared, possibly polymorphic objects are handled through [`ObjectRef`] (type erased)
//! and [`Instance`] (typed view of an object whose runtime type is assignable to `T`).
use std::{fmt, marker::PhantomData, sync::Arc};

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use xapschema::{Shape, ShapeLink};

use crate::{
    bonded::BondedField,
    utils::error::{XapError, XapResult},
};

/// Read access to a single field.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Double(f64),
    String(&'a str),
    Blob(&'a [u8]),
    Struct(&'a dyn Struct),
    Nullable(Option<&'a dyn Struct>),
    Bonded(&'a dyn BondedField),
}

/// Write access to a single field.
#[derive(Debug)]
pub enum FieldMut<'a> {
    Bool(&'a mut bool),
    Int32(&'a mut i32),
    Int64(&'a mut i64),
    UInt32(&'a mut u32),
    UInt64(&'a mut u64),
    Double(&'a mut f64),
    String(&'a mut String),
    Blob(&'a mut Vec<u8>),
    Struct(&'a mut dyn Struct),
    Nullable(&'a mut dyn NullableField),
    Bonded(&'a mut dyn BondedField),
}

/// A value described by a [`Shape`].
///
/// `field` and `field_mut` only expose the *own* fields of the runtime type; fields of the
/// base are reached through [`Struct::base`] and [`Struct::base_mut`].
///
/// Types whose values may be exposed read-only override [`Struct::set_read_only`] and
/// forward the call to their nested structs, bonded fields and base. The default does
/// nothing: a decoded value of a type without an override stays writable.
pub trait Struct: DowncastSync + fmt::Debug {
    /// Exact runtime shape of this value.
    fn shape(&self) -> &'static Shape;

    fn field(&self, id: u16) -> Option<FieldRef<'_>>;

    fn field_mut(&mut self, id: u16) -> Option<FieldMut<'_>>;

    fn base(&self) -> Option<&dyn Struct> {
        None
    }

    fn base_mut(&mut self) -> Option<&mut dyn Struct> {
        None
    }

    fn set_read_only(&mut self) {}

    fn is_read_only(&self) -> bool {
        false
    }
}
impl_downcast!(sync Struct);

/// A [`Struct`] with a static shape and a default value.
pub trait StructType: Struct + Default + Sized {
    fn static_shape() -> &'static Shape;
}

/// A nullable nested struct, stored as `Option<Box<T>>`.
pub trait NullableField: Send + Sync + fmt::Debug {
    fn get(&self) -> Option<&dyn Struct>;

    fn get_or_insert_default(&mut self) -> &mut dyn Struct;

    fn clear(&mut self);
}

impl<T: StructType> NullableField for Option<Box<T>> {
    fn get(&self) -> Option<&dyn Struct> {
        self.as_deref().map(|value| value as &dyn Struct)
    }

    fn get_or_insert_default(&mut self) -> &mut dyn Struct {
        &mut **self.get_or_insert_with(Default::default)
    }

    fn clear(&mut self) {
        *self = None;
    }
}

/// Look at `current` as a `T`, walking down its base chain if needed.
pub fn view<T: Struct>(mut current: &dyn Struct) -> Option<&T> {
    loop {
        if let Some(found) = current.downcast_ref::<T>() {
            return Some(found);
        }
        current = current.base()?;
    }
}

/// Mutable counterpart of [`view`].
pub fn view_mut<T: Struct>(current: &mut dyn Struct) -> Option<&mut T> {
    if current.is::<T>() {
        return current.downcast_mut::<T>();
    }
    view_mut::<T>(current.base_mut()?)
}

/// The part of `current` found `hops` levels down its base chain.
pub fn level(mut current: &dyn Struct, hops: usize) -> Option<&dyn Struct> {
    for _ in 0..hops {
        current = current.base()?;
    }
    Some(current)
}

/// Mutable counterpart of [`level`].
pub fn level_mut(current: &mut dyn Struct, hops: usize) -> Option<&mut dyn Struct> {
    if hops == 0 {
        return Some(current);
    }
    level_mut(current.base_mut()?, hops - 1)
}

/// Constructor entry of the type factory table.
///
/// Types are entered in the table the first time the runtime meets them by value, or
/// ahead of time with [`crate::register_struct`], which submits an entry to the
/// [`inventory`] collected by every runtime.
#[derive(Clone, Copy)]
pub struct StructFactory {
    pub shape: ShapeLink,
    pub make: fn() -> Box<dyn Struct>,
}

fn make_default<T: StructType>() -> Box<dyn Struct> {
    Box::new(T::default())
}

impl StructFactory {
    pub const fn of<T: StructType>() -> Self {
        Self {
            shape: T::static_shape,
            make: make_default::<T>,
        }
    }
}

impl fmt::Debug for StructFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructFactory({})", (self.shape)().name())
    }
}

inventory::collect!(StructFactory);

/// Register a [`StructType`] in the type factory table of every runtime.
///
/// Registration is required for payloads of a derived type to be decoded as that derived
/// type when they are read through a base type that was never given a value of it.
#[macro_export]
macro_rules! register_struct {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::reflect::StructFactory::of::<$ty>()
        }
    };
}

/// Shared, type-erased object.
///
/// Cloning an `ObjectRef` shares the object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Box<dyn Struct>>>);

impl ObjectRef {
    pub fn new(value: Box<dyn Struct>) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Shared access. Recursive so that an object reachable twice from one walk can be
    /// read twice.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Struct>> {
        self.0.read_recursive()
    }

    /// Exclusive access, bypassing the read-only flag. Reserved to the runtime.
    pub(crate) fn write_unchecked(&self) -> RwLockWriteGuard<'_, Box<dyn Struct>> {
        self.0.write()
    }

    pub fn shape(&self) -> &'static Shape {
        self.read().shape()
    }

    pub fn is_read_only(&self) -> bool {
        self.read().is_read_only()
    }

    /// Mark the object, and everything it propagates to, read-only.
    pub fn set_read_only(&self) {
        self.write_unchecked().set_read_only();
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read_recursive() {
            Some(guard) => f.debug_tuple("ObjectRef").field(&**guard).finish(),
            None => f.write_str("ObjectRef(<locked>)"),
        }
    }
}

/// Shared object whose runtime type is assignable to `T`.
///
/// [`Instance::read`] gives a `T` view of the object, even when its runtime type derives
/// from `T`. [`Instance::write`] fails with [`XapError::ReadOnly`] once the object was
/// marked read-only.
pub struct Instance<T> {
    object: ObjectRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Instance<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.object).finish()
    }
}

impl<T: StructType> Instance<T> {
    pub fn new(value: T) -> Self {
        Self {
            object: ObjectRef::new(Box::new(value)),
            _marker: PhantomData,
        }
    }

    /// Wrap `object`, checking that its runtime type is assignable to `T`.
    pub fn from_object(object: ObjectRef) -> XapResult<Self> {
        let shape = object.shape();
        if !shape.is_assignable_to(T::static_shape()) {
            return Err(XapError::UnsupportedConversion {
                from: shape.name().to_string(),
                to: T::static_shape().name().to_string(),
            });
        }
        Ok(Self {
            object,
            _marker: PhantomData,
        })
    }

    pub fn from_boxed(value: Box<dyn Struct>) -> XapResult<Self> {
        Self::from_object(ObjectRef::new(value))
    }

    pub fn read(&self) -> XapResult<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.object.read(), |value| view::<T>(&**value)).map_err(
            |guard| XapError::UnsupportedConversion {
                from: guard.shape().name().to_string(),
                to: T::static_shape().name().to_string(),
            },
        )
    }

    pub fn write(&self) -> XapResult<MappedRwLockWriteGuard<'_, T>> {
        let guard = self.object.write_unchecked();
        if guard.is_read_only() {
            return Err(XapError::ReadOnly);
        }
        RwLockWriteGuard::try_map(guard, |value| view_mut::<T>(&mut **value)).map_err(|guard| {
            XapError::UnsupportedConversion {
                from: guard.shape().name().to_string(),
                to: T::static_shape().name().to_string(),
            }
        })
    }

    /// View the same object as another type it is assignable to.
    pub fn cast<U: StructType>(&self) -> XapResult<Instance<U>> {
        Instance::from_object(self.object.clone())
    }
}

impl<T> Instance<T> {
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn runtime_shape(&self) -> &'static Shape {
        self.object.shape()
    }

    pub fn is_read_only(&self) -> bool {
        self.object.is_read_only()
    }

    /// Returns `true` if both instances share the same object.
    pub fn same_object<U>(&self, other: &Instance<U>) -> bool {
        self.object.ptr_eq(&other.object)
    }
}
