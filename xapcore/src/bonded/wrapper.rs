use std::{fmt, sync::Arc};

use xapschema::{
    SchemaRef, Shape,
    protocol::{Reader, Writer},
};

use crate::{
    bonded::{BondedField, BondedHandle, Holder, Projection},
    reflect::{Instance, StructType},
    utils::{
        error::{XapError, XapResult},
        lazy::LazyContainer,
    },
};

/// A bonded field of declared type `T`.
///
/// The value is materialized on first access to [`Bonded::value`] and memoized until the
/// holder is replaced. Once [`Bonded::set_read_only`] was called the wrapper stays
/// read-only: every assignment fails and the exposed value is a read-only copy, never the
/// object a local holder was built from.
///
/// Reading is safe from any number of threads. Assignment and [`Bonded::set_read_only`]
/// take `&mut self`; sharing one wrapper between concurrent writers requires external
/// synchronization.
pub struct Bonded<T> {
    handle: BondedHandle<T>,
    read_only: bool,
    memo: LazyContainer<Projection<T>>,
}

impl<T: StructType> Default for Bonded<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for Bonded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bonded")
            .field("holder", &**self.handle.holder())
            .field("read_only", &self.read_only)
            .field("materialized", &self.memo.is_clean())
            .finish()
    }
}

impl<T> Bonded<T> {
    pub fn from_handle(handle: BondedHandle<T>) -> Self {
        Self {
            handle,
            read_only: false,
            memo: LazyContainer::new(),
        }
    }

    pub fn handle(&self) -> &BondedHandle<T> {
        &self.handle
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns `true` if the value was materialized since the holder was last replaced.
    pub fn is_materialized(&self) -> bool {
        self.memo.is_clean()
    }

    pub fn is_local(&self) -> bool {
        self.handle.is_local()
    }

    pub fn is_remote(&self) -> bool {
        self.handle.is_remote()
    }

    pub fn shares_holder_with<U>(&self, other: &Bonded<U>) -> bool {
        self.handle.shares_holder_with(&other.handle)
    }

    pub fn serialize(&self, writer: &mut dyn Writer) -> XapResult<()> {
        self.handle.serialize(writer)
    }

    fn replace_handle(&mut self, handle: BondedHandle<T>) -> XapResult<()> {
        if self.read_only {
            return Err(XapError::ReadOnly);
        }
        let mut slot = self.memo.dirtify(&mut self.handle);
        *slot = handle;
        Ok(())
    }
}

impl<T: StructType> Bonded<T> {
    /// Wrapper over the default value of `T`.
    pub fn empty() -> Self {
        Self::from_handle(BondedHandle::empty())
    }

    pub fn from_local<V: StructType>(value: V) -> XapResult<Self> {
        BondedHandle::from_local(value).map(Self::from_handle)
    }

    /// Wrapper sharing the object of `instance`.
    pub fn from_instance<V>(instance: &Instance<V>) -> XapResult<Self> {
        BondedHandle::from_instance(instance).map(Self::from_handle)
    }

    pub fn from_remote(reader: &dyn Reader, schema: SchemaRef) -> Self {
        Self::from_handle(BondedHandle::from_remote(reader, schema))
    }

    /// The value, materialized on first call.
    pub fn value(&self) -> XapResult<Instance<T>> {
        let projection = self
            .memo
            .try_get(|_| self.handle.project(self.read_only))?;
        Ok(projection.instance.clone())
    }

    /// Replace the value with `value`.
    pub fn set_value<V: StructType>(&mut self, value: V) -> XapResult<()> {
        if self.read_only {
            return Err(XapError::ReadOnly);
        }
        let handle = BondedHandle::from_local(value)?;
        self.replace_handle(handle)
    }

    /// Replace the value with the object of `instance`, shared.
    pub fn set_instance<V>(&mut self, instance: &Instance<V>) -> XapResult<()> {
        if self.read_only {
            return Err(XapError::ReadOnly);
        }
        let handle = BondedHandle::from_instance(instance)?;
        self.replace_handle(handle)
    }

    /// Make the wrapper read-only. Idempotent.
    ///
    /// A value already materialized as a copy is marked read-only in place, recursively. A
    /// value exposed as is is dropped; the next access takes a read-only copy.
    pub fn set_read_only(&mut self) {
        if self.read_only {
            return;
        }
        self.read_only = true;

        match self.memo.get_mut() {
            Some(projection) if projection.owned => projection.instance.object().set_read_only(),
            Some(_) => self.memo.reset(),
            None => {}
        }
    }

    /// Decode or copy the data into a fresh `U`.
    pub fn deserialize<U: StructType>(&self) -> XapResult<Instance<U>> {
        self.handle.deserialize()
    }

    pub fn convert<U: StructType>(&self) -> XapResult<BondedHandle<U>> {
        self.handle.convert()
    }

    pub fn cast<TR: StructType>(&self) -> XapResult<Bonded<TR>> {
        cast(self)
    }
}

/// A wrapper of declared type `TR` over the holder of `from`.
///
/// Nothing is copied or decoded: the new wrapper shares the holder and starts with an empty
/// memo. It takes the read-only flag `from` has at the time of the call.
pub fn cast<T, TR: StructType>(from: &Bonded<T>) -> XapResult<Bonded<TR>> {
    let target = TR::static_shape();
    if let Some(runtime) = from.handle.holder().runtime_shape() {
        if !runtime.is_related_to(target) {
            return Err(XapError::UnsupportedConversion {
                from: runtime.name().to_string(),
                to: target.name().to_string(),
            });
        }
    }

    Ok(Bonded {
        handle: BondedHandle::from_holder(from.handle.holder().clone()),
        read_only: from.read_only,
        memo: LazyContainer::new(),
    })
}

impl<T: StructType> BondedField for Bonded<T> {
    fn declared_shape(&self) -> &'static Shape {
        T::static_shape()
    }

    fn holder(&self) -> &Arc<Holder> {
        self.handle.holder()
    }

    fn replace_holder(&mut self, holder: Arc<Holder>) -> XapResult<()> {
        self.replace_handle(BondedHandle::from_holder(holder))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self) {
        Bonded::set_read_only(self)
    }
}
