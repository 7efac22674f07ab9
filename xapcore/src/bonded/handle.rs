use std::{fmt, marker::PhantomData, sync::Arc};

use log::trace;
use xapschema::{SchemaRef, protocol::{Reader, Writer}};

use crate::{
    base::runtime::XapRuntime,
    bonded::{Holder, LocalPayload, RemotePayload},
    reflect::{Instance, StructType},
    utils::{
        error::{XapError, XapResult},
        ref_id::ArcRefId,
    },
};

/// Typed handle over exactly one [`Holder`].
///
/// Handles are immutable and cheap to clone; clones share the holder. `T` is the declared
/// type: the held data is a `T` or a type derived from it, or, for remote payloads, data
/// that is expected to decode as one.
pub struct BondedHandle<T> {
    holder: ArcRefId<Holder>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for BondedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            holder: self.holder.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for BondedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BondedHandle").field(&*self.holder).finish()
    }
}

impl<T> PartialEq for BondedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.holder == other.holder
    }
}

impl<T> Eq for BondedHandle<T> {}

impl<T> BondedHandle<T> {
    pub fn from_holder(holder: Arc<Holder>) -> Self {
        Self {
            holder: ArcRefId::new(holder),
            _marker: PhantomData,
        }
    }

    pub fn holder(&self) -> &Arc<Holder> {
        self.holder.borrow_inner()
    }

    /// Returns `true` if both handles wrap the same holder.
    pub fn shares_holder_with<U>(&self, other: &BondedHandle<U>) -> bool {
        Arc::ptr_eq(self.holder(), other.holder())
    }

    pub fn is_local(&self) -> bool {
        self.holder.is_local()
    }

    pub fn is_remote(&self) -> bool {
        self.holder.is_remote()
    }

    /// Encode the held data into `writer`, whatever protocol it was read from.
    pub fn serialize(&self, writer: &mut dyn Writer) -> XapResult<()> {
        self.holder.serialize(XapRuntime::global(), writer)
    }
}

impl<T: StructType> BondedHandle<T> {
    /// Handle over the default value of `T`.
    pub fn empty() -> Self {
        Self::from_holder(Arc::new(Holder::Local(LocalPayload::empty::<T>())))
    }

    /// Handle over `value`, which keeps its exact type `V`.
    pub fn from_local<V: StructType>(value: V) -> XapResult<Self> {
        if !V::static_shape().is_assignable_to(T::static_shape()) {
            return Err(XapError::UnsupportedConversion {
                from: V::static_shape().name().to_string(),
                to: T::static_shape().name().to_string(),
            });
        }
        let payload = LocalPayload::from_value(value)?;
        Ok(Self::from_holder(Arc::new(Holder::Local(payload))))
    }

    /// Handle sharing the object of `instance`.
    pub fn from_instance<V>(instance: &Instance<V>) -> XapResult<Self> {
        let runtime = instance.runtime_shape();
        if !runtime.is_assignable_to(T::static_shape()) {
            return Err(XapError::UnsupportedConversion {
                from: runtime.name().to_string(),
                to: T::static_shape().name().to_string(),
            });
        }
        let payload = LocalPayload::from_object(instance.object().clone());
        Ok(Self::from_holder(Arc::new(Holder::Local(payload))))
    }

    /// Handle over the struct `reader` is positioned on. `reader` is cloned and left as is.
    pub fn from_remote(reader: &dyn Reader, schema: SchemaRef) -> Self {
        let payload = RemotePayload::from_reader(reader, schema);
        Self::from_holder(Arc::new(Holder::Remote(payload)))
    }

    /// Decode or copy the held data into a fresh `U`. Every call returns a new object.
    pub fn deserialize<U: StructType>(&self) -> XapResult<Instance<U>> {
        let runtime = XapRuntime::global();
        runtime.register::<U>()?;
        let object = self.holder.deserialize(runtime, U::static_shape())?;
        Instance::from_object(object)
    }

    /// Same data, retyped as `U`.
    pub fn convert<U: StructType>(&self) -> XapResult<BondedHandle<U>> {
        convert(self)
    }

    /// Object to expose as the value of a wrapper.
    pub(crate) fn project(&self, read_only: bool) -> XapResult<Projection<T>> {
        let runtime = XapRuntime::global();
        runtime.register::<T>()?;
        let (object, owned) = self.holder.project(runtime, T::static_shape(), read_only)?;
        trace!(
            "Projected {} as {} (copy: {}, read-only: {})",
            object.shape().name(),
            T::static_shape().name(),
            owned,
            read_only
        );
        Ok(Projection {
            instance: Instance::from_object(object)?,
            owned,
        })
    }
}

/// Retype `handle` as `U` without materializing anything. The result shares the holder.
///
/// A local holder only converts to a type its object is assignable to. A remote payload
/// converts to any type related to the shape it was written with, or to any type when that
/// shape is unknown.
pub fn convert<T, U: StructType>(handle: &BondedHandle<T>) -> XapResult<BondedHandle<U>> {
    let target = U::static_shape();
    let sound = match &**handle.holder() {
        Holder::Local(local) => local.runtime_shape().is_assignable_to(target),
        Holder::Remote(remote) => remote
            .schema()
            .shape()
            .is_none_or(|shape| shape.is_related_to(target)),
    };

    if !sound {
        let from = handle
            .holder()
            .runtime_shape()
            .map_or("<unknown>", |shape| shape.name());
        return Err(XapError::UnsupportedConversion {
            from: from.to_string(),
            to: target.name().to_string(),
        });
    }
    Ok(BondedHandle::from_holder(handle.holder().clone()))
}

/// Materialized value of a wrapper.
#[derive(Debug, Clone)]
pub struct Projection<T> {
    pub instance: Instance<T>,
    /// `true` if `instance` is a copy made for the wrapper, `false` if it is the object of
    /// the holder itself.
    pub owned: bool,
}
