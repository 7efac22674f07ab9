use std::fmt;

use strum::EnumIs;
use xapschema::{
    SchemaRef, Shape,
    protocol::{Reader, Writer, transcode},
};

use crate::{
    base::runtime::XapRuntime,
    reflect::{ObjectRef, Struct, StructType},
    utils::error::{XapError, XapResult},
};

/// A live object together with its exact runtime shape.
#[derive(Clone)]
pub struct LocalPayload {
    instance: ObjectRef,
    runtime: &'static Shape,
}

impl LocalPayload {
    /// Capture `value`. The runtime type of `value` is entered in the global type table so
    /// that copies of it keep its exact type.
    pub fn from_value<V: StructType>(value: V) -> XapResult<Self> {
        XapRuntime::global().register::<V>()?;
        Ok(Self::from_object(ObjectRef::new(Box::new(value))))
    }

    pub fn from_boxed(value: Option<Box<dyn Struct>>) -> XapResult<Self> {
        let value = value.ok_or_else(|| XapError::NullValue {
            context: "a local payload".to_string(),
        })?;
        Ok(Self::from_object(ObjectRef::new(value)))
    }

    /// Share an existing object.
    pub fn from_object(instance: ObjectRef) -> Self {
        let runtime = instance.shape();
        Self { instance, runtime }
    }

    /// Default value of `T`.
    pub fn empty<T: StructType>() -> Self {
        Self {
            instance: ObjectRef::new(Box::new(T::default())),
            runtime: T::static_shape(),
        }
    }

    pub fn instance(&self) -> &ObjectRef {
        &self.instance
    }

    pub fn runtime_shape(&self) -> &'static Shape {
        self.runtime
    }
}

impl fmt::Debug for LocalPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPayload")
            .field("runtime", &self.runtime.name())
            .field("instance", &self.instance)
            .finish()
    }
}

/// An undecoded payload: a private cursor positioned on the encoded struct, and the schema
/// it was written with when known.
#[derive(Debug, Clone)]
pub struct RemotePayload {
    reader: Box<dyn Reader>,
    schema: SchemaRef,
}

impl RemotePayload {
    /// Take ownership of `reader`, which must be private to this payload.
    pub fn new(reader: Box<dyn Reader>, schema: SchemaRef) -> Self {
        Self { reader, schema }
    }

    /// Keep a clone of `reader`. The caller's cursor is left untouched and can keep reading.
    pub fn from_reader(reader: &dyn Reader, schema: SchemaRef) -> Self {
        Self::new(reader.clone_boxed(), schema)
    }

    /// Fresh cursor at the start of the payload.
    pub fn cursor(&self) -> Box<dyn Reader> {
        self.reader.clone_boxed()
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema
    }
}

/// Where the data of a bonded value lives.
///
/// Holders never change after construction; assigning a bonded value builds a new one.
#[derive(Debug, EnumIs)]
pub enum Holder {
    Local(LocalPayload),
    Remote(RemotePayload),
}

impl Holder {
    /// Shape the held data is known to have, if any.
    pub fn runtime_shape(&self) -> Option<&'static Shape> {
        match self {
            Holder::Local(local) => Some(local.runtime_shape()),
            Holder::Remote(remote) => remote.schema().shape(),
        }
    }

    /// Encode the held data. A remote payload is transcoded from a fresh cursor, without
    /// being decoded into an object.
    pub fn serialize(&self, runtime: &XapRuntime, writer: &mut dyn Writer) -> XapResult<()> {
        match self {
            Holder::Local(local) => runtime.serialize(&**local.instance().read(), writer),
            Holder::Remote(remote) => {
                let mut cursor = remote.cursor();
                transcode(&mut *cursor, writer)?;
                Ok(())
            }
        }
    }

    /// A fresh object assignable to `declared`, independent of the held data.
    ///
    /// The exact runtime type is kept whenever the runtime knows it and it is assignable to
    /// `declared`.
    pub fn deserialize(&self, runtime: &XapRuntime, declared: &'static Shape) -> XapResult<ObjectRef> {
        match self {
            Holder::Local(local) => runtime.deep_clone(&**local.instance().read(), declared),
            Holder::Remote(remote) => {
                let mut cursor = remote.cursor();
                runtime.deserialize(&mut *cursor, remote.schema(), declared)
            }
        }
    }

    /// Object to expose as a value of `declared`, and whether it is a copy.
    ///
    /// A local object assignable to `declared` is returned as is, unless a read-only view is
    /// requested. Everything else is a copy marked read-only.
    pub fn project(
        &self,
        runtime: &XapRuntime,
        declared: &'static Shape,
        read_only: bool,
    ) -> XapResult<(ObjectRef, bool)> {
        if let Holder::Local(local) = self {
            if !read_only && local.runtime_shape().is_assignable_to(declared) {
                return Ok((local.instance().clone(), false));
            }
        }

        let copy = self.deserialize(runtime, declared)?;
        copy.set_read_only();
        Ok((copy, true))
    }
}
