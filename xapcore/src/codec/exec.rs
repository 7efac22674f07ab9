//! Program interpreter
//!
//! Runs a [`Program`] against [`Struct`] objects. Each level of a program addresses one
//! level of the object's inheritance chain, base first, so the part of the object a level
//! works on is found `levels - 1 - idx` hops down [`Struct::base`].
use std::sync::Arc;

use log::trace;
use xapschema::{
    ProtocolError, ScalarType, SchemaRef, Shape,
    protocol::{FieldHeader, Reader, Writer, descend, skip_value},
};

use crate::{
    aot::CompiledTable,
    base::runtime::XapRuntime,
    bonded::{Holder, RemotePayload},
    codec::{Link, Program, Step},
    reflect::{self, FieldMut, FieldRef, Struct},
    utils::error::{XapError, XapResult},
};

/// Resolves the links of running programs.
///
/// Programs taken from a compiled table refer to their siblings by slot; programs built at
/// runtime refer to each other by key. A key found in the table is served from the table.
pub struct Resolver<'a> {
    runtime: &'a XapRuntime,
    table: Option<Arc<CompiledTable>>,
}

impl<'a> Resolver<'a> {
    pub fn new(runtime: &'a XapRuntime, table: Option<Arc<CompiledTable>>) -> Self {
        Self { runtime, table }
    }

    pub fn runtime(&self) -> &'a XapRuntime {
        self.runtime
    }

    pub fn resolve(&self, link: &Link) -> XapResult<Arc<Program>> {
        match link {
            Link::Cache(key) => {
                if let Some(program) = self.table.as_ref().and_then(|table| table.lookup(key)) {
                    return Ok(program);
                }
                self.runtime.cached_program(key)
            }
            Link::Slot(slot) => self
                .table
                .as_ref()
                .and_then(|table| table.slot(*slot))
                .ok_or_else(|| XapError::KeyNotFound {
                    key: format!("slot {}", slot),
                    context: "compiled codec table".to_string(),
                }),
        }
    }
}

fn mismatch(shape: &Shape, id: u16) -> XapError {
    XapError::ShapeMismatch {
        shape: shape.name().to_string(),
        id,
    }
}

fn out_of_range(position: usize, value: i128, target: &'static str) -> XapError {
    ProtocolError::ValueOutOfRange {
        position,
        value,
        target,
    }
    .into()
}

fn hops(program: &Program, idx: usize) -> usize {
    program.levels.len() - 1 - idx
}

/// Write `value` as a struct: its runtime type name, then its fields.
pub fn serialize(
    resolver: &Resolver,
    program: &Program,
    value: &dyn Struct,
    writer: &mut dyn Writer,
) -> XapResult<()> {
    writer.write_struct_begin(value.shape().name())?;
    serialize_body(resolver, program, value, writer)
}

fn serialize_body(
    resolver: &Resolver,
    program: &Program,
    value: &dyn Struct,
    writer: &mut dyn Writer,
) -> XapResult<()> {
    for (idx, level) in program.levels.iter().enumerate() {
        if idx > 0 {
            writer.write_field_header(FieldHeader::BaseEnd)?;
        }

        let object = reflect::level(value, hops(program, idx)).ok_or_else(|| {
            XapError::UnsupportedConversion {
                from: value.shape().name().to_string(),
                to: level.shape.clone(),
            }
        })?;
        for step in &level.steps {
            write_step(resolver, step, object, writer)?;
        }
    }
    writer.write_field_header(FieldHeader::Stop)?;
    Ok(())
}

fn write_step(
    resolver: &Resolver,
    step: &Step,
    object: &dyn Struct,
    writer: &mut dyn Writer,
) -> XapResult<()> {
    let Some(wire) = step.wire() else {
        return Ok(());
    };
    let id = step.id();
    let field = object
        .field(id)
        .ok_or_else(|| mismatch(object.shape(), id))?;

    match step {
        Step::Scalar { ty, .. } => {
            writer.write_field_header(FieldHeader::Field { id, wire })?;
            write_scalar(*ty, field, writer).ok_or_else(|| mismatch(object.shape(), id))??;
        }
        Step::Inline { .. } | Step::Deferred { .. } => {
            let nested = match field {
                FieldRef::Struct(nested) => nested,
                FieldRef::Nullable(Some(nested)) => nested,
                // Absent values are omitted
                FieldRef::Nullable(None) => return Ok(()),
                _ => return Err(mismatch(object.shape(), id)),
            };
            let program = match step {
                Step::Inline { program, .. } => program.clone(),
                Step::Deferred { link, .. } => resolver.resolve(link)?,
                _ => return Err(mismatch(object.shape(), id)),
            };
            writer.write_field_header(FieldHeader::Field { id, wire })?;
            serialize(resolver, &program, nested, writer)?;
        }
        Step::Bonded { .. } => {
            let FieldRef::Bonded(bonded) = field else {
                return Err(mismatch(object.shape(), id));
            };
            let mut fork = writer.fork();
            bonded.holder().serialize(resolver.runtime(), &mut *fork)?;
            writer.write_field_header(FieldHeader::Field { id, wire })?;
            writer.write_fork(fork)?;
        }
        Step::Skip { .. } => {}
    }
    Ok(())
}

fn write_scalar(
    ty: ScalarType,
    field: FieldRef<'_>,
    writer: &mut dyn Writer,
) -> Option<XapResult<()>> {
    let result = match (ty, field) {
        (ScalarType::Bool, FieldRef::Bool(v)) => writer.write_bool(v),
        (ScalarType::Int32, FieldRef::Int32(v)) => writer.write_zigzag(v.into()),
        (ScalarType::Int64, FieldRef::Int64(v)) => writer.write_zigzag(v),
        (ScalarType::UInt32, FieldRef::UInt32(v)) => writer.write_varint(v.into()),
        (ScalarType::UInt64, FieldRef::UInt64(v)) => writer.write_varint(v),
        (ScalarType::Double, FieldRef::Double(v)) => writer.write_double(v),
        (ScalarType::String, FieldRef::String(v)) => writer.write_string(v),
        (ScalarType::Blob, FieldRef::Blob(v)) => writer.write_bytes(v),
        _ => return None,
    };
    Some(result.map_err(XapError::from))
}

/// Read the fields of a struct into `value`. The struct name must already be consumed.
///
/// Fields without a matching step, or whose wire type differs from the step's, are
/// skipped. Levels beyond the program's are skipped entirely.
pub fn deserialize_body(
    resolver: &Resolver,
    program: &Program,
    reader: &mut dyn Reader,
    value: &mut dyn Struct,
) -> XapResult<()> {
    read_body(resolver, program, reader, value, 1)
}

/// `depth` counts the structs opened so far, this one included.
fn read_body(
    resolver: &Resolver,
    program: &Program,
    reader: &mut dyn Reader,
    value: &mut dyn Struct,
    depth: usize,
) -> XapResult<()> {
    let mut idx = 0;
    loop {
        match reader.read_field_header()? {
            FieldHeader::Stop => return Ok(()),
            FieldHeader::BaseEnd => idx += 1,
            FieldHeader::Field { id, wire } => {
                let step = program.levels.get(idx).and_then(|level| level.step(id));
                match step {
                    Some(step) if step.wire() == Some(wire) => {
                        let shape = value.shape();
                        let object = reflect::level_mut(&mut *value, hops(program, idx))
                            .ok_or_else(|| mismatch(shape, id))?;
                        read_step(resolver, step, reader, object, depth)?;
                    }
                    _ => {
                        trace!("Skipping field {} ({:?}) of level {}", id, wire, idx);
                        skip_value(reader, wire, depth)?;
                    }
                }
            }
        }
    }
}

fn read_step(
    resolver: &Resolver,
    step: &Step,
    reader: &mut dyn Reader,
    object: &mut dyn Struct,
    depth: usize,
) -> XapResult<()> {
    let id = step.id();
    let shape = object.shape();
    let field = object.field_mut(id).ok_or_else(|| mismatch(shape, id))?;

    match step {
        Step::Scalar { ty, .. } => read_scalar(*ty, reader, field, shape, id),
        Step::Inline { .. } | Step::Deferred { .. } => {
            let program = match step {
                Step::Inline { program, .. } => program.clone(),
                Step::Deferred { link, .. } => resolver.resolve(link)?,
                _ => return Err(mismatch(shape, id)),
            };
            // Nested structs are always of their declared type
            let depth = descend(depth, reader.position())?;
            reader.read_struct_begin()?;
            match field {
                FieldMut::Struct(nested) => read_body(resolver, &program, reader, nested, depth),
                FieldMut::Nullable(nullable) => read_body(
                    resolver,
                    &program,
                    reader,
                    nullable.get_or_insert_default(),
                    depth,
                ),
                _ => Err(mismatch(shape, id)),
            }
        }
        Step::Bonded { .. } => {
            let FieldMut::Bonded(bonded) = field else {
                return Err(mismatch(shape, id));
            };
            let payload = RemotePayload::new(reader.sub_reader()?, SchemaRef::EMPTY);
            bonded.replace_holder(Arc::new(Holder::Remote(payload)))
        }
        Step::Skip { .. } => Ok(()),
    }
}

fn read_scalar(
    ty: ScalarType,
    reader: &mut dyn Reader,
    field: FieldMut<'_>,
    shape: &Shape,
    id: u16,
) -> XapResult<()> {
    let position = reader.position();
    match (ty, field) {
        (ScalarType::Bool, FieldMut::Bool(v)) => *v = reader.read_bool()?,
        (ScalarType::Int32, FieldMut::Int32(v)) => {
            let raw = reader.read_zigzag()?;
            *v = i32::try_from(raw).map_err(|_| out_of_range(position, raw.into(), "i32"))?;
        }
        (ScalarType::Int64, FieldMut::Int64(v)) => *v = reader.read_zigzag()?,
        (ScalarType::UInt32, FieldMut::UInt32(v)) => {
            let raw = reader.read_varint()?;
            *v = u32::try_from(raw).map_err(|_| out_of_range(position, raw.into(), "u32"))?;
        }
        (ScalarType::UInt64, FieldMut::UInt64(v)) => *v = reader.read_varint()?,
        (ScalarType::Double, FieldMut::Double(v)) => *v = reader.read_double()?,
        (ScalarType::String, FieldMut::String(v)) => *v = reader.read_string()?,
        (ScalarType::Blob, FieldMut::Blob(v)) => *v = reader.read_bytes()?,
        _ => return Err(mismatch(shape, id)),
    }
    Ok(())
}

/// Copy `source` into `target` field by field.
///
/// Nested structs are copied, bonded fields share their holder with the source.
pub fn clone_body(
    resolver: &Resolver,
    program: &Program,
    source: &dyn Struct,
    target: &mut dyn Struct,
) -> XapResult<()> {
    let source_depth = source.shape().depth();
    for (idx, level) in program.levels.iter().enumerate() {
        if level.steps.is_empty() || idx >= source_depth {
            continue;
        }

        let from = reflect::level(source, source_depth - 1 - idx).ok_or_else(|| {
            XapError::UnsupportedConversion {
                from: source.shape().name().to_string(),
                to: level.shape.clone(),
            }
        })?;
        let target_shape = target.shape();
        let to = reflect::level_mut(&mut *target, hops(program, idx)).ok_or_else(|| {
            XapError::UnsupportedConversion {
                from: target_shape.name().to_string(),
                to: level.shape.clone(),
            }
        })?;

        for step in &level.steps {
            clone_step(resolver, step, from, to)?;
        }
    }
    Ok(())
}

fn clone_step(
    resolver: &Resolver,
    step: &Step,
    from: &dyn Struct,
    to: &mut dyn Struct,
) -> XapResult<()> {
    if step.is_skip() {
        return Ok(());
    }

    let id = step.id();
    let source = from.field(id).ok_or_else(|| mismatch(from.shape(), id))?;
    let shape = to.shape();
    let target = to.field_mut(id).ok_or_else(|| mismatch(shape, id))?;

    match step {
        Step::Scalar { .. } => copy_scalar(source, target).ok_or_else(|| mismatch(shape, id)),
        Step::Inline { .. } | Step::Deferred { .. } => {
            let nested = match source {
                FieldRef::Struct(nested) => Some(nested),
                FieldRef::Nullable(nested) => nested,
                _ => return Err(mismatch(from.shape(), id)),
            };
            let Some(nested) = nested else {
                if let FieldMut::Nullable(nullable) = target {
                    nullable.clear();
                }
                return Ok(());
            };

            let program = match step {
                Step::Inline { program, .. } => program.clone(),
                Step::Deferred { link, .. } => resolver.resolve(link)?,
                _ => return Err(mismatch(shape, id)),
            };
            match target {
                FieldMut::Struct(target) => clone_body(resolver, &program, nested, target),
                FieldMut::Nullable(nullable) => {
                    clone_body(resolver, &program, nested, nullable.get_or_insert_default())
                }
                _ => Err(mismatch(shape, id)),
            }
        }
        Step::Bonded { .. } => match (source, target) {
            (FieldRef::Bonded(source), FieldMut::Bonded(target)) => {
                target.replace_holder(source.holder().clone())
            }
            _ => Err(mismatch(shape, id)),
        },
        Step::Skip { .. } => Ok(()),
    }
}

fn copy_scalar(source: FieldRef<'_>, target: FieldMut<'_>) -> Option<()> {
    match (source, target) {
        (FieldRef::Bool(v), FieldMut::Bool(t)) => *t = v,
        (FieldRef::Int32(v), FieldMut::Int32(t)) => *t = v,
        (FieldRef::Int64(v), FieldMut::Int64(t)) => *t = v,
        (FieldRef::UInt32(v), FieldMut::UInt32(t)) => *t = v,
        (FieldRef::UInt64(v), FieldMut::UInt64(t)) => *t = v,
        (FieldRef::Double(v), FieldMut::Double(t)) => *t = v,
        (FieldRef::String(v), FieldMut::String(t)) => v.clone_into(t),
        (FieldRef::Blob(v), FieldMut::Blob(t)) => v.clone_into(t),
        _ => return None,
    }
    Some(())
}
