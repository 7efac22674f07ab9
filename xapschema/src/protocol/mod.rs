//! Reader and writer capabilities
//!
//! Codecs never touch bytes directly. They drive a [`Reader`] or a [`Writer`] field by
//! field. A struct is laid out as follows:
//!
//! ```text
//! struct   := name level (BaseEnd level)* Stop
//! level    := (header value)*
//! header   := Field { id, wire }
//! ```
//!
//! Levels follow the inheritance chain of the runtime type, base first. Every field
//! header carries the [`WireType`] of its value so that unknown fields can be skipped
//! and payloads can be transcoded without knowing their shape.
//!
//! Both traits are object safe: holders keep a `Box<dyn Reader>` and codecs write through
//! `&mut dyn Writer`.
use std::fmt;

use strum::{EnumIs, FromRepr, IntoStaticStr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

pub mod compact;
pub mod varint;

pub use compact::{CompactReader, CompactWriter};

/// Deepest chain of inline nested structs a payload may hold. Bonded payloads start a new
/// count when they are opened.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Nesting level of a struct found at `depth`, or [`ProtocolError::DepthExceeded`].
pub fn descend(depth: usize, position: usize) -> ProtocolResult<usize> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(ProtocolError::DepthExceeded {
            position,
            limit: MAX_NESTING_DEPTH,
        });
    }
    Ok(depth + 1)
}

/// Encoding of a single value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, FromRepr, IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum WireType {
    Bool = 1,
    /// Unsigned LEB128 varint.
    VarInt = 2,
    /// Signed integer, zigzag mapped then varint encoded.
    ZigZag = 3,
    /// 8 bytes, little endian.
    Double = 4,
    /// Varint length followed by the raw bytes.
    Bytes = 5,
    /// A nested struct, inline.
    Struct = 6,
    /// A nested struct wrapped like [`WireType::Bytes`], so it can be captured without
    /// being decoded.
    Bonded = 7,
}

/// What comes next inside a struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs)]
pub enum FieldHeader {
    Field { id: u16, wire: WireType },
    /// End of the current inheritance level.
    BaseEnd,
    /// End of the struct.
    Stop,
}

/// A replayable cursor over an encoded payload.
///
/// [`Reader::clone_boxed`] must return an independent cursor at the same position:
/// reading from the clone never moves the original.
pub trait Reader: Send + Sync + fmt::Debug {
    /// Read the runtime type name opening a struct.
    fn read_struct_begin(&mut self) -> ProtocolResult<String>;

    fn read_field_header(&mut self) -> ProtocolResult<FieldHeader>;

    fn read_bool(&mut self) -> ProtocolResult<bool>;

    fn read_varint(&mut self) -> ProtocolResult<u64>;

    fn read_zigzag(&mut self) -> ProtocolResult<i64>;

    fn read_double(&mut self) -> ProtocolResult<f64>;

    fn read_bytes(&mut self) -> ProtocolResult<Vec<u8>>;

    fn read_string(&mut self) -> ProtocolResult<String>;

    /// Capture the next length-prefixed region as an independent reader and move past
    /// it. Used for bonded fields, whose content stays undecoded.
    fn sub_reader(&mut self) -> ProtocolResult<Box<dyn Reader>>;

    /// Independent cursor at the same position.
    fn clone_boxed(&self) -> Box<dyn Reader>;

    /// Current byte offset, for diagnostics.
    fn position(&self) -> usize;

    /// Skip over one value of the given wire type.
    fn skip(&mut self, wire: WireType) -> ProtocolResult<()> {
        skip_value(self, wire, 0)
    }
}

impl Clone for Box<dyn Reader> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Sequential sink for encoded values, mirror of [`Reader`].
pub trait Writer: Send + fmt::Debug {
    fn write_struct_begin(&mut self, name: &str) -> ProtocolResult<()>;

    fn write_field_header(&mut self, header: FieldHeader) -> ProtocolResult<()>;

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()>;

    fn write_varint(&mut self, value: u64) -> ProtocolResult<()>;

    fn write_zigzag(&mut self, value: i64) -> ProtocolResult<()>;

    fn write_double(&mut self, value: f64) -> ProtocolResult<()>;

    fn write_bytes(&mut self, value: &[u8]) -> ProtocolResult<()>;

    fn write_string(&mut self, value: &str) -> ProtocolResult<()> {
        self.write_bytes(value.as_bytes())
    }

    /// A fresh, empty writer of the same protocol. Bonded fields are encoded into a
    /// fork and then appended with [`Writer::write_fork`].
    fn fork(&self) -> Box<dyn Writer>;

    /// Consume the writer and return what was written.
    fn into_bytes(self: Box<Self>) -> Vec<u8>;

    /// Append the content of a fork as a length-prefixed region.
    fn write_fork(&mut self, fork: Box<dyn Writer>) -> ProtocolResult<()> {
        let bytes = fork.into_bytes();
        self.write_bytes(&bytes)
    }
}

/// Skip a whole struct, nested structs included. The reader must be positioned on the
/// struct name.
pub fn skip_struct<R: Reader + ?Sized>(reader: &mut R) -> ProtocolResult<()> {
    skip_value(reader, WireType::Struct, 0)
}

/// Skip one value found `depth` structs deep.
pub fn skip_value<R: Reader + ?Sized>(
    reader: &mut R,
    wire: WireType,
    depth: usize,
) -> ProtocolResult<()> {
    match wire {
        WireType::Bool => reader.read_bool().map(drop),
        WireType::VarInt => reader.read_varint().map(drop),
        WireType::ZigZag => reader.read_zigzag().map(drop),
        WireType::Double => reader.read_double().map(drop),
        WireType::Bytes | WireType::Bonded => reader.read_bytes().map(drop),
        WireType::Struct => {
            let depth = descend(depth, reader.position())?;
            reader.read_struct_begin()?;
            loop {
                match reader.read_field_header()? {
                    FieldHeader::Field { wire, .. } => skip_value(reader, wire, depth)?,
                    FieldHeader::BaseEnd => {}
                    FieldHeader::Stop => return Ok(()),
                }
            }
        }
    }
}

/// Re-encode one struct from `reader` into `writer` without materializing it.
///
/// The walk is driven by the wire tags alone. Nested bonded payloads are copied as opaque
/// regions and stay undecoded.
pub fn transcode(reader: &mut dyn Reader, writer: &mut dyn Writer) -> ProtocolResult<()> {
    transcode_struct(reader, writer, 0)
}

fn transcode_struct(
    reader: &mut dyn Reader,
    writer: &mut dyn Writer,
    depth: usize,
) -> ProtocolResult<()> {
    let depth = descend(depth, reader.position())?;
    let name = reader.read_struct_begin()?;
    writer.write_struct_begin(&name)?;

    loop {
        let header = reader.read_field_header()?;
        writer.write_field_header(header)?;

        match header {
            FieldHeader::Field { wire, .. } => transcode_value(reader, writer, wire, depth)?,
            FieldHeader::BaseEnd => {}
            FieldHeader::Stop => return Ok(()),
        }
    }
}

fn transcode_value(
    reader: &mut dyn Reader,
    writer: &mut dyn Writer,
    wire: WireType,
    depth: usize,
) -> ProtocolResult<()> {
    match wire {
        WireType::Bool => writer.write_bool(reader.read_bool()?),
        WireType::VarInt => writer.write_varint(reader.read_varint()?),
        WireType::ZigZag => writer.write_zigzag(reader.read_zigzag()?),
        WireType::Double => writer.write_double(reader.read_double()?),
        WireType::Bytes | WireType::Bonded => writer.write_bytes(&reader.read_bytes()?),
        WireType::Struct => transcode_struct(reader, writer, depth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut writer = CompactWriter::new();
        writer.write_struct_begin("test.Outer").unwrap();
        writer
            .write_field_header(FieldHeader::Field {
                id: 0,
                wire: WireType::ZigZag,
            })
            .unwrap();
        writer.write_zigzag(-7).unwrap();
        writer.write_field_header(FieldHeader::BaseEnd).unwrap();
        writer
            .write_field_header(FieldHeader::Field {
                id: 1,
                wire: WireType::Struct,
            })
            .unwrap();
        writer.write_struct_begin("test.Inner").unwrap();
        writer
            .write_field_header(FieldHeader::Field {
                id: 4,
                wire: WireType::Bytes,
            })
            .unwrap();
        writer.write_string("hello").unwrap();
        writer.write_field_header(FieldHeader::Stop).unwrap();

        let mut fork = writer.fork();
        fork.write_struct_begin("test.Lazy").unwrap();
        fork.write_field_header(FieldHeader::Stop).unwrap();
        writer
            .write_field_header(FieldHeader::Field {
                id: 2,
                wire: WireType::Bonded,
            })
            .unwrap();
        writer.write_fork(fork).unwrap();
        writer.write_field_header(FieldHeader::Stop).unwrap();
        writer.into_vec()
    }

    #[test]
    fn skip_struct_consumes_everything() {
        let bytes = sample();
        let mut reader = CompactReader::new(bytes.clone());
        skip_struct(&mut reader).expect("skip should succeed");
        assert_eq!(reader.position(), bytes.len());
    }

    #[test]
    fn transcode_reproduces_the_payload() {
        let bytes = sample();
        let mut reader = CompactReader::new(bytes.clone());
        let mut writer = CompactWriter::new();
        transcode(&mut reader, &mut writer).expect("transcode should succeed");
        assert_eq!(writer.as_slice(), bytes.as_slice());
    }

    fn nested(levels: usize) -> Vec<u8> {
        let mut writer = CompactWriter::new();
        for _ in 1..levels {
            writer.write_struct_begin("test.Node").unwrap();
            writer
                .write_field_header(FieldHeader::Field {
                    id: 1,
                    wire: WireType::Struct,
                })
                .unwrap();
        }
        writer.write_struct_begin("test.Node").unwrap();
        for _ in 0..levels {
            writer.write_field_header(FieldHeader::Stop).unwrap();
        }
        writer.into_vec()
    }

    #[test]
    fn nesting_up_to_the_limit_is_accepted() {
        let bytes = nested(MAX_NESTING_DEPTH);
        skip_struct(&mut CompactReader::new(bytes.clone())).expect("skip should succeed");

        let mut writer = CompactWriter::new();
        transcode(&mut CompactReader::new(bytes.clone()), &mut writer)
            .expect("transcode should succeed");
        assert_eq!(writer.as_slice(), bytes.as_slice());
    }

    #[test]
    fn deep_nesting_is_an_error() {
        for levels in [MAX_NESTING_DEPTH + 1, 200_000] {
            let bytes = nested(levels);

            let err = skip_struct(&mut CompactReader::new(bytes.clone())).unwrap_err();
            assert!(err.is_depth_exceeded(), "unexpected error {err:?}");

            let mut reader = CompactReader::new(bytes);
            let err = transcode(&mut reader, &mut CompactWriter::new()).unwrap_err();
            assert!(err.is_depth_exceeded(), "unexpected error {err:?}");
        }
    }

    #[test]
    fn truncated_payload_reports_eof() {
        let bytes = sample();
        let mut reader = CompactReader::new(bytes[..bytes.len() - 3].to_vec());
        let err = skip_struct(&mut reader).expect_err("truncated payload must fail");
        assert!(err.is_unexpected_eof(), "unexpected error {err:?}");
    }
}
