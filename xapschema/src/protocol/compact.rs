//! Compact binary protocol.
//!
//! Field headers are a single varint: `0` closes the struct, `1` closes an inheritance
//! level, and any other value is `((id + 1) << 3) | wire`.
use std::{fmt, sync::Arc};

use crate::{
    error::{ProtocolError, ProtocolResult},
    protocol::{
        FieldHeader, Reader, WireType, Writer,
        varint::{decode_u64, encode_u64, zigzag_decode, zigzag_encode},
    },
};

const HEADER_STOP: u64 = 0;
const HEADER_BASE_END: u64 = 1;

fn encode_header(header: FieldHeader) -> u64 {
    match header {
        FieldHeader::Stop => HEADER_STOP,
        FieldHeader::BaseEnd => HEADER_BASE_END,
        FieldHeader::Field { id, wire } => ((id as u64 + 1) << 3) | wire as u64,
    }
}

/// Cursor over a shared, immutable buffer.
///
/// Cloning is cheap (the buffer is reference counted) and yields an independent cursor.
#[derive(Clone)]
pub struct CompactReader {
    data: Arc<[u8]>,
    pos: usize,
    end: usize,
}

impl CompactReader {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let end = data.len();
        Self { data, pos: 0, end }
    }

    /// Bytes left before the end of this cursor's region.
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&[u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::UnexpectedEof {
                position: self.pos,
                needed: len - self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    fn length_prefix(&mut self) -> ProtocolResult<usize> {
        let position = self.pos;
        let len = self.read_varint()?;
        usize::try_from(len).map_err(|_| ProtocolError::ValueOutOfRange {
            position,
            value: len as i128,
            target: "usize",
        })
    }
}

impl fmt::Debug for CompactReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactReader")
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish()
    }
}

impl Reader for CompactReader {
    fn read_struct_begin(&mut self) -> ProtocolResult<String> {
        self.read_string()
    }

    fn read_field_header(&mut self) -> ProtocolResult<FieldHeader> {
        let position = self.pos;
        match self.read_varint()? {
            HEADER_STOP => Ok(FieldHeader::Stop),
            HEADER_BASE_END => Ok(FieldHeader::BaseEnd),
            value if value < 8 => Err(ProtocolError::InvalidHeader { position, value }),
            value => {
                let tag = (value & 0x7) as u8;
                let wire = WireType::from_repr(tag)
                    .ok_or(ProtocolError::InvalidWireType { position, tag })?;
                let id = u16::try_from((value >> 3) - 1)
                    .map_err(|_| ProtocolError::InvalidHeader { position, value })?;
                Ok(FieldHeader::Field { id, wire })
            }
        }
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    fn read_varint(&mut self) -> ProtocolResult<u64> {
        let position = self.pos;
        let mut slice = &self.data[self.pos..self.end];
        let before = slice.len();
        match decode_u64(&mut slice) {
            Some(value) => {
                self.pos += before - slice.len();
                Ok(value)
            }
            None if before < super::varint::MAX_VARINT_LEN
                && slice.iter().all(|b| b & 0x80 != 0) =>
            {
                Err(ProtocolError::UnexpectedEof {
                    position,
                    needed: 1,
                })
            }
            None => Err(ProtocolError::MalformedVarint { position }),
        }
    }

    fn read_zigzag(&mut self) -> ProtocolResult<i64> {
        self.read_varint().map(zigzag_decode)
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(f64::from_le_bytes(bytes))
    }

    fn read_bytes(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = self.length_prefix()?;
        self.take(len).map(<[u8]>::to_vec)
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        let position = self.pos;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 { position })
    }

    fn sub_reader(&mut self) -> ProtocolResult<Box<dyn Reader>> {
        let len = self.length_prefix()?;
        let start = self.pos;
        self.take(len)?;
        Ok(Box::new(CompactReader {
            data: self.data.clone(),
            pos: start,
            end: start + len,
        }))
    }

    fn clone_boxed(&self) -> Box<dyn Reader> {
        Box::new(self.clone())
    }

    fn position(&self) -> usize {
        self.pos
    }
}

/// Growable output buffer.
#[derive(Default)]
pub struct CompactWriter {
    buf: Vec<u8>,
}

impl CompactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Reader over everything written so far.
    pub fn to_reader(&self) -> CompactReader {
        CompactReader::new(self.buf.clone())
    }
}

impl fmt::Debug for CompactWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactWriter")
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Writer for CompactWriter {
    fn write_struct_begin(&mut self, name: &str) -> ProtocolResult<()> {
        self.write_string(name)
    }

    fn write_field_header(&mut self, header: FieldHeader) -> ProtocolResult<()> {
        self.write_varint(encode_header(header))
    }

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        self.buf.push(value as u8);
        Ok(())
    }

    fn write_varint(&mut self, value: u64) -> ProtocolResult<()> {
        encode_u64(value, &mut |b| self.buf.extend_from_slice(b));
        Ok(())
    }

    fn write_zigzag(&mut self, value: i64) -> ProtocolResult<()> {
        self.write_varint(zigzag_encode(value))
    }

    fn write_double(&mut self, value: f64) -> ProtocolResult<()> {
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, value: &[u8]) -> ProtocolResult<()> {
        self.write_varint(value.len() as u64)?;
        self.buf.extend_from_slice(value);
        Ok(())
    }

    fn fork(&self) -> Box<dyn Writer> {
        Box::new(CompactWriter::new())
    }

    fn into_bytes(self: Box<Self>) -> Vec<u8> {
        self.buf
    }
}
