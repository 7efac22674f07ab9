use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

/// Failure raised while walking a payload.
///
/// Every variant carries the byte position at which the reader gave up, so that
/// callers can report where a malformed payload went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Error)]
pub enum ProtocolError {
    /// The payload ended before the value was complete.
    #[error("Unexpected end of payload at byte {position}: {needed} more byte(s) required.")]
    UnexpectedEof { position: usize, needed: usize },

    /// A varint did not terminate within 10 bytes.
    #[error("Malformed varint starting at byte {position}.")]
    MalformedVarint { position: usize },

    /// A field header does not decode to a field, a base marker or a stop marker.
    #[error("Invalid field header `{value:#x}` at byte {position}.")]
    InvalidHeader { position: usize, value: u64 },

    /// The wire tag of a field header is unknown.
    #[error("Unknown wire type `{tag}` at byte {position}.")]
    InvalidWireType { position: usize, tag: u8 },

    /// A string field does not hold valid UTF-8.
    #[error("String at byte {position} is not valid UTF-8.")]
    InvalidUtf8 { position: usize },

    /// Structs are nested deeper than [`crate::protocol::MAX_NESTING_DEPTH`].
    #[error("Struct at byte {position} is nested deeper than {limit} level(s).")]
    DepthExceeded { position: usize, limit: usize },

    /// A decoded value does not fit in the declared field type.
    #[error("Value {value} at byte {position} does not fit in `{target}`.")]
    ValueOutOfRange {
        position: usize,
        value: i128,
        target: &'static str,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failure raised by the shape registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, Error)]
pub enum SchemaError {
    /// Two distinct shapes were registered under the same name.
    #[error("A different shape named `{name}` is already registered.")]
    DuplicatedShape { name: String },
}
