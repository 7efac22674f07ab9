//! Shape descriptors and wire capabilities for the Xap bonded runtime.
//!
//! This crate holds everything the runtime needs to know about a type without
//! knowing the Rust type itself:
//!
//! - [`shape`]: the field-level description of a schema type ([`shape::Shape`]) and the
//!   optional schema reference attached to remote payloads ([`shape::SchemaRef`]).
//! - [`registry`]: a process-shareable registry resolving shapes by name.
//! - [`protocol`]: the abstract [`protocol::Reader`] / [`protocol::Writer`] capabilities
//!   driven by generated codecs, together with a compact binary implementation.
//!
//! Codec generation, bonded values and the runtime live in `xapcore`.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod shape;

pub use error::{ProtocolError, ProtocolResult, SchemaError};
pub use registry::ShapeRegistry;
pub use shape::{FieldDef, FieldType, Modifier, ScalarType, SchemaRef, Shape, ShapeLink};
