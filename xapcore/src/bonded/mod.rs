//! Bonded values
//!
//! A bonded value is either a live object ([`LocalPayload`]) or an encoded payload that was
//! not decoded yet ([`RemotePayload`]). [`BondedHandle`] is the immutable typed handle over
//! one [`Holder`]; [`Bonded`] is the field type built on top of it, which adds lazy
//! materialization, a read-only flag and [`cast`].
mod field;
mod handle;
mod holder;
mod wrapper;

pub use field::BondedField;
pub use handle::{BondedHandle, Projection, convert};
pub use holder::{Holder, LocalPayload, RemotePayload};
pub use wrapper::{Bonded, cast};
