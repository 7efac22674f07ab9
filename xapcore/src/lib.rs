//! Bonded values and codec runtime for Xap schema types.
//!
//! A [`bonded::Bonded`] field holds either a live object or an encoded payload that is only
//! decoded when its value is first read. Encoding, decoding and copying are done by codec
//! programs generated from shapes ([`codec`]), memoized per key by the process-wide
//! [`base::runtime::XapRuntime`], or compiled ahead of time into a table ([`aot`]).
//!
//! Most consumers will interact with [`bonded::Bonded`], [`reflect::Instance`] and the
//! [`register_struct`] macro.

pub mod aot;
pub mod base;
pub mod bonded;
pub mod codec;
pub mod magic;
pub mod reflect;
#[cfg(any(test, feature = "test-utils"))]
pub mod tests_utils;
pub mod utils;

pub extern crate inventory;
