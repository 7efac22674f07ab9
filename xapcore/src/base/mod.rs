pub mod meta;
pub mod runtime;
