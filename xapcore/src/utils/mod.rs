pub mod error;
pub mod lazy;
pub mod ref_id;
