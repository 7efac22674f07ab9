use std::{fmt, sync::Arc};

use xapschema::Shape;

use crate::{bonded::Holder, utils::error::XapResult};

/// Type-erased access to a bonded field, used by generated codecs.
pub trait BondedField: Send + Sync + fmt::Debug {
    fn declared_shape(&self) -> &'static Shape;

    fn holder(&self) -> &Arc<Holder>;

    /// Swap the holder. Fails with [`crate::utils::error::XapError::ReadOnly`] on a
    /// read-only field.
    fn replace_holder(&mut self, holder: Arc<Holder>) -> XapResult<()>;

    fn is_read_only(&self) -> bool;

    fn set_read_only(&mut self);
}
