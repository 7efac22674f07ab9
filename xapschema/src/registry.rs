//! Shape registry
//!
//! Resolves shapes by name. The runtime needs it whenever only a name is at hand: the
//! runtime type name read at the start of a struct, or the shape names stored inside an
//! ahead-of-time compiled table.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};
use parking_lot::RwLock;

use crate::{error::SchemaError, shape::Shape};

/// A central registry of `&'static Shape` keyed by shape name.
///
/// Example:
///
/// ```rust
/// # use xapschema::{ShapeRegistry, Shape};
/// # use std::sync::OnceLock;
/// static POINT: OnceLock<Shape> = OnceLock::new();
/// let point = POINT.get_or_init(|| Shape::builder("geo.Point").build());
///
/// let reg = ShapeRegistry::new();
/// assert!(reg.register(point).unwrap());
/// assert!(!reg.register(point).unwrap(), "second registration is a no-op");
/// assert_eq!(reg.get("geo.Point").map(|s| s.name()), Some("geo.Point"));
/// ```
#[derive(Default)]
pub struct ShapeRegistry {
    shapes: RwLock<BTreeMap<&'static str, &'static Shape>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the shape registered under `name`.
    ///
    /// # A note on concurrency
    /// Multiple concurrent readers are allowed. The read lock is released before this
    /// method returns, so it is safe to call while another thread registers shapes.
    pub fn get(&self, name: &str) -> Option<&'static Shape> {
        self.shapes.read_recursive().get(name).copied()
    }

    /// Register `shape` under its name.
    ///
    /// Returns `Ok(true)` if the shape was inserted, `Ok(false)` if this very shape was
    /// already present, and an error if a *different* shape already uses the name.
    ///
    /// # A note on concurrency
    /// The method takes an upgradable read lock and only upgrades it when an insertion
    /// is needed. Registrations are rare compared to lookups, which motivates this design.
    pub fn register(&self, shape: &'static Shape) -> Result<bool, SchemaError> {
        let lock = self.shapes.upgradable_read();

        if let Some(existing) = lock.get(shape.name()) {
            if std::ptr::eq(*existing, shape) {
                return Ok(false);
            }
            return Err(SchemaError::DuplicatedShape {
                name: shape.name().to_string(),
            });
        }

        let mut lock = parking_lot::RwLockUpgradableReadGuard::upgrade(lock);
        lock.insert(shape.name(), shape);
        debug!("New shape registered: `{}`", shape.name());
        Ok(true)
    }

    /// Register `shape` together with its bases and every shape reachable through its
    /// struct and bonded fields. Recursive shapes are visited once.
    ///
    /// Returns the number of newly inserted shapes.
    pub fn register_closure(&self, shape: &'static Shape) -> Result<usize, SchemaError> {
        let mut visited = BTreeSet::new();
        let mut pending = vec![shape];
        let mut inserted = 0;

        while let Some(shape) = pending.pop() {
            if !visited.insert(shape.name()) {
                continue;
            }

            if self.register(shape)? {
                inserted += 1;
            }

            pending.extend(shape.base());
            pending.extend(shape.fields().iter().filter_map(|field| field.ty.shape()));
        }

        trace!(
            "Registered closure of `{}`: {} new shape(s), {} visited",
            shape.name(),
            inserted,
            visited.len()
        );
        Ok(inserted)
    }

    pub fn len(&self) -> usize {
        self.shapes.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all registered shapes, in lexicographic order.
    pub fn names(&self) -> Vec<&'static str> {
        self.shapes.read_recursive().keys().copied().collect()
    }
}
