//! Codec programs
//!
//! A codec is a [`Program`]: for every inheritance level of the target type (base first),
//! an ordered list of [`Step`]s, one per field. Programs are plain data. They are built by
//! the [`generator`], memoized by the [`cache`], interpreted by [`exec`], and can be stored
//! in an ahead-of-time compiled table ([`crate::aot`]).
//!
//! Nested structs are either embedded ([`Step::Inline`]) or reached through a [`Link`]
//! ([`Step::Deferred`]). A link is resolved when the program runs, which is what makes
//! recursive shapes expressible.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{EnumIs, IntoStaticStr};
use xapschema::{ScalarType, Shape, protocol::WireType};

pub mod cache;
pub mod exec;
pub mod generator;

/// What a program does.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIs, IntoStaticStr,
)]
pub enum CodecKind {
    /// `value -> writer`
    Serialize,
    /// `reader -> value`
    Deserialize,
    /// `source value -> target value`
    Clone,
}

/// Identifies a program: what it does, the shape it reads and the shape it produces.
///
/// For [`CodecKind::Serialize`] source and target are the same runtime shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodecKey {
    pub kind: CodecKind,
    pub source: String,
    pub target: String,
}

impl CodecKey {
    pub fn new(kind: CodecKind, source: &Shape, target: &Shape) -> Self {
        Self {
            kind,
            source: source.name().to_string(),
            target: target.name().to_string(),
        }
    }

    pub fn serialize(shape: &Shape) -> Self {
        Self::new(CodecKind::Serialize, shape, shape)
    }

    pub fn deserialize(source: &Shape, target: &Shape) -> Self {
        Self::new(CodecKind::Deserialize, source, target)
    }

    pub fn clone_of(source: &Shape, target: &Shape) -> Self {
        Self::new(CodecKind::Clone, source, target)
    }
}

impl fmt::Display for CodecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind: &'static str = self.kind.into();
        write!(f, "{}({} -> {})", kind, self.source, self.target)
    }
}

/// Indirect reference to another program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIs)]
pub enum Link {
    /// Looked up in the runtime codec cache, built on first use.
    Cache(CodecKey),
    /// Index in a compiled table.
    Slot(usize),
}

/// Inline-vs-deferred policy for nested structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumIs)]
#[serde(rename_all = "snake_case")]
pub enum InlinePolicy {
    /// Embed nested programs, except for recursive shapes.
    #[default]
    Inline,
    /// Always go through a link.
    Deferred,
}

/// One field of a program.
#[derive(Debug, Clone, Serialize, Deserialize, EnumIs)]
pub enum Step {
    /// Copy a scalar.
    Scalar { id: u16, ty: ScalarType },
    /// Nested struct, embedded program.
    Inline { id: u16, program: Arc<Program> },
    /// Nested struct, indirect program.
    Deferred { id: u16, link: Link },
    /// Bonded field. The payload is carried over undecoded.
    Bonded { id: u16 },
    /// Field present in the source but without a compatible counterpart in the target.
    Skip { id: u16 },
}

impl Step {
    pub fn id(&self) -> u16 {
        match self {
            Step::Scalar { id, .. }
            | Step::Inline { id, .. }
            | Step::Deferred { id, .. }
            | Step::Bonded { id }
            | Step::Skip { id } => *id,
        }
    }

    /// Wire type this step consumes or produces, `None` for [`Step::Skip`].
    pub fn wire(&self) -> Option<WireType> {
        match self {
            Step::Scalar { ty, .. } => Some(ty.wire()),
            Step::Inline { .. } | Step::Deferred { .. } => Some(WireType::Struct),
            Step::Bonded { .. } => Some(WireType::Bonded),
            Step::Skip { .. } => None,
        }
    }
}

/// Steps of one inheritance level, sorted by field id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub shape: String,
    pub steps: Vec<Step>,
}

impl Level {
    pub fn step(&self, id: u16) -> Option<&Step> {
        self.steps
            .binary_search_by_key(&id, Step::id)
            .ok()
            .map(|idx| &self.steps[idx])
    }
}

/// A generated codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub key: CodecKey,
    pub levels: Vec<Level>,
}

impl Program {
    /// Links this program depends on, embedded programs included.
    pub fn links(&self) -> Vec<&Link> {
        let mut links = Vec::new();
        for level in &self.levels {
            for step in &level.steps {
                match step {
                    Step::Deferred { link, .. } => links.push(link),
                    Step::Inline { program, .. } => links.extend(program.links()),
                    _ => {}
                }
            }
        }
        links
    }
}
