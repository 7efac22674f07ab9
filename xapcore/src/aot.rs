//! Ahead-of-time codec tables
//!
//! [`AotCompiler`] generates, in one pass, the programs of a set of entry points and of
//! every program they reach. Slots are reserved first, for the requested entry points in
//! request order and then for each program in the order it is discovered; bodies are filled
//! afterwards and call each other by slot index ([`Link::Slot`]). Mutually recursive shapes
//! therefore never need a program that does not exist yet.
//!
//! A [`CompiledTable`] can be stored on disk ([`CompiledTable::encode`]) and installed in a
//! runtime, where it takes precedence over the codec cache.
use std::{collections::HashMap, path::Path, sync::Arc};

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use xapschema::{Shape, ShapeRegistry, protocol::{Reader, Writer}};

use crate::{
    base::runtime::XapRuntime,
    codec::{
        CodecKey, CodecKind, InlinePolicy, Link, Program,
        exec::{self, Resolver},
        generator::{Generator, Linker},
    },
    magic::{AOT_MAGIC_BYTES, XAPCORE_VERSION},
    reflect::{ObjectRef, Struct, StructType},
    utils::error::{XapError, XapResult},
};

/// Hands out slots in discovery order.
#[derive(Default)]
struct SlotLinker {
    slots: HashMap<CodecKey, usize>,
    order: Vec<CodecKey>,
}

impl SlotLinker {
    fn reserve(&mut self, key: &CodecKey) -> usize {
        if let Some(slot) = self.slots.get(key) {
            return *slot;
        }
        let slot = self.order.len();
        trace!("Reserved slot {} for {}", slot, key);
        self.slots.insert(key.clone(), slot);
        self.order.push(key.clone());
        slot
    }
}

impl Linker for SlotLinker {
    fn link(&mut self, key: &CodecKey) -> Link {
        Link::Slot(self.reserve(key))
    }
}

/// Collects entry points and compiles them into a [`CompiledTable`].
#[derive(Default)]
pub struct AotCompiler {
    shapes: ShapeRegistry,
    requests: Vec<CodecKey>,
}

impl AotCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request entry points of the given kinds for `T`.
    pub fn add<T: StructType>(&mut self, kinds: &[CodecKind]) -> XapResult<&mut Self> {
        self.add_shape(T::static_shape(), kinds)
    }

    pub fn add_shape(&mut self, shape: &'static Shape, kinds: &[CodecKind]) -> XapResult<&mut Self> {
        self.shapes.register_closure(shape)?;
        for kind in kinds {
            let key = CodecKey::new(*kind, shape, shape);
            if !self.requests.contains(&key) {
                self.requests.push(key);
            }
        }
        Ok(self)
    }

    fn lookup(&self, name: &str) -> XapResult<&'static Shape> {
        self.shapes.get(name).ok_or_else(|| XapError::KeyNotFound {
            key: name.to_string(),
            context: "compiler shapes".to_string(),
        })
    }

    pub fn compile(&self) -> XapResult<CompiledTable> {
        let mut linker = SlotLinker::default();

        // Entry points own the first slots
        let entries = self
            .requests
            .iter()
            .map(|key| EntryRecord {
                shape: key.source.clone(),
                kind: key.kind,
                slot: linker.reserve(key),
            })
            .collect();

        let mut slots = Vec::new();
        while slots.len() < linker.order.len() {
            let key = linker.order[slots.len()].clone();
            let source = self.lookup(&key.source)?;
            let target = self.lookup(&key.target)?;

            let program =
                Generator::new(InlinePolicy::Deferred, 0, &mut linker).build(key.kind, source, target)?;
            slots.push(Arc::new(program));
        }

        info!(
            "Compiled codec table: {} entry point(s), {} program(s)",
            self.requests.len(),
            slots.len()
        );
        Ok(CompiledTable::new(slots, entries))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub shape: String,
    pub kind: CodecKind,
    pub slot: usize,
}

/// Programs addressed by slot, plus the requested entry points.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompiledTable {
    slots: Vec<Arc<Program>>,
    entries: Vec<EntryRecord>,
    #[serde(skip)]
    by_key: HashMap<CodecKey, usize>,
}

impl CompiledTable {
    fn new(slots: Vec<Arc<Program>>, entries: Vec<EntryRecord>) -> Self {
        let mut table = Self {
            slots,
            entries,
            by_key: HashMap::new(),
        };
        table.index();
        table
    }

    fn index(&mut self) {
        self.by_key = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, program)| (program.key.clone(), slot))
            .collect();
    }

    /// Every link and entry must point inside the table.
    fn validate(&self) -> XapResult<()> {
        for (slot, program) in self.slots.iter().enumerate() {
            for link in program.links() {
                match link {
                    Link::Slot(target) if *target < self.slots.len() => {}
                    Link::Slot(target) => {
                        return Err(XapError::InvalidArtifact(format!(
                            "program {} in slot {} links to missing slot {}",
                            program.key, slot, target
                        )));
                    }
                    Link::Cache(key) => {
                        return Err(XapError::InvalidArtifact(format!(
                            "program {} in slot {} links outside the table to {}",
                            program.key, slot, key
                        )));
                    }
                }
            }
        }

        if let Some(entry) = self.entries.iter().find(|entry| entry.slot >= self.slots.len()) {
            return Err(XapError::InvalidArtifact(format!(
                "entry point {:?} of `{}` refers to missing slot {}",
                entry.kind, entry.shape, entry.slot
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    pub fn slot(&self, slot: usize) -> Option<Arc<Program>> {
        self.slots.get(slot).cloned()
    }

    pub fn lookup(&self, key: &CodecKey) -> Option<Arc<Program>> {
        self.by_key.get(key).and_then(|slot| self.slot(*slot))
    }

    /// Entry point of the given kind for the shape named `shape`.
    pub fn entry(self: &Arc<Self>, shape: &str, kind: CodecKind) -> Option<EntryPoint> {
        let record = self
            .entries
            .iter()
            .find(|entry| entry.shape == shape && entry.kind == kind)?;
        Some(EntryPoint {
            program: self.slot(record.slot)?,
            table: self.clone(),
        })
    }

    pub fn encode(&self) -> XapResult<Vec<u8>> {
        let data = serde_cbor::to_vec(self).map_err(|e| {
            XapError::Unknown(format!("Failed to serialize compiled codec table: {}", e))
        })?;

        let version = semver::Version::parse(XAPCORE_VERSION)
            .map_err(|e| XapError::Unknown(format!("Invalid crate version: {}", e)))?;
        let storage = CompiledCodecStorage {
            magic: AOT_MAGIC_BYTES,
            version_req: semver::VersionReq {
                comparators: vec![semver::Comparator {
                    op: semver::Op::Exact,
                    major: version.major,
                    minor: Some(version.minor),
                    patch: Some(version.patch),
                    pre: version.pre.clone(),
                }],
            },
            data,
        };

        trace!(
            "Serializing compiled codec table wrapper with version requirement {}",
            storage.version_req
        );
        serde_cbor::to_vec(&storage).map_err(|e| {
            XapError::Unknown(format!(
                "Failed to serialize compiled codec table wrapper: {}",
                e
            ))
        })
    }

    pub fn decode(data: &[u8]) -> XapResult<Self> {
        debug!("Deserializing compiled codec table ({} bytes)", data.len());

        let storage: CompiledCodecStorage = serde_cbor::from_slice(data).map_err(|e| {
            XapError::InvalidArtifact(format!("cannot read table wrapper: {}", e))
        })?;

        if storage.magic != AOT_MAGIC_BYTES {
            return Err(XapError::InvalidArtifact("invalid magic bytes".to_string()));
        }

        let version = semver::Version::parse(XAPCORE_VERSION)
            .map_err(|e| XapError::Unknown(format!("Invalid crate version: {}", e)))?;
        if !storage.version_req.matches(&version) {
            return Err(XapError::IncompatibleArtifact {
                req: storage.version_req,
                version,
            });
        }

        let mut table: Self = serde_cbor::from_slice(&storage.data).map_err(|e| {
            XapError::InvalidArtifact(format!("cannot read table content: {}", e))
        })?;
        table.index();
        table.validate()?;
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> XapResult<()> {
        let data = self.encode()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn load(path: &Path) -> XapResult<Self> {
        let data = std::fs::read(path)?;
        Self::decode(&data)
    }
}

/// Compiled codec table storage format.
///
/// Kept stable across versions: the magic bytes identify the file, the version requirement
/// rejects tables produced by another version of this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledCodecStorage {
    pub magic: [u8; 8],
    pub version_req: semver::VersionReq,
    pub data: Vec<u8>,
}

/// A program of a compiled table, runnable without the table being installed.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    table: Arc<CompiledTable>,
    program: Arc<Program>,
}

impl EntryPoint {
    pub fn key(&self) -> &CodecKey {
        &self.program.key
    }

    fn expect_kind(&self, kind: CodecKind) -> XapResult<()> {
        if self.program.key.kind != kind {
            return Err(XapError::Unknown(format!(
                "entry point {} cannot be used as {:?}",
                self.program.key, kind
            )));
        }
        Ok(())
    }

    fn resolver<'a>(&self, runtime: &'a XapRuntime) -> Resolver<'a> {
        Resolver::new(runtime, Some(self.table.clone()))
    }

    pub fn serialize(
        &self,
        runtime: &XapRuntime,
        value: &dyn Struct,
        writer: &mut dyn Writer,
    ) -> XapResult<()> {
        self.expect_kind(CodecKind::Serialize)?;
        if value.shape().name() != self.program.key.source {
            return Err(XapError::UnsupportedConversion {
                from: value.shape().name().to_string(),
                to: self.program.key.source.clone(),
            });
        }
        exec::serialize(&self.resolver(runtime), &self.program, value, writer)
    }

    /// Decode a struct as the entry point's type. The type must be registered in `runtime`.
    pub fn deserialize(&self, runtime: &XapRuntime, reader: &mut dyn Reader) -> XapResult<ObjectRef> {
        self.expect_kind(CodecKind::Deserialize)?;
        reader.read_struct_begin()?;
        let mut value = runtime.instantiate(&self.program.key.target)?;
        exec::deserialize_body(&self.resolver(runtime), &self.program, reader, &mut *value)?;
        Ok(ObjectRef::new(value))
    }

    pub fn clone_value(&self, runtime: &XapRuntime, source: &dyn Struct) -> XapResult<ObjectRef> {
        self.expect_kind(CodecKind::Clone)?;
        if source.shape().name() != self.program.key.source {
            return Err(XapError::UnsupportedConversion {
                from: source.shape().name().to_string(),
                to: self.program.key.source.clone(),
            });
        }
        let mut value = runtime.instantiate(&self.program.key.target)?;
        exec::clone_body(&self.resolver(runtime), &self.program, source, &mut *value)?;
        Ok(ObjectRef::new(value))
    }
}
