//! Process-wide codec runtime
//!
//! [`XapRuntime`] owns everything the bonded layer needs at run time: the shape registry,
//! the type factory table, the codec cache and the installed compiled table, if any.
//! [`XapRuntime::global`] is created on first use from the configuration file and lives
//! for the rest of the process.
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, trace, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use xapschema::{SchemaRef, Shape, ShapeRegistry, protocol::{Reader, Writer}};

use crate::{
    aot::CompiledTable,
    base::meta::CodecConfig,
    codec::{
        CodecKey, CodecKind, Program,
        cache::CodecCache,
        exec::{self, Resolver},
        generator::{CacheLinker, Generator},
    },
    reflect::{ObjectRef, Struct, StructFactory, StructType},
    utils::error::{XapError, XapResult},
};

static GLOBAL: Lazy<XapRuntime> = Lazy::new(XapRuntime::from_environment);

pub struct XapRuntime {
    config: CodecConfig,
    shapes: ShapeRegistry,
    factories: DashMap<&'static str, StructFactory>,
    codecs: CodecCache<CodecKey, Arc<Program>>,
    precompiled: RwLock<Option<Arc<CompiledTable>>>,
}

impl XapRuntime {
    /// The process-wide runtime, used by bonded values.
    pub fn global() -> &'static XapRuntime {
        &GLOBAL
    }

    /// Runtime configured from [`CodecConfig::default_path`]. A missing or invalid file
    /// falls back to the default configuration.
    pub fn from_environment() -> Self {
        let path = CodecConfig::default_path();
        let config = if path.exists() {
            CodecConfig::load_from_toml(&path).unwrap_or_else(|err| {
                warn!(
                    "Ignoring codec configuration '{}': {}",
                    path.display(),
                    err
                );
                CodecConfig::default()
            })
        } else {
            debug!(
                "No codec configuration at '{}', using defaults",
                path.display()
            );
            CodecConfig::default()
        };

        let artifact = config.aot_artifact.clone();
        let runtime = Self::with_config(config);
        if let Some(artifact) = artifact {
            match CompiledTable::load(&artifact) {
                Ok(table) => runtime.install(table),
                Err(err) => warn!(
                    "Cannot install compiled codec table '{}': {}",
                    artifact.display(),
                    err
                ),
            }
        }
        runtime
    }

    pub fn with_config(config: CodecConfig) -> Self {
        let runtime = Self {
            config,
            shapes: ShapeRegistry::new(),
            factories: DashMap::new(),
            codecs: CodecCache::new(),
            precompiled: RwLock::new(None),
        };

        for factory in inventory::iter::<StructFactory> {
            if let Err(err) = runtime.add_factory(*factory) {
                warn!("Skipping registered type {:?}: {}", factory, err);
            }
        }

        info!(
            "Codec runtime ready: {} type(s), {} shape(s), {:?} policy",
            runtime.factories.len(),
            runtime.shapes.len(),
            runtime.config.inline_policy
        );
        runtime
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    pub fn codecs(&self) -> &CodecCache<CodecKey, Arc<Program>> {
        &self.codecs
    }

    fn add_factory(&self, factory: StructFactory) -> XapResult<()> {
        let shape = (factory.shape)();
        self.shapes.register_closure(shape)?;
        self.factories.entry(shape.name()).or_insert(factory);
        Ok(())
    }

    /// Enter `T` in the type factory table. No-op if it is already there.
    pub fn register<T: StructType>(&self) -> XapResult<()> {
        if self.factories.contains_key(T::static_shape().name()) {
            return Ok(());
        }
        debug!("Registering type `{}`", T::static_shape().name());
        self.add_factory(StructFactory::of::<T>())
    }

    pub fn factory(&self, name: &str) -> Option<StructFactory> {
        self.factories.get(name).map(|entry| *entry)
    }

    /// Default value of the type registered under `name`.
    pub fn instantiate(&self, name: &str) -> XapResult<Box<dyn Struct>> {
        let factory = self
            .factory(name)
            .ok_or_else(|| XapError::KeyNotFound {
                key: name.to_string(),
                context: "type factory table".to_string(),
            })?;
        Ok((factory.make)())
    }

    /// Type to build for data of runtime type `name` requested as `declared`: the type
    /// registered under `name` when it is assignable to `declared`, `declared` otherwise.
    pub fn choose_runtime(&self, name: &str, declared: &'static Shape) -> &'static Shape {
        match self.factory(name) {
            Some(factory) if (factory.shape)().is_assignable_to(declared) => (factory.shape)(),
            _ => declared,
        }
    }

    fn ensure_shape(&self, shape: &'static Shape) -> XapResult<()> {
        if self
            .shapes
            .get(shape.name())
            .is_some_and(|known| std::ptr::eq(known, shape))
        {
            return Ok(());
        }
        self.shapes.register_closure(shape)?;
        Ok(())
    }

    /// Install a compiled table. Its programs take precedence over the cache.
    pub fn install(&self, table: CompiledTable) {
        info!(
            "Installing compiled codec table: {} program(s), {} entry point(s)",
            table.len(),
            table.entries().len()
        );
        *self.precompiled.write() = Some(Arc::new(table));
    }

    pub fn precompiled(&self) -> Option<Arc<CompiledTable>> {
        self.precompiled.read().clone()
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self, self.precompiled())
    }

    /// The program for `key`, from the installed table or the cache.
    pub fn program(&self, key: &CodecKey) -> XapResult<Arc<Program>> {
        if let Some(program) = self.precompiled().and_then(|table| table.lookup(key)) {
            return Ok(program);
        }
        self.cached_program(key)
    }

    /// The program for `key` from the cache, built on first use. Shapes are resolved by name
    /// through the registry.
    pub(crate) fn cached_program(&self, key: &CodecKey) -> XapResult<Arc<Program>> {
        self.codecs.get_or_build(key, || {
            let source = self.lookup_shape(&key.source)?;
            let target = self.lookup_shape(&key.target)?;
            debug!("Building codec {}", key);

            let mut linker = CacheLinker;
            Generator::new(
                self.config.inline_policy,
                self.config.max_inline_depth,
                &mut linker,
            )
            .build(key.kind, source, target)
            .map(Arc::new)
            .inspect_err(|err| debug!("Codec {} not cached: {}", key, err))
        })
    }

    fn lookup_shape(&self, name: &str) -> XapResult<&'static Shape> {
        self.shapes.get(name).ok_or_else(|| XapError::KeyNotFound {
            key: name.to_string(),
            context: "shape registry".to_string(),
        })
    }

    /// The program of the given kind between two shapes.
    pub fn codec(
        &self,
        kind: CodecKind,
        source: &'static Shape,
        target: &'static Shape,
    ) -> XapResult<Arc<Program>> {
        self.ensure_shape(source)?;
        self.ensure_shape(target)?;
        self.program(&CodecKey::new(kind, source, target))
    }

    /// Encode `value` with its exact runtime type.
    pub fn serialize(&self, value: &dyn Struct, writer: &mut dyn Writer) -> XapResult<()> {
        let shape = value.shape();
        let program = self.codec(CodecKind::Serialize, shape, shape)?;
        exec::serialize(&self.resolver(), &program, value, writer)
    }

    /// Decode the struct `reader` is positioned on as a value assignable to `declared`.
    ///
    /// The payload is described by the registered shape of the name written with the
    /// struct, unless `schema` is given and that shape does not derive from it. The value
    /// built is of the describing type when it is registered and assignable to `declared`,
    /// see [`XapRuntime::choose_runtime`].
    ///
    /// Data of a type unrelated to `declared` is rejected with
    /// [`XapError::UnsupportedConversion`].
    pub fn deserialize(
        &self,
        reader: &mut dyn Reader,
        schema: SchemaRef,
        declared: &'static Shape,
    ) -> XapResult<ObjectRef> {
        let name = reader.read_struct_begin()?;
        let payload = self.shapes.get(&name);
        let source = match (schema.shape(), payload) {
            (Some(schema), Some(payload)) if payload.is_assignable_to(schema) => payload,
            (Some(schema), _) => schema,
            (None, Some(payload)) => payload,
            (None, None) => declared,
        };

        for shape in payload.into_iter().chain([source]) {
            if !shape.is_related_to(declared) {
                return Err(XapError::UnsupportedConversion {
                    from: shape.name().to_string(),
                    to: declared.name().to_string(),
                });
            }
        }

        let runtime = self.choose_runtime(source.name(), declared);
        trace!("Decoding `{}` as {} through {}", name, runtime.name(), source.name());
        let program = self.codec(CodecKind::Deserialize, source, runtime)?;
        let mut value = self.instantiate(runtime.name())?;
        exec::deserialize_body(&self.resolver(), &program, reader, &mut *value)?;
        Ok(ObjectRef::new(value))
    }

    /// Copy `source` into a fresh value assignable to `declared`, keeping its exact runtime
    /// type when possible.
    pub fn deep_clone(&self, source: &dyn Struct, declared: &'static Shape) -> XapResult<ObjectRef> {
        let runtime = self.choose_runtime(source.shape().name(), declared);
        let program = self.codec(CodecKind::Clone, source.shape(), runtime)?;
        let mut value = self.instantiate(runtime.name())?;
        exec::clone_body(&self.resolver(), &program, source, &mut *value)?;
        Ok(ObjectRef::new(value))
    }
}

impl Default for XapRuntime {
    fn default() -> Self {
        Self::with_config(CodecConfig::default())
    }
}
