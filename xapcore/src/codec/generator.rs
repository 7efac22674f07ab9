//! Program generation
//!
//! The generator walks a shape hierarchy base first and emits one [`Step`] per field, in id
//! order. Nested structs are embedded while the [`InlinePolicy`] allows it; a shape already
//! being generated higher up the stack is always deferred, otherwise generating a recursive
//! shape would never terminate.
use std::sync::Arc;

use log::{debug, trace};
use xapschema::{FieldDef, FieldType, Shape};

use crate::{
    codec::{CodecKey, CodecKind, InlinePolicy, Level, Link, Program, Step},
    utils::error::{XapError, XapResult},
};

/// Decides how a deferred step refers to its program.
pub trait Linker {
    fn link(&mut self, key: &CodecKey) -> Link;
}

/// Links through the runtime codec cache. Linked programs are built on first use.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheLinker;

impl Linker for CacheLinker {
    fn link(&mut self, key: &CodecKey) -> Link {
        Link::Cache(key.clone())
    }
}

pub struct Generator<'l> {
    policy: InlinePolicy,
    max_inline_depth: usize,
    linker: &'l mut dyn Linker,
    stack: Vec<CodecKey>,
}

fn build_error(key: &CodecKey, reason: String) -> XapError {
    XapError::CodecBuild {
        key: key.to_string(),
        reason,
    }
}

impl<'l> Generator<'l> {
    pub fn new(policy: InlinePolicy, max_inline_depth: usize, linker: &'l mut dyn Linker) -> Self {
        Self {
            policy,
            max_inline_depth,
            linker,
            stack: Vec::new(),
        }
    }

    /// Generate the program reading `source` and producing `target`.
    ///
    /// For [`CodecKind::Serialize`] both shapes must be the same.
    pub fn build(
        &mut self,
        kind: CodecKind,
        source: &'static Shape,
        target: &'static Shape,
    ) -> XapResult<Program> {
        let key = CodecKey::new(kind, source, target);
        if kind.is_serialize() && source != target {
            return Err(build_error(
                &key,
                "a serializer reads and writes the same shape".to_string(),
            ));
        }

        self.stack.push(key.clone());
        let levels = match kind {
            CodecKind::Serialize => self.serialize_levels(source),
            CodecKind::Deserialize | CodecKind::Clone => {
                self.mapped_levels(&key, source, target)
            }
        };
        self.stack.pop();

        let levels = levels?;
        trace!("Generated {} ({} levels)", key, levels.len());
        Ok(Program { key, levels })
    }

    fn serialize_levels(&mut self, shape: &'static Shape) -> XapResult<Vec<Level>> {
        let mut levels = Vec::with_capacity(shape.depth());
        for level in shape.hierarchy() {
            let mut steps = Vec::with_capacity(level.fields().len());
            for field in level.fields() {
                let step = match field.ty {
                    FieldType::Scalar(ty) => Step::Scalar { id: field.id, ty },
                    FieldType::Struct(link) | FieldType::Nullable(link) => {
                        self.nested(field.id, CodecKind::Serialize, link(), link())?
                    }
                    FieldType::Bonded(_) => Step::Bonded { id: field.id },
                };
                steps.push(step);
            }
            levels.push(Level {
                shape: level.name().to_string(),
                steps,
            });
        }
        Ok(levels)
    }

    /// Levels of `target`, each matched with the level of `source` at the same depth.
    fn mapped_levels(
        &mut self,
        key: &CodecKey,
        source: &'static Shape,
        target: &'static Shape,
    ) -> XapResult<Vec<Level>> {
        let source_levels = source.hierarchy();
        let target_levels = target.hierarchy();

        let mut levels = Vec::with_capacity(target_levels.len());
        for (idx, target_level) in target_levels.iter().enumerate() {
            let source_level = source_levels.get(idx).copied();
            let mut steps = Vec::new();

            for field in target_level.fields() {
                let source_field = source_level.and_then(|level| level.field(field.id));
                let step = match source_field {
                    Some(source_field) => self.mapped_step(key.kind, source_field, field)?,
                    None => None,
                };

                match step {
                    Some(step) => steps.push(step),
                    None if field.modifier.is_required() => {
                        let reason = match source_field {
                            Some(source_field) => format!(
                                "required field `{}` ({}) of `{}` is {:?} in the target but {:?} in the source",
                                field.name,
                                field.id,
                                target_level.name(),
                                field.ty,
                                source_field.ty
                            ),
                            None => format!(
                                "required field `{}` ({}) of `{}` has no counterpart in the source",
                                field.name,
                                field.id,
                                target_level.name()
                            ),
                        };
                        return Err(build_error(key, reason));
                    }
                    None if source_field.is_some() && key.kind.is_deserialize() => {
                        steps.push(Step::Skip { id: field.id });
                    }
                    None => {}
                }
            }

            // Fields only the source knows about are read and dropped
            if let (CodecKind::Deserialize, Some(source_level)) = (key.kind, source_level) {
                for field in source_level.fields() {
                    if target_level.field(field.id).is_none() {
                        steps.push(Step::Skip { id: field.id });
                    }
                }
            }

            steps.sort_by_key(Step::id);
            levels.push(Level {
                shape: target_level.name().to_string(),
                steps,
            });
        }
        Ok(levels)
    }

    /// Step copying `source` into `target`, `None` if their types are incompatible.
    fn mapped_step(
        &mut self,
        kind: CodecKind,
        source: &FieldDef,
        target: &FieldDef,
    ) -> XapResult<Option<Step>> {
        let step = match (source.ty, target.ty) {
            (FieldType::Scalar(a), FieldType::Scalar(b)) if a == b => Some(Step::Scalar {
                id: target.id,
                ty: b,
            }),
            (
                FieldType::Struct(a) | FieldType::Nullable(a),
                FieldType::Struct(b) | FieldType::Nullable(b),
            ) => {
                let (a, b) = (a(), b());
                // A nested value of the source must fit in the target field
                if a.is_assignable_to(b) {
                    Some(self.nested(target.id, kind, a, b)?)
                } else {
                    None
                }
            }
            (FieldType::Bonded(_), FieldType::Bonded(_)) => Some(Step::Bonded { id: target.id }),
            _ => None,
        };
        Ok(step)
    }

    fn nested(
        &mut self,
        id: u16,
        kind: CodecKind,
        source: &'static Shape,
        target: &'static Shape,
    ) -> XapResult<Step> {
        let key = CodecKey::new(kind, source, target);
        let recursive = self.stack.contains(&key);

        if self.policy.is_inline() && !recursive && self.stack.len() <= self.max_inline_depth {
            let program = self.build(kind, source, target)?;
            return Ok(Step::Inline {
                id,
                program: Arc::new(program),
            });
        }

        if recursive {
            debug!("{} is recursive, field {} goes through a link", key, id);
        }
        Ok(Step::Deferred {
            id,
            link: self.linker.link(&key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reflect::StructType,
        tests_utils::{B, C, Loose, Mixed, Strict, Tree},
    };

    fn generate(
        policy: InlinePolicy,
        kind: CodecKind,
        source: &'static Shape,
        target: &'static Shape,
    ) -> XapResult<Program> {
        let mut linker = CacheLinker;
        Generator::new(policy, 8, &mut linker).build(kind, source, target)
    }

    #[test]
    fn test_steps_follow_field_ids_base_first() {
        let program = generate(
            InlinePolicy::Inline,
            CodecKind::Serialize,
            C::static_shape(),
            C::static_shape(),
        )
        .expect("serializer of C");

        assert_eq!(program.levels.len(), 2);
        assert_eq!(program.levels[0].shape, B::static_shape().name());
        assert_eq!(program.levels[1].shape, C::static_shape().name());
        for level in &program.levels {
            let ids: Vec<_> = level.steps.iter().map(Step::id).collect();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted, "steps of {} out of order", level.shape);
        }
    }

    #[test]
    fn test_recursive_shape_is_deferred() {
        let program = generate(
            InlinePolicy::Inline,
            CodecKind::Deserialize,
            Tree::static_shape(),
            Tree::static_shape(),
        )
        .expect("deserializer of Tree");

        let links = program.links();
        assert!(!links.is_empty());
        assert!(
            links
                .iter()
                .all(|link| matches!(link, Link::Cache(key) if key.source == Tree::static_shape().name()))
        );
    }

    #[test]
    fn test_deferred_policy_never_inlines() {
        let program = generate(
            InlinePolicy::Deferred,
            CodecKind::Serialize,
            Mixed::static_shape(),
            Mixed::static_shape(),
        )
        .expect("serializer of Mixed");

        assert!(
            program
                .levels
                .iter()
                .flat_map(|level| level.steps.iter())
                .all(|step| !step.is_inline())
        );
    }

    #[test]
    fn test_missing_required_field_fails() {
        let err = generate(
            InlinePolicy::Inline,
            CodecKind::Deserialize,
            Loose::static_shape(),
            Strict::static_shape(),
        )
        .expect_err("Strict requires a field Loose does not have");
        assert!(err.is_codec_build());
    }

    #[test]
    fn test_source_only_fields_are_skipped() {
        let program = generate(
            InlinePolicy::Inline,
            CodecKind::Deserialize,
            Strict::static_shape(),
            Loose::static_shape(),
        )
        .expect("Loose reads Strict");

        let level = &program.levels[0];
        assert!(level.steps.iter().any(Step::is_skip));
    }
}
