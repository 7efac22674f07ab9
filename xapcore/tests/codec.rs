use std::{sync::Arc, thread};

use xapcore::{
    base::{meta::CodecConfig, runtime::XapRuntime},
    codec::{CodecKey, CodecKind, InlinePolicy, Step},
    reflect::{ObjectRef, Struct, StructType, view},
    tests_utils::{B, C, Even, Loose, Mixed, Point, Strict, Tree},
    utils::error::XapError,
};
use xapschema::{
    ProtocolError, SchemaRef,
    protocol::{CompactWriter, FieldHeader, MAX_NESTING_DEPTH, WireType, Writer},
};

fn runtime(policy: InlinePolicy) -> XapRuntime {
    XapRuntime::with_config(CodecConfig {
        inline_policy: policy,
        ..Default::default()
    })
}

fn encode(runtime: &XapRuntime, value: &dyn Struct) -> CompactWriter {
    let mut writer = CompactWriter::new();
    runtime
        .serialize(value, &mut writer)
        .expect("serialization should succeed");
    writer
}

fn decode<T: StructType>(runtime: &XapRuntime, writer: &CompactWriter) -> Result<ObjectRef, XapError> {
    let mut reader = writer.to_reader();
    runtime.deserialize(&mut reader, SchemaRef::EMPTY, T::static_shape())
}

fn decoded<T: StructType + Clone>(object: &ObjectRef) -> T {
    let guard = object.read();
    view::<T>(&**guard).expect("decoded object has the requested type").clone()
}

#[test]
fn every_scalar_type_round_trips() {
    for policy in [InlinePolicy::Inline, InlinePolicy::Deferred] {
        let runtime = runtime(policy);
        let sample = Mixed::sample();
        let object = decode::<Mixed>(&runtime, &encode(&runtime, &sample)).unwrap();
        assert_eq!(decoded::<Mixed>(&object), sample, "policy {:?}", policy);
    }
}

#[test]
fn recursive_shapes_round_trip() {
    for policy in [InlinePolicy::Inline, InlinePolicy::Deferred] {
        let runtime = runtime(policy);

        let tree = Tree::complete(5, 1);
        let object = decode::<Tree>(&runtime, &encode(&runtime, &tree)).unwrap();
        assert_eq!(decoded::<Tree>(&object), tree, "policy {:?}", policy);

        let chain = Even::chain(9);
        let object = decode::<Even>(&runtime, &encode(&runtime, &chain)).unwrap();
        assert_eq!(decoded::<Even>(&object), chain, "policy {:?}", policy);
    }
}

#[test]
fn absent_nullable_fields_stay_absent() {
    let runtime = runtime(InlinePolicy::Inline);
    let tree = Tree::node(1, None, Some(Tree::leaf(2)));
    let object = decode::<Tree>(&runtime, &encode(&runtime, &tree)).unwrap();

    let decoded = decoded::<Tree>(&object);
    assert!(decoded.left.is_none());
    assert_eq!(decoded.right.map(|t| t.value), Some(2));
}

#[test]
fn runtime_type_is_restored_from_the_payload() {
    let runtime = runtime(InlinePolicy::Inline);
    runtime.register::<C>().unwrap();

    let object = decode::<B>(&runtime, &encode(&runtime, &C::new("derived", 4, 2))).unwrap();
    assert_eq!(object.shape(), C::static_shape());
    let guard = object.read();
    let c = view::<C>(&**guard).unwrap();
    assert_eq!((c.base.name.as_str(), c.base.x, c.c), ("derived", 4, 2));
}

#[test]
fn deep_clone_keeps_the_runtime_type() {
    let runtime = runtime(InlinePolicy::Inline);
    runtime.register::<C>().unwrap();

    let source = C::new("source", 1, 2);
    let copy = runtime.deep_clone(&source, B::static_shape()).unwrap();
    assert_eq!(copy.shape(), C::static_shape());

    let guard = copy.read();
    assert_eq!(view::<C>(&**guard).unwrap().c, 2);
}

#[test]
fn unknown_fields_are_skipped() {
    let runtime = runtime(InlinePolicy::Inline);
    let mut writer = CompactWriter::new();
    writer.write_struct_begin("Xap.B").unwrap();
    writer
        .write_field_header(FieldHeader::Field {
            id: 9,
            wire: WireType::Struct,
        })
        .unwrap();
    runtime.serialize(&Tree::complete(3, 0), &mut writer).unwrap();
    writer
        .write_field_header(FieldHeader::Field {
            id: 1,
            wire: WireType::ZigZag,
        })
        .unwrap();
    writer.write_zigzag(-4).unwrap();
    writer.write_field_header(FieldHeader::Stop).unwrap();

    let object = decode::<B>(&runtime, &writer).unwrap();
    let guard = object.read();
    assert_eq!(view::<B>(&**guard).unwrap().x, -4);

    let program = runtime
        .codec(
            CodecKind::Deserialize,
            Strict::static_shape(),
            Loose::static_shape(),
        )
        .unwrap();
    assert!(program.levels[0].steps.iter().any(Step::is_skip));
}

#[test]
fn unrelated_payloads_are_rejected() {
    let runtime = runtime(InlinePolicy::Inline);
    let strict = Strict::new(77, "kept");

    let err = decode::<Loose>(&runtime, &encode(&runtime, &strict)).unwrap_err();
    assert!(err.is_unsupported_conversion(), "unexpected error: {}", err);

    let err = decode::<B>(&runtime, &encode(&runtime, &Tree::leaf(5))).unwrap_err();
    assert!(err.is_unsupported_conversion(), "unexpected error: {}", err);

    // A base payload still fills a derived value
    let object = decode::<C>(&runtime, &encode(&runtime, &B::new("base", 3))).unwrap();
    assert_eq!(object.shape(), C::static_shape());
    let guard = object.read();
    assert_eq!(view::<C>(&**guard).unwrap().base.x, 3);
}

#[test]
fn payload_type_wins_over_a_base_schema() {
    let runtime = runtime(InlinePolicy::Inline);
    let payload = encode(&runtime, &C::new("derived", 1, 7));

    let mut reader = payload.to_reader();
    let object = runtime
        .deserialize(&mut reader, SchemaRef::new(B::static_shape()), B::static_shape())
        .unwrap();
    assert_eq!(object.shape(), C::static_shape());
    let guard = object.read();
    assert_eq!(view::<C>(&**guard).unwrap().c, 7);
}

#[test]
fn failed_builds_are_not_cached() {
    let runtime = runtime(InlinePolicy::Inline);
    let key = CodecKey::deserialize(Loose::static_shape(), Strict::static_shape());
    let build = || {
        runtime.codec(
            CodecKind::Deserialize,
            Loose::static_shape(),
            Strict::static_shape(),
        )
    };

    let err = build().unwrap_err();
    assert!(err.is_codec_build(), "unexpected error: {}", err);
    assert!(!runtime.codecs().contains(&key));
    let builds = runtime.codecs().builds();

    let err = build().unwrap_err();
    assert!(err.is_codec_build());
    assert_eq!(runtime.codecs().builds(), builds + 1, "the build is attempted again");
}

#[test]
fn deep_payloads_are_a_decode_error() {
    let runtime = runtime(InlinePolicy::Deferred);

    for (levels, ok) in [(MAX_NESTING_DEPTH, true), (MAX_NESTING_DEPTH + 1, false), (200_000, false)] {
        let mut writer = CompactWriter::new();
        for _ in 1..levels {
            writer.write_struct_begin("Xap.Tree").unwrap();
            writer
                .write_field_header(FieldHeader::Field {
                    id: 1,
                    wire: WireType::Struct,
                })
                .unwrap();
        }
        writer.write_struct_begin("Xap.Tree").unwrap();
        for _ in 0..levels {
            writer.write_field_header(FieldHeader::Stop).unwrap();
        }

        match decode::<Tree>(&runtime, &writer) {
            Ok(object) => {
                assert!(ok, "{} levels decoded", levels);
                assert_eq!(decoded::<Tree>(&object).len(), levels);
            }
            Err(XapError::Decode(err)) => {
                assert!(!ok && err.is_depth_exceeded(), "unexpected error: {}", err)
            }
            Err(err) => panic!("unexpected error: {}", err),
        }
    }
}

#[test]
fn narrowing_overflow_is_a_decode_error() {
    let runtime = runtime(InlinePolicy::Inline);
    let mut writer = CompactWriter::new();
    writer.write_struct_begin("Xap.B").unwrap();
    writer
        .write_field_header(FieldHeader::Field {
            id: 1,
            wire: WireType::ZigZag,
        })
        .unwrap();
    writer.write_zigzag(i64::from(i32::MAX) + 1).unwrap();
    writer.write_field_header(FieldHeader::Stop).unwrap();

    match decode::<B>(&runtime, &writer) {
        Err(XapError::Decode(ProtocolError::ValueOutOfRange { target, .. })) => {
            assert_eq!(target, "i32")
        }
        other => panic!("expected an out of range error, got {:?}", other),
    }
}

#[test]
fn mismatching_wire_types_are_skipped() {
    let runtime = runtime(InlinePolicy::Inline);
    let mut writer = CompactWriter::new();
    writer.write_struct_begin("Xap.B").unwrap();
    writer
        .write_field_header(FieldHeader::Field {
            id: 1,
            wire: WireType::Bytes,
        })
        .unwrap();
    writer.write_string("not a number").unwrap();
    writer
        .write_field_header(FieldHeader::Field {
            id: 0,
            wire: WireType::Bytes,
        })
        .unwrap();
    writer.write_string("name").unwrap();
    writer.write_field_header(FieldHeader::Stop).unwrap();

    let object = decode::<B>(&runtime, &writer).unwrap();
    let guard = object.read();
    let b = view::<B>(&**guard).unwrap();
    assert_eq!((b.name.as_str(), b.x), ("name", 0));
}

#[test]
fn concurrent_first_use_builds_once() {
    let runtime = runtime(InlinePolicy::Inline);

    let programs: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    runtime
                        .codec(
                            CodecKind::Serialize,
                            Tree::static_shape(),
                            Tree::static_shape(),
                        )
                        .expect("build should succeed")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(runtime.codecs().builds(), 1);
    assert!(programs.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn deferred_links_are_resolved_through_the_cache() {
    let runtime = runtime(InlinePolicy::Deferred);
    let sample = Mixed::sample();
    encode(&runtime, &sample);

    let nested = CodecKey::serialize(Point::static_shape());
    assert!(runtime.codecs().contains(&nested), "nested program built on use");
}
