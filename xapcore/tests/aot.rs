use std::sync::Arc;

use xapcore::{
    aot::{AotCompiler, CompiledCodecStorage, CompiledTable},
    base::runtime::XapRuntime,
    codec::{CodecKey, CodecKind, Link, Step},
    magic::AOT_MAGIC_BYTES,
    reflect::{StructType, view},
    tests_utils::{Even, Mixed, Odd, Tree},
};
use xapschema::protocol::CompactWriter;

fn compile_sample() -> CompiledTable {
    let mut compiler = AotCompiler::new();
    compiler
        .add::<Tree>(&[CodecKind::Serialize, CodecKind::Deserialize])
        .unwrap()
        .add::<Even>(&[CodecKind::Deserialize, CodecKind::Clone])
        .unwrap()
        .add::<Mixed>(&[CodecKind::Serialize])
        .unwrap();
    compiler.compile().expect("compilation should succeed")
}

#[test]
fn entry_points_own_the_first_slots() {
    let table = compile_sample();

    let slots: Vec<_> = table.entries().iter().map(|entry| entry.slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 3, 4]);
    assert_eq!(table.entries()[2].shape, Even::static_shape().name());
    assert_eq!(table.entries()[2].kind, CodecKind::Deserialize);

    let entry = table
        .slot(0)
        .expect("slot 0 is filled");
    assert_eq!(entry.key, CodecKey::serialize(Tree::static_shape()));
}

#[test]
fn bodies_call_siblings_by_slot() {
    let table = compile_sample();

    for slot in 0..table.len() {
        let program = table.slot(slot).unwrap();
        for link in program.links() {
            match link {
                Link::Slot(target) => assert!(*target < table.len()),
                Link::Cache(key) => panic!("{} escapes the table through {}", program.key, key),
            }
        }
        assert!(
            program
                .levels
                .iter()
                .flat_map(|level| &level.steps)
                .all(|step| !matches!(step, Step::Inline { .. })),
            "compiled programs never inline"
        );
    }

    // Tree refers to itself
    let tree = table.slot(1).unwrap();
    assert!(tree.links().contains(&&Link::Slot(1)));

    // Even and Odd refer to each other
    let odd = CodecKey::deserialize(Odd::static_shape(), Odd::static_shape());
    let odd_program = table.lookup(&odd).expect("reachable programs get a slot");
    assert!(odd_program.links().contains(&&Link::Slot(2)));
}

#[test]
fn entry_points_run_without_installation() {
    let runtime = XapRuntime::default();
    let table = Arc::new(compile_sample());

    let serialize = table
        .entry(Tree::static_shape().name(), CodecKind::Serialize)
        .unwrap();
    let deserialize = table
        .entry(Tree::static_shape().name(), CodecKind::Deserialize)
        .unwrap();

    let tree = Tree::complete(4, 10);
    let mut writer = CompactWriter::new();
    serialize.serialize(&runtime, &tree, &mut writer).unwrap();
    let object = deserialize
        .deserialize(&runtime, &mut writer.to_reader())
        .unwrap();

    let guard = object.read();
    assert_eq!(view::<Tree>(&**guard), Some(&tree));
    assert_eq!(runtime.codecs().builds(), 0, "the cache was never used");

    let clone = table
        .entry(Even::static_shape().name(), CodecKind::Clone)
        .unwrap();
    let chain = Even::chain(5);
    let copy = clone.clone_value(&runtime, &chain).unwrap();
    assert_eq!(view::<Even>(&**copy.read()), Some(&chain));

    assert!(serialize.deserialize(&runtime, &mut writer.to_reader()).is_err());
}

#[test]
fn installed_table_takes_precedence() {
    let runtime = XapRuntime::default();
    runtime.install(compile_sample());

    let key = CodecKey::serialize(Tree::static_shape());
    let program = runtime
        .codec(CodecKind::Serialize, Tree::static_shape(), Tree::static_shape())
        .unwrap();
    let installed = runtime.precompiled().unwrap().lookup(&key).unwrap();
    assert!(Arc::ptr_eq(&program, &installed));

    let mut writer = CompactWriter::new();
    runtime.serialize(&Tree::complete(3, 0), &mut writer).unwrap();
    assert_eq!(runtime.codecs().builds(), 0);
}

#[test]
fn tables_survive_encoding() {
    let table = compile_sample();
    let bytes = table.encode().unwrap();
    let decoded = CompiledTable::decode(&bytes).unwrap();

    assert_eq!(decoded.len(), table.len());
    assert_eq!(decoded.entries(), table.entries());
    let key = CodecKey::deserialize(Odd::static_shape(), Odd::static_shape());
    assert!(decoded.lookup(&key).is_some(), "the key index is rebuilt");
}

#[test]
fn foreign_artifacts_are_rejected() {
    let table = compile_sample();
    let bytes = table.encode().unwrap();
    let storage: CompiledCodecStorage = serde_cbor::from_slice(&bytes).unwrap();

    let mut bad_magic = storage.clone();
    bad_magic.magic = *b"\0NOTXAP\0";
    let err = CompiledTable::decode(&serde_cbor::to_vec(&bad_magic).unwrap()).unwrap_err();
    assert!(err.is_invalid_artifact());

    let mut old = storage.clone();
    old.version_req = semver::VersionReq::parse("=0.0.1").unwrap();
    let err = CompiledTable::decode(&serde_cbor::to_vec(&old).unwrap()).unwrap_err();
    assert!(err.is_incompatible_artifact());

    let mut garbage = storage;
    garbage.data = vec![0xff; 16];
    assert_eq!(garbage.magic, AOT_MAGIC_BYTES);
    let err = CompiledTable::decode(&serde_cbor::to_vec(&garbage).unwrap()).unwrap_err();
    assert!(err.is_invalid_artifact());
}
