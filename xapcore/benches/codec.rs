use criterion::{Criterion, black_box, criterion_group, criterion_main};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use xapcore::{
    base::{meta::CodecConfig, runtime::XapRuntime},
    bonded::Bonded,
    codec::InlinePolicy,
    reflect::StructType,
    tests_utils::{B, C, Mixed, Tree},
};
use xapschema::{SchemaRef, protocol::CompactWriter};

fn build_random_tree(budget: usize, rng: &mut impl Rng) -> Tree {
    let value = rng.random_range(-1000..1000);
    if budget == 0 || rng.random_bool(0.2) {
        return Tree::leaf(value);
    }

    let left = rng
        .random_bool(0.8)
        .then(|| build_random_tree(budget - 1, rng));
    let right = rng
        .random_bool(0.8)
        .then(|| build_random_tree(budget - 1, rng));
    Tree::node(value, left, right)
}

fn bench_round_trip(c: &mut Criterion) {
    for policy in [InlinePolicy::Inline, InlinePolicy::Deferred] {
        let runtime = XapRuntime::with_config(CodecConfig {
            inline_policy: policy,
            ..Default::default()
        });
        let name = format!("{:?}", policy).to_lowercase();

        let sample = Mixed::sample();
        let mut writer = CompactWriter::new();
        runtime.serialize(&sample, &mut writer).unwrap();

        c.bench_function(&format!("serialize_mixed_{}", name), |b| {
            b.iter(|| {
                let mut writer = CompactWriter::new();
                runtime.serialize(black_box(&sample), &mut writer).unwrap();
                black_box(writer);
            })
        });

        c.bench_function(&format!("deserialize_mixed_{}", name), |b| {
            b.iter(|| {
                let mut reader = writer.to_reader();
                black_box(
                    runtime
                        .deserialize(&mut reader, SchemaRef::EMPTY, Mixed::static_shape())
                        .unwrap(),
                );
            })
        });

        // Seeded for determinism
        let mut rng = ChaCha20Rng::seed_from_u64(0x42);
        let tree = build_random_tree(12, &mut rng);
        let mut writer = CompactWriter::new();
        runtime.serialize(&tree, &mut writer).unwrap();

        c.bench_function(&format!("deserialize_tree_{}", name), |b| {
            b.iter(|| {
                let mut reader = writer.to_reader();
                black_box(
                    runtime
                        .deserialize(&mut reader, SchemaRef::EMPTY, Tree::static_shape())
                        .unwrap(),
                );
            })
        });

        c.bench_function(&format!("deep_clone_tree_{}", name), |b| {
            b.iter(|| {
                black_box(runtime.deep_clone(&tree, Tree::static_shape()).unwrap());
            })
        });
    }
}

fn bench_bonded(c: &mut Criterion) {
    let local = Bonded::<B>::from_local(C::new("derived", 1, 2)).unwrap();
    let mut writer = CompactWriter::new();
    local.serialize(&mut writer).unwrap();
    let reader = writer.to_reader();

    // Every iteration starts from an undecoded payload
    c.bench_function("bonded_remote_first_value", |b| {
        b.iter(|| {
            let remote = Bonded::<B>::from_remote(&reader, SchemaRef::EMPTY);
            black_box(remote.value().unwrap());
        })
    });

    let remote = Bonded::<B>::from_remote(&reader, SchemaRef::EMPTY);
    remote.value().unwrap();
    c.bench_function("bonded_remote_memoized_value", |b| {
        b.iter(|| {
            black_box(remote.value().unwrap());
        })
    });

    c.bench_function("bonded_remote_reserialize", |b| {
        b.iter(|| {
            let mut writer = CompactWriter::new();
            remote.serialize(&mut writer).unwrap();
            black_box(writer);
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_bonded);
criterion_main!(benches);
