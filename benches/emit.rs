//! Benchmarks for delta emission.
//!
//! Measures the cost of a session against a module with many methods:
//! - Snapshotting a generation-0 image and correlating its baseline
//! - Emitting a single method update
//! - Emitting a burst of inserted methods

extern crate cildelta;

use std::{hint::black_box, sync::Arc};

use cildelta::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};

fn core_library() -> MetadataReference {
    let identity = AssemblyIdentity::new(
        "System.Runtime",
        AssemblyVersion::new(8, 0, 0, 0),
        None,
        Some(Identity::Token(0xb03f_5f7f_11d5_0a3a)),
    );
    MetadataReference::new(identity)
        .export(TypePath::parse("System.Object"), false)
        .export(TypePath::parse("System.Console"), false)
        .export(TypePath::parse("System.Int32"), true)
        .as_core_library()
}

/// `Program` with `methods` static methods, each printing its own index, plus `inserted` more.
fn program(methods: i32, inserted: i32, bump: i32) -> (Arc<Compilation>, Vec<MethodHandle>) {
    let write_line = MethodRef::external(
        TypeDescriptor::external("System", "Console"),
        "WriteLine",
        MethodSignature::static_method(vec![TypeDescriptor::int32()], TypeDescriptor::void()),
    );

    let mut builder = CompilationBuilder::new("Bench");
    builder.add_reference(core_library());
    let program = builder.add_type(TypeSymbol::class("", "Program"));
    let handles = (0..methods + inserted)
        .map(|index| {
            builder.add_method(
                program,
                MethodSymbol::new(format!("M{index}"), MethodAttributes::PUBLIC | MethodAttributes::STATIC)
                    .body(LoweredBody::from_instructions(vec![
                        Instruction::LdcI4(index + bump),
                        Instruction::Call(write_line.clone()),
                        Instruction::Ret,
                    ])),
            )
        })
        .collect();

    let stamp = BuildStamp::new(9000, 3600).unwrap();
    (Arc::new(builder.build(stamp).unwrap()), handles)
}

fn baseline(compilation: &Arc<Compilation>) -> Arc<GenerationBaseline> {
    let image = Arc::new(ModuleMetadata::snapshot(compilation).unwrap());
    GenerationBaseline::initial(Arc::clone(compilation), image.clone(), image).unwrap()
}

/// Benchmark snapshotting and correlating a 1000 method module.
fn bench_initial_baseline(c: &mut Criterion) {
    let (compilation, _) = program(1000, 0, 0);

    c.bench_function("enc_initial_baseline_1000", |b| {
        b.iter(|| black_box(baseline(black_box(&compilation))));
    });
}

/// Benchmark a single method update against a 1000 method baseline.
fn bench_update_one(c: &mut Criterion) {
    let (previous, _) = program(1000, 0, 0);
    let baseline = baseline(&previous);
    let (current, handles) = program(1000, 0, 1);
    let edits = [SemanticEdit::update(handles[500])];
    let emitter = DeltaEmitter::default();

    c.bench_function("enc_update_one_of_1000", |b| {
        b.iter(|| {
            let result = emitter
                .emit_difference(&baseline, black_box(&current), &edits, &|| false)
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark inserting 100 methods into a 1000 method baseline.
fn bench_insert_hundred(c: &mut Criterion) {
    let (previous, _) = program(1000, 0, 0);
    let baseline = baseline(&previous);
    let (current, handles) = program(1000, 100, 0);
    let edits: Vec<SemanticEdit> = handles[1000..].iter().map(|handle| SemanticEdit::insert(*handle)).collect();
    let emitter = DeltaEmitter::default();

    c.bench_function("enc_insert_100_into_1000", |b| {
        b.iter(|| {
            let result = emitter
                .emit_difference(&baseline, black_box(&current), &edits, &|| false)
                .unwrap();
            black_box(result)
        });
    });
}

criterion_group!(
    benches,
    bench_initial_baseline,
    bench_update_one,
    bench_insert_hundred
);
criterion_main!(benches);
