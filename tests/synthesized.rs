//! Integration tests for compiler-generated members across generations.

mod common;

use std::sync::Arc;

use cildelta::prelude::*;
use common::{initial_baseline, lib_compilation, never, stamp, system_runtime, util_twice};

struct App {
    compilation: Arc<Compilation>,
    f: MethodHandle,
    g: MethodHandle,
}

fn returning(value: i32) -> LoweredBody {
    LoweredBody::from_instructions(vec![Instruction::LdcI4(value), Instruction::Ret])
}

/// `C.F` calls into `lib` and optionally creates lambda 0; `C.G` optionally creates lambda 1.
fn app(lib: &Compilation, value: i32, f_lambda: bool, g_lambda: bool) -> App {
    let mut builder = CompilationBuilder::new("App");
    builder.add_reference(system_runtime());
    builder.add_reference(MetadataReference::from_compilation(lib, None));
    let c = builder.add_type(TypeSymbol::class("", "C"));
    let flags = MethodAttributes::PUBLIC | MethodAttributes::STATIC;

    let mut f_body = LoweredBody::new()
        .emit(Instruction::LdcI4(value))
        .emit(Instruction::Call(util_twice()))
        .emit(Instruction::Pop);
    let mut f = MethodSymbol::new("F", flags);
    if f_lambda {
        f_body = f_body
            .emit(Instruction::LdFtn(MethodRef::Synthesized { owner: c, ordinal: 0 }))
            .emit(Instruction::Pop);
        f = f
            .synthesizes(SynthesizedMember::lambda(0, vec![], TypeDescriptor::int32(), returning(value)))
            .synthesizes(SynthesizedMember::lambda_cache(0, TypeDescriptor::object()));
    }
    let f = builder.add_method(c, f.body(f_body.emit(Instruction::Ret)));

    let mut g_body = LoweredBody::new();
    let mut g = MethodSymbol::new("G", flags);
    if g_lambda {
        g_body = g_body
            .emit(Instruction::LdFtn(MethodRef::Synthesized { owner: c, ordinal: 1 }))
            .emit(Instruction::Pop);
        g = g.synthesizes(SynthesizedMember::lambda(1, vec![], TypeDescriptor::int32(), returning(10)));
    }
    let g = builder.add_method(c, g.body(g_body.emit(Instruction::Ret)));

    App {
        compilation: Arc::new(builder.build(stamp()).unwrap()),
        f,
        g,
    }
}

fn added_names(delta: &EmittedDelta, table: TableId) -> Result<Vec<String>> {
    let view = MetadataDeltaView::parse(&delta.metadata, delta.heap_bases)?;
    let name_column = if table == TableId::MethodDef { 3 } else { 1 };
    delta
        .added_tokens
        .iter()
        .filter(|token| token.is_table(table))
        .map(|token| {
            let row = view
                .row(*token)
                .ok_or_else(|| Error::SymbolNotFound(token.to_string()))?;
            Ok(view.string(row[name_column])?.to_string())
        })
        .collect()
}

/// Names introduced in generation 1 survive a generation 3 edit of a sibling construct,
/// even though the dependency was rebuilt under its `1.0.*` wildcard in between.
#[test]
fn synthesized_names_survive_generations() -> Result<()> {
    let lib = lib_compilation(BuildStamp::new(9000, 3600)?)?;
    let rebuilt = lib_compilation(BuildStamp::new(9004, 7200)?)?;
    let emitter = DeltaEmitter::default();

    let generation0 = app(&lib, 1, false, false);
    let baseline = initial_baseline(&generation0.compilation)?;

    // Generation 1: F starts using a lambda.
    let generation1 = app(&lib, 1, true, false);
    let result = emitter.emit_difference(
        &baseline,
        &generation1.compilation,
        &[SemanticEdit::update(generation1.f)],
        &never,
    )?;
    assert!(result.is_success(), "{:?}", result.diagnostics);
    let delta = result.delta.unwrap();
    assert_eq!(added_names(&delta, TableId::MethodDef)?, ["<>b__0#1"]);
    assert_eq!(added_names(&delta, TableId::Field)?, ["<>9__0#1"]);
    let lambda = delta
        .added_tokens
        .iter()
        .copied()
        .find(|token| token.is_table(TableId::MethodDef))
        .unwrap();
    let baseline = result.baseline.unwrap();

    // Generation 2: F changes again, the lambda is re-emitted in place.
    let generation2 = app(&lib, 2, true, false);
    let result = emitter.emit_difference(
        &baseline,
        &generation2.compilation,
        &[SemanticEdit::update(generation2.f)],
        &never,
    )?;
    let delta = result.delta.unwrap();
    assert!(delta.added_tokens.is_empty());
    assert!(delta.updated_methods.contains(&lambda));
    let baseline = result.baseline.unwrap();

    // Generation 3: G gets its own lambda, against a rebuilt dependency.
    let generation3 = app(&rebuilt, 2, true, true);
    let result = emitter.emit_difference(
        &baseline,
        &generation3.compilation,
        &[SemanticEdit::update(generation3.f), SemanticEdit::update(generation3.g)],
        &never,
    )?;
    assert!(result.is_success(), "{:?}", result.diagnostics);
    let delta = result.delta.unwrap();
    assert_eq!(added_names(&delta, TableId::MethodDef)?, ["<>b__1#3"]);
    assert!(!delta.added_tokens.iter().any(|token| token.is_table(TableId::AssemblyRef)));
    assert!(delta.updated_methods.contains(&lambda));

    let next = result.baseline.unwrap();
    let mut names: Vec<&str> = next
        .synthesized()
        .iter()
        .map(|(_, entry)| entry.name.as_str())
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["<>9__0#1", "<>b__0#1", "<>b__1#3"]);
    Ok(())
}

/// Replaying the same edits from the same baseline yields the same names and tokens.
#[test]
fn synthesized_naming_is_deterministic() -> Result<()> {
    let lib = lib_compilation(BuildStamp::new(9000, 3600)?)?;
    let generation0 = app(&lib, 1, false, false);
    let baseline = initial_baseline(&generation0.compilation)?;

    let run = || -> Result<Vec<Token>> {
        let generation1 = app(&lib, 1, true, true);
        let result = DeltaEmitter::default().emit_difference(
            &baseline,
            &generation1.compilation,
            &[SemanticEdit::update(generation1.g), SemanticEdit::update(generation1.f)],
            &never,
        )?;
        Ok(result.delta.unwrap().added_tokens)
    };

    assert_eq!(run()?, run()?);
    Ok(())
}
