//! Integration tests for successive generations emitted from one baseline.

mod common;

use std::{cell::Cell, collections::BTreeSet};

use cildelta::prelude::*;
use common::{hello_world, hello_world_with, initial_baseline, never, program_method, system_runtime};

/// `return 1` becomes `return 2`: the body is the minimal replacement and calls `Print`
/// through the token committed in generation 0.
#[test]
fn update_emits_minimal_body_with_committed_callee() -> Result<()> {
    let previous = hello_world(1);
    let baseline = initial_baseline(&previous.compilation)?;
    let current = hello_world(2);

    let result = DeltaEmitter::default().emit_difference(
        &baseline,
        &current.compilation,
        &[SemanticEdit::update(current.main)],
        &never,
    )?;
    assert!(result.is_success(), "{:?}", result.diagnostics);

    let delta = result.delta.unwrap();
    let main = program_method(&baseline, &previous.compilation, "Main");
    let print = program_method(&baseline, &previous.compilation, "Print");

    let mut expected = vec![0x1E, 0x18, 0x28];
    expected.extend_from_slice(&print.value().to_le_bytes());
    expected.push(0x2A);
    assert_eq!(delta.body(main), Some(expected.as_slice()));
    assert_eq!(delta.generation, 1);
    assert!(delta.added_tokens.is_empty());

    let view = MetadataDeltaView::parse(&delta.metadata, delta.heap_bases)?;
    assert_eq!(view.generation()?, 1);
    assert_eq!(view.enc_map(), [main]);
    assert_eq!(view.row_count(TableId::Module), 1);
    Ok(())
}

/// Each generation inserts one helper; tokens only grow and committed ones keep their owner.
#[test]
fn tokens_are_monotonic_across_generations() -> Result<()> {
    let emitter = DeltaEmitter::new(EmitConfig::strict());
    let generation0 = hello_world_with(1, 0, vec![system_runtime()]);
    let mut baseline = initial_baseline(&generation0.compilation)?;

    let mut committed = BTreeSet::new();
    let mut owners = Vec::new();
    for generation in 1..=4u32 {
        let value = i32::try_from(generation).unwrap();
        let current = hello_world_with(value, generation, vec![system_runtime()]);
        let helper = current.helpers[generation as usize - 1];

        let result = emitter.emit_difference(
            &baseline,
            &current.compilation,
            &[SemanticEdit::insert(helper), SemanticEdit::update(current.main)],
            &never,
        )?;
        assert!(result.is_success(), "generation {generation}: {:?}", result.diagnostics);
        let delta = result.delta.unwrap();
        let next = result.baseline.unwrap();

        let added: Vec<Token> = delta
            .added_tokens
            .iter()
            .copied()
            .filter(|token| token.is_table(TableId::MethodDef))
            .collect();
        assert_eq!(added.len(), 1);
        assert!(added[0].row() > baseline.row_count(TableId::MethodDef));
        assert!(committed.iter().all(|token: &Token| *token < added[0]));
        committed.insert(added[0]);

        for (token, owner) in &owners {
            assert_eq!(next.definition_owner(*token), Some(owner));
        }
        owners.push((added[0], next.definition_owner(added[0]).unwrap().clone()));

        assert_eq!(next.ordinal(), u16::try_from(generation).unwrap());
        assert_eq!(next.enc_base_id(), baseline.enc_id());
        assert!(next.heap_sizes().strings >= baseline.heap_sizes().strings);
        assert!(next.heap_sizes().blobs >= baseline.heap_sizes().blobs);
        baseline = next;
    }

    assert_eq!(baseline.row_count(TableId::MethodDef), 6);
    Ok(())
}

/// A rejected generation leaves the baseline usable for a corrected retry.
#[test]
fn failed_generation_can_be_retried() -> Result<()> {
    let previous = hello_world(1);
    let baseline = initial_baseline(&previous.compilation)?;
    let emitter = DeltaEmitter::default();

    let current = hello_world(2);
    let rejected = emitter.emit_difference(
        &baseline,
        &current.compilation,
        &[SemanticEdit::insert(current.main)],
        &never,
    )?;
    assert!(!rejected.is_success());
    assert_eq!(rejected.diagnostics[0].code, DiagnosticCode::InsertCollision);
    assert_eq!(rejected.diagnostics[0].code.id(), "ENC0006");

    let accepted = emitter.emit_difference(
        &baseline,
        &current.compilation,
        &[SemanticEdit::update(current.main)],
        &never,
    )?;
    assert!(accepted.is_success());
    assert_eq!(accepted.baseline.unwrap().ordinal(), 1);
    Ok(())
}

/// Cancellation while planning aborts the call; the same baseline still emits afterwards.
#[test]
fn cancellation_leaves_the_baseline_untouched() -> Result<()> {
    let previous = hello_world(1);
    let baseline = initial_baseline(&previous.compilation)?;
    let current = hello_world(2);
    let edits = [SemanticEdit::update(current.main)];

    let polls = Cell::new(0u32);
    let cancel_after_first_poll = || {
        polls.set(polls.get() + 1);
        polls.get() > 1
    };
    let cancelled =
        DeltaEmitter::default().emit_difference(&baseline, &current.compilation, &edits, &cancel_after_first_poll);
    assert!(matches!(cancelled, Err(Error::Cancelled)));

    let result = DeltaEmitter::default().emit_difference(&baseline, &current.compilation, &edits, &never)?;
    assert!(result.is_success());
    assert_eq!(baseline.ordinal(), 0);
    Ok(())
}

/// Edits that cannot be expressed as a delta come back as diagnostics.
#[test]
fn unsupported_edits_are_diagnostics() -> Result<()> {
    let previous = hello_world(1);
    let baseline = initial_baseline(&previous.compilation)?;
    let current = hello_world(1);
    let program = current
        .compilation
        .find_type(&TypePath::new("", "Program"))
        .unwrap();
    let previous_program = previous
        .compilation
        .find_type(&TypePath::new("", "Program"))
        .unwrap();

    let result = DeltaEmitter::default().emit_difference(
        &baseline,
        &current.compilation,
        &[SemanticEdit::delete(previous_program), SemanticEdit::update(program)],
        &never,
    )?;

    assert!(result.delta.is_none());
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code, DiagnosticCode::UnsupportedEdit);
    assert!(result.diagnostics[0].is_error());
    Ok(())
}
