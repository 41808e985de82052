//! Independent emission sessions running in parallel.

mod common;

use std::sync::Arc;

use cildelta::prelude::*;
use common::{hello_world, initial_baseline, never, program_method};
use rayon::prelude::*;

/// Sessions over unrelated generation-0 images never observe each other.
#[test]
fn independent_sessions_in_parallel() -> Result<()> {
    let results: Vec<Result<(i32, EmittedDelta)>> = (1..=16)
        .into_par_iter()
        .map(|value| {
            let generation0 = hello_world(value);
            let baseline = initial_baseline(&generation0.compilation)?;
            let generation1 = hello_world(value + 100);
            let result = DeltaEmitter::default().emit_difference(
                &baseline,
                &generation1.compilation,
                &[SemanticEdit::update(generation1.main)],
                &never,
            )?;
            let delta = result
                .delta
                .ok_or_else(|| Error::Error(format!("session {value} produced no delta")))?;
            Ok((value, delta))
        })
        .collect();

    for result in results {
        let (value, delta) = result?;
        assert_eq!(delta.generation, 1);
        assert_eq!(delta.updated_methods.len(), 1);
        // Tiny header for 8 bytes of IL, then ldc.i4.s <value + 100>.
        let literal = i8::try_from(value + 100).unwrap().to_le_bytes()[0];
        assert_eq!(&delta.il[4..7], &[0x22, 0x1F, literal]);
    }
    Ok(())
}

/// Emitting from one shared baseline on many threads yields identical generations.
#[test]
fn shared_baseline_is_read_only() -> Result<()> {
    let generation0 = hello_world(1);
    let baseline = initial_baseline(&generation0.compilation)?;
    let main = program_method(&baseline, &generation0.compilation, "Main");
    let generation1 = hello_world(2);

    let deltas: Vec<EmittedDelta> = (0..8)
        .into_par_iter()
        .map(|_| {
            let result = DeltaEmitter::default().emit_difference(
                &Arc::clone(&baseline),
                &generation1.compilation,
                &[SemanticEdit::update(generation1.main)],
                &never,
            )?;
            result
                .delta
                .ok_or_else(|| Error::Error("no delta".to_string()))
        })
        .collect::<Result<_>>()?;

    for delta in &deltas {
        assert_eq!(delta.updated_methods, [main]);
        assert_eq!(delta.metadata, deltas[0].metadata);
        assert_eq!(delta.il, deltas[0].il);
    }
    assert_eq!(baseline.ordinal(), 0);
    Ok(())
}
