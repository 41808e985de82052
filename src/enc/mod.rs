//! Edit-and-Continue delta emission.
//!
//! A session starts from a generation-0 image: [`GenerationBaseline::initial`] correlates
//! the image with the compilation it was built from. Every accepted call to
//! [`DeltaEmitter::emit_difference`] produces one generation (metadata, IL and debug
//! deltas) plus the baseline the next generation is emitted against. Baselines are
//! immutable and shared through `Arc`, so several emitters can work off the same baseline
//! concurrently and a rejected generation leaves its input untouched.
//!
//! # Key Components
//!
//! - [`DeltaEmitter`] - Plans edits, emits rows and bodies, validates and serializes
//! - [`GenerationBaseline`] - Token maps and heap sizes committed by previous generations
//! - [`AssemblyReferenceReconciler`] - Reuses, appends or rejects `AssemblyRef` rows
//! - [`SymbolMatcher`] - Finds the previous-generation counterpart of a symbol
//! - [`SynthesizedMemberRegistry`] - Stable names of compiler-generated members
//! - [`LocalSlotAllocator`] - Preserves local slots of updated method bodies
//! - [`Diagnostic`] - Recoverable problems reported instead of a delta
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cildelta::prelude::*;
//!
//! # fn run(baseline: Arc<GenerationBaseline>, compilation: Arc<Compilation>, main: MethodHandle) -> Result<()> {
//! let emitter = DeltaEmitter::new(EmitConfig::default());
//! let result = emitter.emit_difference(&baseline, &compilation, &[SemanticEdit::update(main)], &|| false)?;
//!
//! for diagnostic in &result.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! if let (Some(delta), Some(_next)) = (result.delta, result.baseline) {
//!     println!("generation {}: {} bytes of metadata", delta.generation, delta.metadata.len());
//! }
//! # Ok(())
//! # }
//! ```

mod baseline;
mod codegen;
mod config;
mod diagnostics;
mod edits;
mod emitter;
pub(crate) mod locals;
mod matcher;
mod reconciler;
mod snapshot;
mod synthesized;

pub use baseline::{DefinitionKey, GenerationBaseline, MethodDefinition};
pub use config::EmitConfig;
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSeverity};
pub use edits::{EditKind, SemanticEdit, SymbolHandle, SyntaxMap};
pub use emitter::{DebugDelta, DebugSequencePoint, DeltaEmitter, EmitResult, EmittedDelta, MethodDebugInfo};
pub use locals::{LocalSlot, LocalSlotAllocator, LocalSlotProvider, NoLocalSlots};
pub use matcher::{SymbolMatch, SymbolMatcher};
pub use reconciler::{
    AssemblyRefEntry, AssemblyRefTable, AssemblyReferenceReconciler, ReconciliationResult,
    ReferenceKey, ReferenceOutcome,
};
pub use synthesized::{
    SynthesizedEntry, SynthesizedMemberKey, SynthesizedMemberRegistry, SynthesizedShapeKey,
};
