// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # cildelta
//!
//! Edit-and-Continue delta emission for .NET modules, in pure Rust.
//!
//! Given the generation-0 image of a module, the compilation it was built from, and a new
//! compilation plus a list of semantic edits, `cildelta` produces the three artifacts a
//! runtime applies while the program keeps running: an ECMA-335 metadata delta (an
//! uncompressed `#-` tables stream with `EncLog`/`EncMap` and heap deltas), an IL delta
//! holding the new method bodies, and a debug delta with sequence points and local names.
//! Each accepted generation yields the baseline the next one is emitted against.
//!
//! ## Features
//!
//! - **Token stability** - Tokens committed by a generation are never reassigned; new rows
//!   always get row numbers above every committed one
//! - **Reference reconciliation** - `AssemblyRef` rows are reused across generations, and
//!   version conflicts or ambiguous aliases are reported as diagnostics
//! - **Overload-aware matching** - Updated methods are correlated by name, arity, parameter
//!   count and static-ness; ambiguities are rejected instead of guessed
//! - **Stable synthesized members** - Closure classes, lambdas and cache fields keep their
//!   names from the generation that introduced them
//! - **Local slot preservation** - Locals of updated bodies keep their slots when a syntax
//!   map correlates their declarations
//! - **Validation** - Optional token and heap checks run on every delta before it is returned
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cildelta::prelude::*;
//!
//! # fn run(
//! #     previous: Arc<Compilation>,
//! #     current: Arc<Compilation>,
//! #     main: MethodHandle,
//! # ) -> cildelta::Result<()> {
//! // Generation 0: the image the running process loaded.
//! let image = Arc::new(ModuleMetadata::snapshot(&previous)?);
//! let baseline = GenerationBaseline::initial(previous, image.clone(), image)?;
//!
//! // Generation 1: `Main` changed.
//! let emitter = DeltaEmitter::new(EmitConfig::default());
//! let result = emitter.emit_difference(&baseline, &current, &[SemanticEdit::update(main)], &|| false)?;
//!
//! match (result.delta, result.baseline) {
//!     (Some(delta), Some(next)) => {
//!         println!("generation {} updates {} methods", delta.generation, delta.updated_methods.len());
//!         assert_eq!(next.ordinal(), 1);
//!     }
//!     _ => {
//!         for diagnostic in &result.diagnostics {
//!             eprintln!("{diagnostic}");
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`symbols`] - The compiler-facing model: compilations, type/method/field symbols and
//!   lowered bodies
//! - [`metadata`] - ECMA-335 primitives: tokens, rows, heaps, signatures, IL and the
//!   metadata root
//! - [`enc`] - Baselines, edit planning, reference reconciliation and the delta emitter
//!
//! Problems caused by the edits themselves are reported as [`Diagnostic`]s inside an
//! [`EmitResult`]; an `Err` only means the call was cancelled or hit an internal invariant
//! violation.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use cildelta::prelude::*;
///
/// let emitter = DeltaEmitter::new(EmitConfig::strict());
/// assert!(emitter.config().enable_token_validation);
/// ```
pub mod prelude;

/// ECMA-335 metadata primitives for Edit-and-Continue deltas
///
/// Tokens, delta table rows and the `#-` writer, append-only heaps, signature blobs,
/// IL encoding, the metadata root, and read access to generation-0 images and emitted
/// deltas.
pub mod metadata;

/// The compiler-facing symbol model
///
/// A [`symbols::Compilation`] is an immutable snapshot of one version of a module's
/// source: its types, methods and fields, their lowered bodies and the assembly
/// references they resolve through.
pub mod symbols;

/// Edit-and-Continue baselines and delta emission
pub mod enc;

/// `cildelta` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cildelta` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use cildelta::Error;
///
/// fn report(error: Error) {
///     match error {
///         Error::Cancelled => println!("emission cancelled"),
///         Error::InvariantViolation(message) => println!("internal error: {}", message),
///         other => println!("error: {}", other),
///     }
/// }
/// ```
pub use error::Error;

/// Entry points of a delta emission session.
pub use enc::{
    DeltaEmitter, Diagnostic, DiagnosticCode, DiagnosticSeverity, EmitConfig, EmitResult,
    GenerationBaseline,
};
