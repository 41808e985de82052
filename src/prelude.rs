//! # cildelta Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the cildelta library. Import it to get everything a delta emission session needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cildelta operations
pub use crate::Error;

/// The result type used throughout cildelta
pub use crate::Result;

// ================================================================================================
// Emission Session
// ================================================================================================

/// Emitter, its configuration and its output
pub use crate::enc::{
    DebugDelta, DebugSequencePoint, DeltaEmitter, EmitConfig, EmitResult, EmittedDelta,
    MethodDebugInfo,
};

/// Baselines and the edits applied to them
pub use crate::enc::{
    DefinitionKey, EditKind, GenerationBaseline, SemanticEdit, SymbolHandle, SyntaxMap,
};

/// Diagnostics reported instead of a delta
pub use crate::enc::{Diagnostic, DiagnosticCode, DiagnosticSeverity};

/// Local slot preservation
pub use crate::enc::{LocalSlot, LocalSlotProvider, NoLocalSlots};

// ================================================================================================
// Symbol Model
// ================================================================================================

/// Compilations and their symbols
pub use crate::symbols::{
    Compilation, CompilationBuilder, FieldHandle, FieldSymbol, MethodHandle, MethodSymbol,
    MetadataReference, TypeHandle, TypeSymbol,
};

/// Lowered bodies
pub use crate::symbols::{
    FieldRef, Instruction, LocalVariable, LoweredBody, MethodRef, MethodSignature,
    SynthesizedMember, SynthesizedRole, SyntaxId,
};

/// Type references and structural descriptors
pub use crate::symbols::{MethodDescriptor, PrimitiveType, TypeDescriptor, TypePath, TypeShape};

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Table identifiers and attribute flags
pub use crate::metadata::tables::{FieldAttributes, TableId, TypeAttributes};

/// Method attribute flags
pub use crate::metadata::method::{MethodAttributes, MethodImplAttributes};

/// Assembly identities and version patterns
pub use crate::metadata::identity::{
    AssemblyIdentity, AssemblyVersion, BuildStamp, Identity, VersionPattern,
};

/// Generation-0 images
pub use crate::metadata::image::{MetadataReader, ModuleMetadata, ModuleMetadataBuilder};

/// Parsed view of an emitted delta
pub use crate::metadata::delta::MetadataDeltaView;

/// Heap sizes of a generation
pub use crate::metadata::heaps::HeapSizes;
