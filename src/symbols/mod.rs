//! The symbol graph of a compilation snapshot.
//!
//! This is the narrow model the binder produces and the emitter consumes: an immutable
//! [`Compilation`] holding declared types, methods and fields with their lowered bodies,
//! the [`MetadataReference`]s it was compiled against, and the descriptors used to compare
//! symbols structurally across snapshots.
//!
//! # Key Components
//!
//! - [`Compilation`] / [`CompilationBuilder`] - Snapshot and its one-time finalization
//! - [`TypeHandle`], [`MethodHandle`], [`FieldHandle`] - Snapshot-scoped symbol handles
//! - [`TypeDescriptor`] - How a snapshot refers to a type
//! - [`TypeShape`], [`TypePath`], [`MethodDescriptor`] - Snapshot-independent structure
//! - [`LoweredBody`], [`Instruction`] - Method bodies with symbolic operands
//! - [`SynthesizedMember`] - Compiler-generated members declared by a lowering

mod body;
mod compilation;
mod descriptors;
mod reference;

pub use body::{
    ExternalField, ExternalMethod, FieldRef, Instruction, LabelId, LocalVariable, LoweredBody,
    MethodRef, MethodSignature, SequencePoint, SynthesizedMember, SynthesizedRole,
    SynthesizedShape, SyntaxId,
};
pub use compilation::{
    Compilation, CompilationBuilder, CompilationId, FieldHandle, FieldSymbol, MethodHandle,
    MethodSymbol, Parameter, TypeHandle, TypeSymbol,
};
pub use descriptors::{
    ExternalType, FieldDescriptor, MethodDescriptor, PrimitiveType, TypeDescriptor, TypePath,
    TypeShape,
};
pub use reference::MetadataReference;
