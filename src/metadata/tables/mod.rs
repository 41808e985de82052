//! Metadata tables as they appear in Edit-and-Continue deltas.
//!
//! This module holds the table identifiers, the coded index encodings used by delta rows,
//! the fixed row layouts of every table a delta can contain, and the `#-` stream writer.
//!
//! # Key Components
//!
//! - [`TableId`] - ECMA-335 table numbers, including `EncLog` and `EncMap`
//! - [`CodedIndexType`] - Tag encoding for `TypeDefOrRef`, `MemberRefParent` and `ResolutionScope`
//! - [`rows`] - Row structs and the fixed 4-byte-index column schema of delta tables
//! - [`TypeAttributes`], [`FieldAttributes`], [`ParamAttributes`] - Row flag constants
//! - [`DeltaTablesWriter`] - Serializes collected rows into an uncompressed tables stream
//!
//! # References
//!
//! - ECMA-335 II.22 (tables), II.24.2.6 (`#~` / `#-` stream layout)

mod attributes;
mod codedindex;
pub mod rows;
mod tableid;
mod writer;

pub use attributes::{FieldAttributes, ParamAttributes, TypeAttributes};
pub use codedindex::CodedIndexType;
pub use rows::{
    columns, row_size, AssemblyRefRow, DeltaRow, EncFuncCode, EncLogRow, EncMapRow, FieldRow,
    MemberRefRow, MethodDefRow, ModuleRow, NestedClassRow, ParamRow, StandAloneSigRow,
    TypeDefRow, TypeRefRow, TypeSpecRow,
};
pub use tableid::TableId;
pub use writer::{DeltaTablesWriter, DELTA_HEAP_SIZES};
