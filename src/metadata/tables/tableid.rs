use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// Identifiers of the ECMA-335 metadata tables (II.22).
///
/// The discriminant is the table number as used in the high byte of a [`crate::metadata::token::Token`]
/// and as the bit position in the `valid` / `sorted` masks of a tables stream header.
/// `EncLog` (0x1E) and `EncMap` (0x1F) only ever appear in Edit-and-Continue deltas.
#[derive(Clone, Copy, PartialEq, Debug, EnumIter, EnumCount, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TableId {
    /// `Module` table (0x00), exactly one row per module and per delta.
    Module = 0x00,
    /// `TypeRef` table (0x01), references to types in other scopes.
    TypeRef = 0x01,
    /// `TypeDef` table (0x02), type definitions.
    TypeDef = 0x02,
    /// `Field` table (0x04), field definitions.
    Field = 0x04,
    /// `MethodDef` table (0x06), method definitions.
    MethodDef = 0x06,
    /// `Param` table (0x08), named parameters.
    Param = 0x08,
    /// `InterfaceImpl` table (0x09).
    InterfaceImpl = 0x09,
    /// `MemberRef` table (0x0A), references to methods and fields of other types.
    MemberRef = 0x0A,
    /// `Constant` table (0x0B).
    Constant = 0x0B,
    /// `CustomAttribute` table (0x0C).
    CustomAttribute = 0x0C,
    /// `StandAloneSig` table (0x11), local variable signatures.
    StandAloneSig = 0x11,
    /// `Property` table (0x17).
    Property = 0x17,
    /// `MethodImpl` table (0x19).
    MethodImpl = 0x19,
    /// `ModuleRef` table (0x1A).
    ModuleRef = 0x1A,
    /// `TypeSpec` table (0x1B), constructed type references.
    TypeSpec = 0x1B,
    /// `EncLog` table (0x1E), the ordered list of delta operations.
    EncLog = 0x1E,
    /// `EncMap` table (0x1F), the sorted list of tokens touched by a delta.
    EncMap = 0x1F,
    /// `Assembly` table (0x20).
    Assembly = 0x20,
    /// `AssemblyRef` table (0x23), referenced assemblies.
    AssemblyRef = 0x23,
    /// `NestedClass` table (0x29), nesting relations between type definitions.
    NestedClass = 0x29,
    /// `GenericParam` table (0x2A).
    GenericParam = 0x2A,
    /// `MethodSpec` table (0x2B).
    MethodSpec = 0x2B,
}

impl TableId {
    /// Looks up a table by its ECMA-335 number.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        TableId::iter().find(|table| *table as u8 == value)
    }

    /// Returns the bit of this table in a tables stream `valid` / `sorted` mask.
    #[must_use]
    pub fn mask(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Returns true if the runtime expects rows of this table to be sorted by a key column.
    ///
    /// `EncMap` is sorted by token; `NestedClass` by nested type.
    #[must_use]
    pub fn is_sorted(self) -> bool {
        matches!(
            self,
            TableId::InterfaceImpl
                | TableId::Constant
                | TableId::CustomAttribute
                | TableId::MethodImpl
                | TableId::NestedClass
                | TableId::GenericParam
                | TableId::EncMap
        )
    }
}
