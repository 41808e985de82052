//! Flag constants for the `TypeDef`, `Field` and `Param` tables.
//!
//! # References
//! - ECMA-335 II.23.1.15 (`TypeAttributes`), II.23.1.5 (`FieldAttributes`),
//!   II.23.1.13 (`ParamAttributes`)

#[allow(non_snake_case)]
/// All possible flags for `TypeAttributes`
pub mod TypeAttributes {
    /// Use this mask to retrieve visibility information
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    /// Class has no public scope
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    /// Class has public scope
    pub const PUBLIC: u32 = 0x0000_0001;
    /// Class is nested with public visibility
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    /// Class is nested with private visibility
    pub const NESTED_PRIVATE: u32 = 0x0000_0003;
    /// Class is nested with family visibility
    pub const NESTED_FAMILY: u32 = 0x0000_0004;
    /// Class is nested with assembly visibility
    pub const NESTED_ASSEMBLY: u32 = 0x0000_0005;
    /// Class layout is determined by the runtime
    pub const AUTO_LAYOUT: u32 = 0x0000_0000;
    /// Class fields are laid out sequentially
    pub const SEQUENTIAL_LAYOUT: u32 = 0x0000_0008;
    /// Type is a class
    pub const CLASS: u32 = 0x0000_0000;
    /// Type is an interface
    pub const INTERFACE: u32 = 0x0000_0020;
    /// Class is abstract
    pub const ABSTRACT: u32 = 0x0000_0080;
    /// Class cannot be extended
    pub const SEALED: u32 = 0x0000_0100;
    /// Class name is special
    pub const SPECIAL_NAME: u32 = 0x0000_0400;
    /// Initialize the class before first static field access
    pub const BEFORE_FIELD_INIT: u32 = 0x0010_0000;
}

#[allow(non_snake_case)]
/// All possible flags for `FieldAttributes`
pub mod FieldAttributes {
    /// These 3 bits contain one of the following values:
    pub const FIELD_ACCESS_MASK: u16 = 0x0007;
    /// Accessible only by the parent type
    pub const PRIVATE: u16 = 0x0001;
    /// Accessibly by anyone in the Assembly
    pub const ASSEMBLY: u16 = 0x0003;
    /// Accessible only by type and sub-types
    pub const FAMILY: u16 = 0x0004;
    /// Accessibly by anyone who has visibility to this scope field contract attributes
    pub const PUBLIC: u16 = 0x0006;
    /// Defined on type, else per instance
    pub const STATIC: u16 = 0x0010;
    /// Field can only be initialized, not written to after init
    pub const INIT_ONLY: u16 = 0x0020;
    /// Field is special
    pub const SPECIAL_NAME: u16 = 0x0200;
}

#[allow(non_snake_case)]
/// All possible flags for `ParamAttributes`
pub mod ParamAttributes {
    /// Param is \[In\]
    pub const IN: u16 = 0x0001;
    /// Param is \[out\]
    pub const OUT: u16 = 0x0002;
    /// Param is optional
    pub const OPTIONAL: u16 = 0x0010;
}
