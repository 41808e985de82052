//! Token-level signature model and blob encoders (ECMA-335 II.23.2).
//!
//! Signatures here are expressed over metadata tokens: every named type has already been
//! resolved to a `TypeDef`, `TypeRef` or `TypeSpec` row. Resolving symbols to tokens is the
//! job of the Edit-and-Continue layer; this module only lays the bytes out.
//!
//! # Key Components
//!
//! - [`SigType`] - A type as it appears inside a signature blob
//! - [`MethodSig`] - Method signature (`MethodDef`, `MemberRef`)
//! - [`encoders`] - `encode_*_signature` functions producing blob bytes
//! - [`ELEMENT_TYPE`], [`CALLING_CONVENTION`], [`SIGNATURE_HEADER`] - Raw constants

pub mod encoders;

pub use encoders::{
    encode_field_signature, encode_local_var_signature, encode_method_signature, encode_type,
    encode_typespec_signature,
};

use crate::metadata::token::Token;

/// Element type constants (ECMA-335 II.23.1.16).
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const GENERICINST: u8 = 0x15;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
}

/// Calling convention bits of method signatures (ECMA-335 II.23.2.1).
#[allow(non_snake_case, missing_docs)]
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
}

/// Leading bytes of non-method signatures.
#[allow(non_snake_case, missing_docs)]
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
}

/// A type inside a signature blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SigType {
    /// `void` (return types only).
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `string`
    String,
    /// `object`
    Object,
    /// `nint`
    I,
    /// `nuint`
    U,
    /// A reference type named by a `TypeDefOrRef` token.
    Class(Token),
    /// A value type named by a `TypeDefOrRef` token.
    ValueType(Token),
    /// An instantiation of a generic type definition.
    GenericInst {
        /// Whether the generic definition is a value type.
        value_type: bool,
        /// The generic definition.
        definition: Token,
        /// Type arguments.
        arguments: Vec<SigType>,
    },
    /// Single-dimensional zero-based array.
    SzArray(Box<SigType>),
    /// Managed pointer.
    ByRef(Box<SigType>),
    /// Generic parameter of the enclosing type.
    Var(u32),
    /// Generic parameter of the enclosing method.
    MVar(u32),
}

impl SigType {
    /// Returns true for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, SigType::Void)
    }
}

/// A method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method (`HASTHIS`).
    pub has_this: bool,
    /// Number of generic method parameters.
    pub generic_arity: u32,
    /// Return type.
    pub ret: SigType,
    /// Parameter types.
    pub params: Vec<SigType>,
}
