//! # Coded Index Types Module
//!
//! Coded indices combine a table identifier and row index into a single value by using the
//! lower bits to encode which table type is being referenced, and the remaining bits for
//! the actual row index (ECMA-335 II.24.2.6).
//!
//! Delta tables streams always use 4-byte indices, so encoding only has to choose the tag;
//! the width is fixed.

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// The coded index families needed to write and read delta rows.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef` or `TypeSpec`; used by `extends` columns and signatures.
    TypeDefOrRef,
    /// `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef` or `TypeSpec`; the `MemberRef.Class` column.
    MemberRefParent,
    /// `Module`, `ModuleRef`, `AssemblyRef` or `TypeRef`; the `TypeRef.ResolutionScope` column.
    ResolutionScope,
}

impl CodedIndexType {
    /// Returns the tables addressable by this coded index, in tag order.
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
        }
    }

    /// Number of low bits used for the tag.
    #[must_use]
    pub fn tag_bits(&self) -> u32 {
        let count = self.tables().len() as u32;
        u32::BITS - (count - 1).leading_zeros()
    }

    /// Encodes `token` as a coded index of this family.
    ///
    /// A null token encodes as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token's table is not part of this family.
    pub fn encode(&self, token: Token) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }

        let Some(tag) = self
            .tables()
            .iter()
            .position(|table| token.is_table(*table))
        else {
            return Err(malformed_error!(
                "Token {} cannot be encoded as {:?}",
                token,
                self
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((token.row() << self.tag_bits()) | tag as u32)
    }

    /// Decodes a coded index of this family back into a token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is out of range.
    pub fn decode(&self, value: u32) -> Result<Token> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;

        match self.tables().get(tag) {
            Some(table) => Token::from_parts(*table, row),
            None => Err(malformed_error!("Invalid {:?} tag {}", self, tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bits() {
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::ResolutionScope.tag_bits(), 2);
        assert_eq!(CodedIndexType::MemberRefParent.tag_bits(), 3);
    }

    #[test]
    fn type_def_or_ref() {
        let ci = CodedIndexType::TypeDefOrRef;
        assert_eq!(ci.encode(Token(0x02000002)).unwrap(), 0x08);
        assert_eq!(ci.encode(Token(0x01000005)).unwrap(), 0x15);
        assert_eq!(ci.encode(Token(0x1B000001)).unwrap(), 0x06);
        assert_eq!(ci.decode(0x15).unwrap(), Token(0x01000005));
    }

    #[test]
    fn member_ref_parent() {
        let ci = CodedIndexType::MemberRefParent;
        assert_eq!(ci.encode(Token(0x01000003)).unwrap(), (3 << 3) | 1);
        assert_eq!(ci.decode((3 << 3) | 1).unwrap(), Token(0x01000003));
    }

    #[test]
    fn resolution_scope() {
        let ci = CodedIndexType::ResolutionScope;
        assert_eq!(ci.encode(Token(0x23000001)).unwrap(), 0x06);
        assert_eq!(ci.encode(Token(0)).unwrap(), 0);
    }

    #[test]
    fn wrong_table() {
        assert!(CodedIndexType::TypeDefOrRef
            .encode(Token(0x06000001))
            .is_err());
        assert!(CodedIndexType::TypeDefOrRef.decode(0x03).is_err());
    }
}
