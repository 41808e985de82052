use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{metadata::tables::TableId, Error, Result};

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
///
/// Tokens are the unit of identity across Edit-and-Continue generations: once a row
/// token has been handed out for a definition it keeps naming that definition in
/// every later delta.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// The largest row id a token can carry.
    pub const MAX_ROW: u32 = 0x00FF_FFFF;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token for `row` in `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenExhausted`] if `row` does not fit into 24 bits.
    pub fn from_parts(table: TableId, row: u32) -> Result<Self> {
        if row > Self::MAX_ROW {
            return Err(Error::TokenExhausted(table));
        }

        Ok(Token((u32::from(table as u8) << 24) | row))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Resolves the table byte into a [`TableId`], if it names a known table.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & Self::MAX_ROW
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if this token points into `table`.
    #[must_use]
    pub fn is_table(&self, table: TableId) -> bool {
        self.table() == table as u8
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_parts() {
        let token = Token(0x06000001);
        assert_eq!(token.value(), 0x06000001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);

        let token = Token(0x06FFFFFF);
        assert_eq!(token.row(), 0x00FFFFFF);
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TableId::MethodDef, 5).unwrap();
        assert_eq!(token, Token(0x06000005));
        assert_eq!(token.table_id(), Some(TableId::MethodDef));
        assert!(token.is_table(TableId::MethodDef));
        assert!(!token.is_table(TableId::Field));

        let enc_map = Token::from_parts(TableId::EncMap, 1).unwrap();
        assert_eq!(enc_map.value(), 0x1F000001);
    }

    #[test]
    fn test_token_exhausted() {
        let result = Token::from_parts(TableId::TypeRef, 0x0100_0000);
        assert!(matches!(result, Err(Error::TokenExhausted(TableId::TypeRef))));
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let token: Token = 0x0A000003u32.into();
        let back: u32 = token.into();
        assert_eq!(back, 0x0A000003);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x06000001)), "0x06000001");

        let debug_str = format!("{:?}", Token(0x06000001));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_ordering() {
        assert!(Token(0x06000001) < Token(0x06000002));
        assert!(Token(0x06000002) < Token(0x07000001));
    }

    #[test]
    fn test_token_hash() {
        let mut set = HashSet::new();
        set.insert(Token(0x06000001));
        set.insert(Token(0x06000001));
        set.insert(Token(0x06000002));
        assert_eq!(set.len(), 2);
    }
}
