//! Strong-name identity of an assembly: a full public key or its 8-byte token.
//!
//! A public key token is derived from the full key by hashing it and taking the last
//! 8 bytes of the digest in reverse order (ECMA-335 II.6.2.1.3). Tokens are stored as a
//! `u64` whose little-endian bytes are the token in display order, so
//! `b77a5c561934e089` is `u64::from_le_bytes([0xb7, 0x7a, ...])`.

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::{file::io::read_le, Error, Result};

/// Hash algorithm ids of the `Assembly.HashAlgId` column (ECMA-335 II.23.1.1).
pub struct AssemblyHashAlgorithm;

impl AssemblyHashAlgorithm {
    /// No hash algorithm.
    pub const NONE: u32 = 0x0000;
    /// MD5.
    pub const MD5: u32 = 0x8003;
    /// SHA-1, the algorithm used for public key tokens.
    pub const SHA1: u32 = 0x8004;
}

/// Strong-name identity of an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The full public key blob.
    PubKey(Vec<u8>),
    /// The 8-byte public key token.
    Token(u64),
}

impl Identity {
    /// Builds an identity from a `PublicKeyOrToken` blob.
    ///
    /// ## Arguments
    /// * `data` - The blob content
    /// * `is_pub` - Whether the blob holds a full public key (`AssemblyFlags.PublicKey`)
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if a token blob is shorter than 8 bytes.
    pub fn from(data: &[u8], is_pub: bool) -> Result<Self> {
        Ok(if is_pub {
            Identity::PubKey(data.to_vec())
        } else {
            Identity::Token(read_le::<u64>(data)?)
        })
    }

    /// Computes the public key token with the given hash algorithm.
    ///
    /// For [`Identity::Token`] the stored token is returned unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for hash algorithms other than MD5 and SHA-1.
    pub fn to_token(&self, algo: u32) -> Result<u64> {
        match self {
            Identity::PubKey(data) => {
                let digest = match algo {
                    AssemblyHashAlgorithm::MD5 => Md5::digest(data).to_vec(),
                    AssemblyHashAlgorithm::SHA1 => Sha1::digest(data).to_vec(),
                    _ => return Err(Error::NotSupported),
                };

                let mut tail = [0u8; 8];
                tail.copy_from_slice(&digest[digest.len() - 8..]);
                tail.reverse();
                Ok(u64::from_le_bytes(tail))
            }
            Identity::Token(token) => Ok(*token),
        }
    }

    /// The SHA-1 public key token, the form used to compare assembly identities.
    ///
    /// # Errors
    /// Never fails for the SHA-1 algorithm; the `Result` mirrors [`Identity::to_token`].
    pub fn token(&self) -> Result<u64> {
        self.to_token(AssemblyHashAlgorithm::SHA1)
    }

    /// Returns the bytes stored in an `AssemblyRef.PublicKeyOrToken` blob.
    #[must_use]
    pub fn blob(&self) -> Vec<u8> {
        match self {
            Identity::PubKey(data) => data.clone(),
            Identity::Token(token) => token.to_le_bytes().to_vec(),
        }
    }

    /// Returns true for a full public key.
    #[must_use]
    pub fn is_public_key(&self) -> bool {
        matches!(self, Identity::PubKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pubkey() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let identity = Identity::from(&data, true).unwrap();
        assert_eq!(identity, Identity::PubKey(data));
        assert!(identity.is_public_key());
    }

    #[test]
    fn from_token() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let identity = Identity::from(&data, false).unwrap();
        assert_eq!(identity, Identity::Token(0xF0DEBC9A78563412));
        assert_eq!(identity.blob(), data);
    }

    #[test]
    fn from_token_too_short() {
        assert!(Identity::from(&[1, 2, 3], false).is_err());
    }

    #[test]
    fn sha1_token_is_reversed_tail() {
        let key = vec![0x00, 0x24, 0x00, 0x00, 0x04, 0x80, 0x00, 0x00];
        let identity = Identity::PubKey(key.clone());

        let digest = Sha1::digest(&key);
        let mut expected: Vec<u8> = digest[digest.len() - 8..].to_vec();
        expected.reverse();

        let token = identity.token().unwrap();
        assert_eq!(token.to_le_bytes().to_vec(), expected);
    }

    #[test]
    fn md5_and_sha1_differ() {
        let identity = Identity::PubKey((0..=255).collect());
        let md5 = identity.to_token(AssemblyHashAlgorithm::MD5).unwrap();
        let sha1 = identity.to_token(AssemblyHashAlgorithm::SHA1).unwrap();
        assert_ne!(md5, sha1);
    }

    #[test]
    fn token_passthrough() {
        let identity = Identity::Token(0x89e0_3419_565c_7ab7);
        assert_eq!(
            identity.to_token(AssemblyHashAlgorithm::NONE).unwrap(),
            0x89e0_3419_565c_7ab7
        );
    }

    #[test]
    fn unsupported_algorithm() {
        let identity = Identity::PubKey(vec![1, 2, 3]);
        assert!(matches!(
            identity.to_token(0x9999),
            Err(Error::NotSupported)
        ));
    }
}
