//! User String Heap (`#US`) view
//!
//! # Reference
//! - [ECMA-335 II.24.2.4](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::read_compressed_uint, metadata::streams::local_index, Error::OutOfBounds, Result,
};

/// '#US' holds the string literals loaded by `ldstr`. Each entry is a compressed length,
/// UTF-16LE code units and one trailing flag byte.
pub struct UserStrings<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> UserStrings<'a> {
    /// Create a `UserStrings` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    /// * 'base' - Cumulative size of the heap in earlier generations
    ///
    /// # Errors
    /// Returns an error if a complete heap (base 0) doesn't start with a null byte
    pub fn from(data: &'a [u8], base: u32) -> Result<UserStrings<'a>> {
        if base == 0 && (data.is_empty() || data[0] != 0) {
            return Err(OutOfBounds);
        }

        Ok(UserStrings {
            data,
            base: base as usize,
        })
    }

    /// Decodes the string at absolute `index`.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the entry is malformed
    pub fn get(&self, index: usize) -> Result<String> {
        let local = local_index(index, self.base)?;
        if local >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut start = local;
        let len = read_compressed_uint(self.data, &mut start)? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        if len % 2 != 1 {
            return Err(malformed_error!(
                "Invalid string data length at index - {}",
                index
            ));
        }

        let bytes = self
            .data
            .get(start..start + len - 1)
            .ok_or(OutOfBounds)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        String::from_utf16(&units)
            .map_err(|_| malformed_error!("Invalid string from index - {}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: [u8; 32] = [
            0x00, 0x1b, 0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00, 0x20, 0x00, 0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00
        ];

        let us_str = UserStrings::from(&data, 0).unwrap();

        assert_eq!(us_str.get(1).unwrap(), "Hello, World!");
    }

    #[test]
    fn invalid() {
        assert!(UserStrings::from(&[], 0).is_err());
        assert!(UserStrings::from(&[0x22, 0x1b], 0).is_err());

        let data_invalid = [0x00, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC];
        let us_str = UserStrings::from(&data_invalid, 0).unwrap();
        assert!(us_str.get(1).is_err());
    }

    #[test]
    fn with_base() {
        let data = [0x05, b'H', 0x00, b'i', 0x00, 0x00, 0x00, 0x00];
        let us_str = UserStrings::from(&data, 0x30).unwrap();
        assert_eq!(us_str.get(0x30).unwrap(), "Hi");
    }
}
