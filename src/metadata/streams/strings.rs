//! String Heap (`#Strings`) view
//!
//! # Reference
//! - [ECMA-335 II.24.2.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::{ffi::CStr, str};

use crate::{metadata::streams::local_index, Error::OutOfBounds, Result};

/// '#Strings' hold identifiers which are referenced from the metadata tables: type names,
/// member names, namespaces.
///
/// # Examples
///
/// ```rust
/// use cildelta::metadata::streams::Strings;
/// let data = &[0u8, b'H', b'e', b'l', b'l', b'o', 0u8];
/// let strings = Strings::from(data, 0).unwrap();
/// assert_eq!(strings.get(1).unwrap(), "Hello");
///
/// // a delta heap continuing after 0x40 bytes of earlier generations
/// let delta = Strings::from(&[b'F', 0, 0, 0], 0x40).unwrap();
/// assert_eq!(delta.get(0x40).unwrap(), "F");
/// ```
pub struct Strings<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> Strings<'a> {
    /// Create a `Strings` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    /// * 'base' - Cumulative size of the heap in earlier generations
    ///
    /// # Errors
    /// Returns an error if a complete heap (base 0) does not start with the empty string
    pub fn from(data: &'a [u8], base: u32) -> Result<Strings<'a>> {
        if base == 0 && (data.is_empty() || data[0] != 0) {
            return Err(malformed_error!("Provided #String heap is empty"));
        }

        Ok(Strings {
            data,
            base: base as usize,
        })
    }

    /// Get the string at absolute `index`. Index 0 is always the empty string.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the string data is invalid UTF-8
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index == 0 {
            return Ok("");
        }

        let local = local_index(index, self.base)?;
        if local >= self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[local..]) {
            Ok(result) => match result.to_str() {
                Ok(result) => Ok(result),
                Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
            },
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data = [
            0x00,
            0x3c, 0x4d, 0x61, 0x69, 0x6e, 0x3e, 0x24, 0x00,
            0x43, 0x5f, 0x53, 0x68, 0x61, 0x72, 0x70, 0x00,
            0x3c, 0x4d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x00,
        ];

        let str_view = Strings::from(&data, 0).unwrap();

        assert_eq!(str_view.get(1).unwrap(), "<Main>$");
        assert_eq!(str_view.get(9).unwrap(), "C_Sharp");
        assert_eq!(str_view.get(17).unwrap(), "<Module>");
        assert!(str_view.get(100).is_err());
    }

    #[test]
    fn with_base() {
        let data = [b'A', b'b', 0x00, b'C', 0x00, 0x00, 0x00, 0x00];
        let str_view = Strings::from(&data, 0x100).unwrap();

        assert_eq!(str_view.get(0).unwrap(), "");
        assert_eq!(str_view.get(0x100).unwrap(), "Ab");
        assert_eq!(str_view.get(0x103).unwrap(), "C");
        assert!(str_view.get(0x20).is_err());
    }
}
