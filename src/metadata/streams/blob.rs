//! Blob Heap (`#Blob`) view
//!
//! # Reference
//! - [ECMA-335 II.24.2.4](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::read_compressed_uint, metadata::streams::local_index, Error::OutOfBounds, Result,
};

/// '#Blob' holds signatures and other binary data referenced from the metadata tables. Each
/// entry is a compressed length followed by that many bytes.
///
/// # Examples
///
/// ```rust
/// use cildelta::metadata::streams::Blob;
/// let data = &[0u8, 0x03, 0x41, 0x42, 0x43];
/// let blob = Blob::from(data, 0).unwrap();
/// assert_eq!(blob.get(1).unwrap(), &[0x41, 0x42, 0x43]);
/// ```
pub struct Blob<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> Blob<'a> {
    /// Create a `Blob` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    /// * 'base' - Cumulative size of the heap in earlier generations
    ///
    /// # Errors
    /// Returns an error if a complete heap (base 0) doesn't start with the empty blob
    pub fn from(data: &'a [u8], base: u32) -> Result<Blob<'a>> {
        if base == 0 && (data.is_empty() || data[0] != 0) {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob {
            data,
            base: base as usize,
        })
    }

    /// Get the blob at absolute `index`. Index 0 is always the empty blob.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or if the length prefix cannot be parsed
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }

        let local = local_index(index, self.base)?;
        if local >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut data_start = local;
        let len = read_compressed_uint(self.data, &mut data_start)? as usize;

        let Some(data_end) = data_start.checked_add(len) else {
            return Err(OutOfBounds);
        };

        self.data.get(data_start..data_end).ok_or(OutOfBounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let data = [0x00, 0x03, 0x00, 0x00, 0x01, 0x02, 0x06, 0x08, 0x00];
        let blob = Blob::from(&data, 0).unwrap();

        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0x00, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x06, 0x08]);
    }

    #[test]
    fn with_base() {
        let data = [0x02, 0x06, 0x08, 0x00];
        let blob = Blob::from(&data, 0x40).unwrap();

        assert_eq!(blob.get(0x40).unwrap(), &[0x06, 0x08]);
        assert!(blob.get(0x3F).is_err());
        assert!(blob.get(0x44).is_err());
    }

    #[test]
    fn truncated() {
        let data = [0x00, 0x05, 0x01];
        let blob = Blob::from(&data, 0).unwrap();
        assert!(blob.get(1).is_err());
        assert!(Blob::from(&[0x01], 0).is_err());
    }
}
