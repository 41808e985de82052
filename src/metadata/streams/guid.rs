//! GUID Heap (`#GUID`) view
//!
//! # Reference
//! - [ECMA-335 II.24.2.5](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{metadata::streams::local_index, Error::OutOfBounds, Result};

/// '#GUID' is an array of 16-byte entries addressed by a 1-based index. Module version ids
/// and the EnC ids of each generation live here.
pub struct Guid<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> Guid<'a> {
    /// Create a `Guid` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    /// * 'base' - Number of entries in earlier generations
    ///
    /// # Errors
    /// Returns an error if the data is not a whole number of GUIDs
    pub fn from(data: &'a [u8], base: u32) -> Result<Guid<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!("Data for #Guid heap is not a multiple of 16"));
        }

        Ok(Guid {
            data,
            base: base as usize,
        })
    }

    /// Number of entries in this view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / 16
    }

    /// Returns true if the view holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the GUID at the absolute 1-based `index`. Index 0 is the nil GUID.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index == 0 {
            return Ok(uguid::Guid::ZERO);
        }

        let position = local_index(index, self.base + 1)?;
        let start = position * 16;
        let bytes = self.data.get(start..start + 16).ok_or(OutOfBounds)?;

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(bytes);
        Ok(uguid::Guid::from_bytes(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data : [u8; 32] = [
            0x8e, 0x90, 0x37, 0xd4, 0xe6, 0x65, 0x7c, 0x48, 0x97, 0x35, 0x7b, 0xdf, 0xf6, 0x99, 0xbe, 0xa5,
            0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        ];

        let guids = Guid::from(&data, 0).unwrap();

        assert_eq!(guids.len(), 2);
        assert_eq!(
            guids.get(1).unwrap(),
            uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5")
        );
        assert_eq!(
            guids.get(2).unwrap(),
            uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA")
        );
        assert!(guids.get(3).is_err());
    }

    #[test]
    fn with_base() {
        let data = [0x11; 16];
        let guids = Guid::from(&data, 2).unwrap();

        assert_eq!(guids.get(3).unwrap().to_bytes(), [0x11; 16]);
        assert!(guids.get(2).is_err());
        assert_eq!(guids.get(0).unwrap(), uguid::Guid::ZERO);
    }
}
