//! Append-only builders for the metadata heaps of a delta.
//!
//! Each generation's heaps continue where the previous generation's ended: a builder is
//! created with the cumulative size of all earlier generations as its base, every index it
//! hands out is absolute (base + local offset), and it only ever appends. Earlier offsets are
//! never rewritten. Within one generation identical entries are deduplicated.
//!
//! # Heap Formats
//!
//! - **#Strings**: UTF-8, null-terminated; offset 0 is the empty string
//! - **#Blob**: compressed length prefix followed by the bytes; offset 0 is the empty blob
//! - **#US**: compressed length prefix, UTF-16LE code units and a trailing flag byte
//! - **#GUID**: 16-byte entries addressed by 1-based index
//!
//! All streams are padded to a 4-byte boundary; the padded size is what the next
//! generation's base continues from.

use std::collections::HashMap;

use uguid::Guid;
use widestring::U16String;

use crate::{
    file::io::{align_to, write_compressed_uint},
    Result,
};

/// Cumulative heap sizes after a generation, i.e. the bases of the next generation's heaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HeapSizes {
    /// Size of `#Strings` in bytes.
    pub strings: u32,
    /// Size of `#US` in bytes.
    pub user_strings: u32,
    /// Size of `#Blob` in bytes.
    pub blobs: u32,
    /// Number of entries in `#GUID`.
    pub guids: u32,
}

fn padded_len(len: usize) -> usize {
    len.next_multiple_of(4)
}

fn to_index(base: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| malformed_error!("Heap offset exceeds 32 bits"))
}

/// Builder for the `#Strings` heap delta.
#[derive(Debug, Clone)]
pub struct StringHeapBuilder {
    base: u32,
    data: Vec<u8>,
    lookup: HashMap<String, u32>,
}

impl StringHeapBuilder {
    /// Creates a builder continuing after `base` bytes.
    #[must_use]
    pub fn new(base: u32) -> Self {
        let data = if base == 0 { vec![0] } else { Vec::new() };
        Self {
            base,
            data,
            lookup: HashMap::new(),
        }
    }

    /// Appends `value` (or finds it among this generation's entries) and returns its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap outgrows 32-bit offsets.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.lookup.get(value) {
            return Ok(*index);
        }

        let index = to_index(self.base, self.data.len())?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.lookup.insert(value.to_string(), index);
        Ok(index)
    }

    /// Returns the stream bytes, padded to 4 bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        align_to(&mut data, 4);
        data
    }

    /// Returns the base of the following generation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap outgrows 32-bit offsets.
    pub fn next_base(&self) -> Result<u32> {
        to_index(self.base, padded_len(self.data.len()))
    }
}

/// Builder for the `#Blob` heap delta.
#[derive(Debug, Clone)]
pub struct BlobHeapBuilder {
    base: u32,
    data: Vec<u8>,
    lookup: HashMap<Vec<u8>, u32>,
}

impl BlobHeapBuilder {
    /// Creates a builder continuing after `base` bytes.
    #[must_use]
    pub fn new(base: u32) -> Self {
        let data = if base == 0 { vec![0] } else { Vec::new() };
        Self {
            base,
            data,
            lookup: HashMap::new(),
        }
    }

    /// Appends `value` (or finds it among this generation's entries) and returns its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob or heap is too large.
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.lookup.get(value) {
            return Ok(*index);
        }

        let index = to_index(self.base, self.data.len())?;
        let len = u32::try_from(value.len()).map_err(|_| malformed_error!("Blob too large"))?;
        write_compressed_uint(&mut self.data, len)?;
        self.data.extend_from_slice(value);
        self.lookup.insert(value.to_vec(), index);
        Ok(index)
    }

    /// Returns the stream bytes, padded to 4 bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        align_to(&mut data, 4);
        data
    }

    /// Returns the base of the following generation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap outgrows 32-bit offsets.
    pub fn next_base(&self) -> Result<u32> {
        to_index(self.base, padded_len(self.data.len()))
    }
}

/// Builder for the `#US` heap delta. Offsets double as `ldstr` token rows (`0x70xxxxxx`).
#[derive(Debug, Clone)]
pub struct UserStringHeapBuilder {
    base: u32,
    data: Vec<u8>,
    lookup: HashMap<String, u32>,
}

impl UserStringHeapBuilder {
    /// Creates a builder continuing after `base` bytes.
    #[must_use]
    pub fn new(base: u32) -> Self {
        let data = if base == 0 { vec![0] } else { Vec::new() };
        Self {
            base,
            data,
            lookup: HashMap::new(),
        }
    }

    /// Appends `value` and returns its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the offset no longer fits a 24-bit `ldstr`
    /// token row.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if let Some(index) = self.lookup.get(value) {
            return Ok(*index);
        }

        let index = to_index(self.base, self.data.len())?;
        if index > 0x00FF_FFFF {
            return Err(malformed_error!(
                "User string heap offset 0x{:X} exceeds 24 bits",
                index
            ));
        }

        let units = U16String::from_str(value);
        let mut special = false;
        let mut encoded = Vec::with_capacity(units.len() * 2 + 1);
        for unit in units.as_slice() {
            let [low, high] = unit.to_le_bytes();
            special |= high != 0 || matches!(low, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F);
            encoded.push(low);
            encoded.push(high);
        }
        encoded.push(u8::from(special));

        let len = u32::try_from(encoded.len())
            .map_err(|_| malformed_error!("User string too large"))?;
        write_compressed_uint(&mut self.data, len)?;
        self.data.extend_from_slice(&encoded);
        self.lookup.insert(value.to_string(), index);
        Ok(index)
    }

    /// Returns the stream bytes, padded to 4 bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        align_to(&mut data, 4);
        data
    }

    /// Returns the base of the following generation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap outgrows 32-bit offsets.
    pub fn next_base(&self) -> Result<u32> {
        to_index(self.base, padded_len(self.data.len()))
    }
}

/// Builder for the `#GUID` heap delta.
#[derive(Debug, Clone)]
pub struct GuidHeapBuilder {
    base: u32,
    entries: Vec<Guid>,
}

impl GuidHeapBuilder {
    /// Creates a builder continuing after `base` entries.
    #[must_use]
    pub fn new(base: u32) -> Self {
        Self {
            base,
            entries: Vec::new(),
        }
    }

    /// Appends `guid` and returns its 1-based index. The nil GUID is index 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index exceeds 32 bits.
    pub fn add(&mut self, guid: Guid) -> Result<u32> {
        if guid == Guid::ZERO {
            return Ok(0);
        }
        if let Some(position) = self.entries.iter().position(|g| *g == guid) {
            return to_index(self.base, position + 1);
        }

        self.entries.push(guid);
        to_index(self.base, self.entries.len())
    }

    /// Returns the stream bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|guid| guid.to_bytes()).collect()
    }

    /// Returns the base of the following generation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index exceeds 32 bits.
    pub fn next_base(&self) -> Result<u32> {
        to_index(self.base, self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_from_zero() {
        let mut heap = StringHeapBuilder::new(0);
        assert_eq!(heap.add("").unwrap(), 0);
        assert_eq!(heap.add("Main").unwrap(), 1);
        assert_eq!(heap.add("C").unwrap(), 6);
        assert_eq!(heap.add("Main").unwrap(), 1);

        assert_eq!(heap.bytes(), b"\0Main\0C\0".to_vec());
        assert_eq!(heap.next_base().unwrap(), 8);
    }

    #[test]
    fn strings_continue_after_base() {
        let mut heap = StringHeapBuilder::new(0x120);
        assert_eq!(heap.add("F").unwrap(), 0x120);
        assert_eq!(heap.add("").unwrap(), 0);
        assert_eq!(heap.bytes(), [b'F', 0, 0, 0]);
        assert_eq!(heap.next_base().unwrap(), 0x124);
    }

    #[test]
    fn blobs() {
        let mut heap = BlobHeapBuilder::new(0x40);
        assert_eq!(heap.add(&[]).unwrap(), 0);
        assert_eq!(heap.add(&[0x00, 0x00, 0x01]).unwrap(), 0x40);
        assert_eq!(heap.add(&[0x06, 0x08]).unwrap(), 0x44);
        assert_eq!(heap.add(&[0x00, 0x00, 0x01]).unwrap(), 0x40);
        assert_eq!(heap.bytes(), [0x03, 0x00, 0x00, 0x01, 0x02, 0x06, 0x08, 0x00]);
        assert_eq!(heap.next_base().unwrap(), 0x48);
    }

    #[test]
    fn user_strings() {
        let mut heap = UserStringHeapBuilder::new(0);
        assert_eq!(heap.add("Hi").unwrap(), 1);
        assert_eq!(heap.bytes(), [0x00, 0x05, b'H', 0x00, b'i', 0x00, 0x00, 0x00]);

        let mut heap = UserStringHeapBuilder::new(8);
        assert_eq!(heap.add("é").unwrap(), 8);
        // U+00E9 needs no special handling
        assert_eq!(heap.bytes()[..4], [0x03, 0xE9, 0x00, 0x00]);

        let mut heap = UserStringHeapBuilder::new(8);
        heap.add("it's").unwrap();
        assert_eq!(heap.bytes()[9], 0x01);
    }

    #[test]
    fn user_string_offset_limit() {
        let mut heap = UserStringHeapBuilder::new(0x0100_0000);
        assert!(heap.add("x").is_err());
    }

    #[test]
    fn guids() {
        let first = Guid::from_bytes([1; 16]);
        let second = Guid::from_bytes([2; 16]);

        let mut heap = GuidHeapBuilder::new(1);
        assert_eq!(heap.add(Guid::ZERO).unwrap(), 0);
        assert_eq!(heap.add(first).unwrap(), 2);
        assert_eq!(heap.add(second).unwrap(), 3);
        assert_eq!(heap.add(first).unwrap(), 2);
        assert_eq!(heap.bytes().len(), 32);
        assert_eq!(heap.next_base().unwrap(), 3);
    }
}
