//! Low-level byte order and safe reading/writing utilities for ECMA-335 structures.
//!
//! This module provides endian-aware, bounds-checked binary reading and writing for the
//! metadata and IL structures that make up an Edit-and-Continue delta. Delta emission is
//! mostly append-only, so writers operate on growable `Vec<u8>` buffers; the few places
//! that patch an already reserved field (stream header offsets, branch targets) use the
//! offset-based [`write_le_at`].
//!
//! # Key Components
//!
//! ## Core Trait
//! - [`crate::file::io::CilIO`] - Conversion between primitive integers and their byte arrays
//!
//! ## Reading
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Little-endian reads
//! - [`crate::file::io::read_be_at`] - Big-endian reads (used by compressed integers)
//! - [`crate::file::io::read_compressed_uint`] - ECMA-335 II.23.2 compressed unsigned integers
//!
//! ## Writing
//! - [`crate::file::io::write_le`] - Append a little-endian value to a buffer
//! - [`crate::file::io::write_le_at`] - Overwrite a little-endian value at an offset, auto-advancing
//! - [`crate::file::io::write_compressed_uint`] - Append an ECMA-335 compressed unsigned integer
//! - [`crate::file::io::align_to`] - Zero-pad a buffer up to an alignment boundary
//!
//! # Examples
//!
//! ```rust,ignore
//! use cildelta::file::io::{read_le_at, write_le};
//!
//! let mut data = Vec::new();
//! write_le(&mut data, 1u16);
//! write_le(&mut data, 3u32);
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 3);
//! assert_eq!(offset, 6);
//! # Ok::<(), cildelta::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All functions in this module are pure and operate on caller-owned buffers.

use crate::{Error::OutOfBounds, Result};

/// Conversion between a primitive integer and its fixed-size byte representation.
pub trait CilIO: Sized + Copy {
    /// Associated byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte array in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte array in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
    /// Write T to a byte array in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
    /// Write T to a byte array in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`,
/// advancing the offset by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(bytes) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(bytes))
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`,
/// advancing the offset by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(bytes) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_be_bytes(bytes))
}

/// Appends a value of type `T` in little-endian byte order to `data`.
pub fn write_le<T: CilIO>(data: &mut Vec<u8>, value: T) {
    data.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Overwrites a value of type `T` in little-endian byte order at `offset`,
/// advancing the offset by the number of bytes written.
///
/// Used to patch fields that were reserved before their value was known.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Appends `value` as an ECMA-335 compressed unsigned integer (big-endian, II.23.2).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds `0x1FFF_FFFF`, the largest
/// encodable value.
pub fn write_compressed_uint(data: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => {
            #[allow(clippy::cast_possible_truncation)]
            data.push(value as u8);
        }
        0x80..=0x3FFF => {
            #[allow(clippy::cast_possible_truncation)]
            data.extend_from_slice(&(0x8000_u16 | value as u16).to_be_bytes());
        }
        0x4000..=0x1FFF_FFFF => {
            data.extend_from_slice(&(0xC000_0000_u32 | value).to_be_bytes());
        }
        _ => {
            return Err(malformed_error!(
                "Value 0x{:08X} is too large for a compressed integer",
                value
            ))
        }
    }

    Ok(())
}

/// Reads an ECMA-335 compressed unsigned integer at `offset`, advancing the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] on truncated input or [`crate::Error::Malformed`]
/// on an invalid lead byte.
pub fn read_compressed_uint(data: &[u8], offset: &mut usize) -> Result<u32> {
    let lead = *data.get(*offset).ok_or(OutOfBounds)?;
    if lead & 0x80 == 0 {
        *offset += 1;
        Ok(u32::from(lead))
    } else if lead & 0xC0 == 0x80 {
        Ok(u32::from(read_be_at::<u16>(data, offset)? & 0x3FFF))
    } else if lead & 0xE0 == 0xC0 {
        Ok(read_be_at::<u32>(data, offset)? & 0x1FFF_FFFF)
    } else {
        Err(malformed_error!("Invalid compressed integer lead byte 0x{:02X}", lead))
    }
}

/// Zero-pads `data` until its length is a multiple of `alignment`.
pub fn align_to(data: &mut Vec<u8>, alignment: usize) {
    let padded = data.len().next_multiple_of(alignment);
    data.resize(padded, 0);
}
