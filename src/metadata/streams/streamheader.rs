//! Stream Header for .NET Metadata Streams
//!
//! Provides parsing and writing of stream headers, which describe the name, offset, and size of each
//! metadata stream.
//!
//! # Reference
//! - [ECMA-335 II.24.2.2](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{align_to, read_le, write_le},
    metadata::streams::{
        BLOB_STREAM, GUID_STREAM, STRINGS_STREAM, TABLES_STREAM_COMPRESSED,
        TABLES_STREAM_UNCOMPRESSED, USER_STRINGS_STREAM,
    },
    Error::OutOfBounds,
    Result,
};

const KNOWN_STREAMS: [&str; 6] = [
    STRINGS_STREAM,
    USER_STRINGS_STREAM,
    BLOB_STREAM,
    GUID_STREAM,
    TABLES_STREAM_COMPRESSED,
    TABLES_STREAM_UNCOMPRESSED,
];

/// A stream header provides the names, and the position and length of a particular table or heap. Note that the
/// length of a Stream header structure is not fixed, but depends on the length of its name field (a variable
/// length null-terminated string, padded to 4 bytes).
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - II.24.2.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Memory offset with start of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of this stream in bytes, shall be a multiple of 4
    pub size: u32,
    /// Name of Stream\0 max 32char
    pub name: String,
}

impl StreamHeader {
    /// Create a `StreamHeader` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is too short or stream header format is invalid
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let name_bytes: Vec<u8> = data[8..]
            .iter()
            .take(32)
            .take_while(|byte| **byte != 0)
            .copied()
            .collect();
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        if !KNOWN_STREAMS.iter().any(|valid_name| name == *valid_name) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Number of bytes this header occupies in the stream directory.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        8 + (self.name.len() + 1).next_multiple_of(4)
    }

    /// Appends the header to `buffer`.
    pub fn write(&self, buffer: &mut Vec<u8>) {
        write_le(buffer, self.offset);
        write_le(buffer, self.size);
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0);
        align_to(buffer, 4);
    }
}
