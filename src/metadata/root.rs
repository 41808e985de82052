//! Metadata root header and stream directory.
//!
//! The metadata root is the entry point of every metadata blob, including a delta: the
//! `BSJB` signature, a version string, and the directory of streams (`#-`, `#Strings`, `#US`,
//! `#GUID`, `#Blob`). [`Root::read`] parses an existing root; [`write_metadata_root`] lays out
//! a new one around already serialized streams.
//!
//! # Example
//!
//! ```rust
//! use cildelta::metadata::root::{write_metadata_root, Root};
//!
//! let metadata = write_metadata_root(&[("#-", vec![0; 8]), ("#Strings", vec![0; 4])])?;
//! let root = Root::read(&metadata)?;
//! assert_eq!(root.version, "v4.0.30319");
//! assert_eq!(root.stream_data(&metadata, "#Strings")?, Some(&[0u8; 4][..]));
//! # Ok::<(), cildelta::Error>(())
//! ```
//!
//! # References
//!
//! - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{align_to, read_le, read_le_at, write_le},
    metadata::streams::StreamHeader,
    Error::OutOfBounds,
    Result,
};

/// The MAGIC value indicating the CIL header
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Runtime version string written into emitted roots.
pub const METADATA_VERSION: &str = "v4.0.30319";

/// The header of the present Metadata, providing necessary information for parsing.
///
/// ## Reference
/// - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)
#[derive(Debug, Clone)]
pub struct Root {
    /// Magic signature for physical metadata: 0x424A5342
    pub signature: u32,
    /// `MajorVersion`
    pub major_version: u16,
    /// `MinorVersion`
    pub minor_version: u16,
    /// Always 0
    pub reserved: u32,
    /// Number of bytes allocated to hold version string
    pub length: u32,
    /// 'VersionString' without its null padding
    pub version: String,
    /// Reserved, always 0
    pub flags: u16,
    /// Number of Streams
    pub stream_number: u16,
    /// Streams
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Reads a [`Root`] metadata header from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be read
    ///
    /// # Errors
    /// Returns an error if the data is too short, the signature is invalid, or the stream directory is malformed.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 36 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_string_length = read_le_at::<u32>(data, &mut (12))?;
        let str_end = match u32::checked_add(version_string_length, 16_u32) {
            Some(str_end) => str_end as usize,
            None => {
                return Err(malformed_error!(
                    "Version string length causing integer overflow - {} + {}",
                    version_string_length,
                    16
                ))
            }
        };
        if str_end + 4 > data.len() {
            return Err(OutOfBounds);
        }

        let version: String = data[16..str_end]
            .iter()
            .take_while(|byte| **byte != 0)
            .map(|byte| char::from(*byte))
            .collect();

        let flags = read_le::<u16>(&data[str_end..])?;
        let stream_count = read_le::<u16>(&data[str_end + 2..])?;
        if stream_count == 0 || stream_count > 6 || (stream_count as usize * 9) > data.len() {
            // 9 - min size that a valid StreamHeader can be; Must have streams, no more than 6 possible
            return Err(malformed_error!("Invalid stream count"));
        }

        let mut streams: Vec<StreamHeader> = Vec::with_capacity(stream_count as usize);
        let mut stream_offset = str_end + 4;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(OutOfBounds);
            }

            let new_stream = StreamHeader::from(&data[stream_offset..])?;
            match u32::checked_add(new_stream.offset, new_stream.size) {
                Some(range) => {
                    if range as usize > data.len() {
                        return Err(OutOfBounds);
                    }
                }
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        new_stream.offset,
                        new_stream.size
                    ))
                }
            }

            if streams.iter().any(|stream| stream.name == new_stream.name) {
                return Err(malformed_error!("Duplicate stream - {}", new_stream.name));
            }

            stream_offset += new_stream.encoded_size();
            streams.push(new_stream);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length: version_string_length,
            flags,
            stream_number: stream_count,
            stream_headers: streams,
            version,
        })
    }

    /// Returns the bytes of the stream called `name`, if present.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the stream lies outside `data`.
    pub fn stream_data<'a>(&self, data: &'a [u8], name: &str) -> Result<Option<&'a [u8]>> {
        match self.stream_headers.iter().find(|stream| stream.name == name) {
            Some(stream) => {
                let start = stream.offset as usize;
                let end = start + stream.size as usize;
                data.get(start..end).map(Some).ok_or(OutOfBounds)
            }
            None => Ok(None),
        }
    }
}

/// Lays out a metadata root followed by `streams`, in the given order.
///
/// Every stream is padded to 4 bytes; the directory records the padded sizes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the result outgrows 32-bit offsets.
pub fn write_metadata_root(streams: &[(&str, Vec<u8>)]) -> Result<Vec<u8>> {
    let version_length = (METADATA_VERSION.len() + 1).next_multiple_of(4);

    let directory_size: usize = streams
        .iter()
        .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
        .sum();
    let header_size = 16 + version_length + 4 + directory_size;

    let mut headers = Vec::with_capacity(streams.len());
    let mut offset = header_size;
    for (name, data) in streams {
        let size = data.len().next_multiple_of(4);
        headers.push(StreamHeader {
            offset: u32::try_from(offset)
                .map_err(|_| malformed_error!("Metadata exceeds 32 bits"))?,
            size: u32::try_from(size).map_err(|_| malformed_error!("Stream exceeds 32 bits"))?,
            name: (*name).to_string(),
        });
        offset += size;
    }

    let mut buffer = Vec::with_capacity(offset);
    write_le(&mut buffer, CIL_HEADER_MAGIC);
    write_le(&mut buffer, 1u16);
    write_le(&mut buffer, 1u16);
    write_le(&mut buffer, 0u32);
    #[allow(clippy::cast_possible_truncation)]
    write_le(&mut buffer, version_length as u32);
    buffer.extend_from_slice(METADATA_VERSION.as_bytes());
    buffer.resize(16 + version_length, 0);
    write_le(&mut buffer, 0u16);
    #[allow(clippy::cast_possible_truncation)]
    write_le(&mut buffer, streams.len() as u16);

    for header in &headers {
        header.write(&mut buffer);
    }
    for (_, data) in streams {
        buffer.extend_from_slice(data);
        align_to(&mut buffer, 4);
    }

    Ok(buffer)
}
