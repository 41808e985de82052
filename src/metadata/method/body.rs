//! Method body headers and the IL stream of a delta.
//!
//! Method bodies start with either a tiny (1-byte) or a fat (12-byte) header, followed by
//! the CIL bytecode (ECMA-335 II.25.4). This module parses headers of existing bodies,
//! encodes headers for freshly compiled code, and lays out the IL stream that accompanies a
//! metadata delta: 4 reserved zero bytes followed by the bodies, with fat bodies aligned to
//! 4 bytes. The `MethodDef.RVA` of an updated method is the offset of its body inside that
//! stream.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::io::{align_to, read_le, write_le},
    metadata::{method::MethodBodyFlags, token::Token},
    Error::OutOfBounds,
    Result,
};

/// Largest code size a tiny header can express.
pub const TINY_MAX_CODE_SIZE: usize = 63;

/// Largest evaluation stack a tiny header implies.
pub const TINY_MAX_STACK: u16 = 8;

/// Parsed header of one method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the method (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// `StandAloneSig` token describing the locals. 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
}

impl MethodBody {
    /// Create a `MethodBody` object from a sequence of bytes.
    ///
    /// Tiny headers imply a `max_stack` of 8. Extra data sections are not interpreted.
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: usize::from(TINY_MAX_STACK),
                    is_fat: false,
                    is_init_local: false,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = (first_duo >> 12) * 4;
                let size_code = read_le::<u32>(&data[4..])?;
                if data.len() < (size_code as usize + size_header as usize) {
                    return Err(OutOfBounds);
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                Ok(MethodBody {
                    size_code: size_code as usize,
                    size_header: size_header as usize,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Get the size of the complete method (header + code)
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Returns the CIL bytes of a body that starts at `data[0]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the body.
    pub fn code<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        data.get(self.size_header..self.size())
            .ok_or(OutOfBounds)
    }
}

/// Encodes a complete method body: header followed by `code`.
///
/// The tiny form is used when the code is shorter than 64 bytes, the stack never exceeds 8
/// and there are no locals; everything else gets a fat header.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the code does not fit a 32-bit size.
pub fn encode_method_body(
    code: &[u8],
    max_stack: u16,
    local_sig: Option<Token>,
    init_locals: bool,
) -> Result<Vec<u8>> {
    let local_sig = local_sig.filter(|token| !token.is_null());

    if code.len() <= TINY_MAX_CODE_SIZE && max_stack <= TINY_MAX_STACK && local_sig.is_none() {
        let mut body = Vec::with_capacity(code.len() + 1);
        #[allow(clippy::cast_possible_truncation)]
        body.push(((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
        body.extend_from_slice(code);
        return Ok(body);
    }

    let code_size =
        u32::try_from(code.len()).map_err(|_| malformed_error!("Method body too large"))?;

    let mut flags = MethodBodyFlags::FAT_FORMAT.bits() | (3 << 12);
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS.bits();
    }

    let mut body = Vec::with_capacity(code.len() + 12);
    write_le(&mut body, flags);
    write_le(&mut body, max_stack);
    write_le(&mut body, code_size);
    write_le(&mut body, local_sig.map_or(0, |token| token.value()));
    body.extend_from_slice(code);
    Ok(body)
}

/// Builds the IL stream of a delta.
#[derive(Debug, Clone)]
pub struct IlStreamBuilder {
    data: Vec<u8>,
}

impl Default for IlStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IlStreamBuilder {
    /// Creates a stream holding only the 4 reserved leading bytes.
    #[must_use]
    pub fn new() -> Self {
        Self { data: vec![0; 4] }
    }

    /// Appends an encoded body (see [`encode_method_body`]) and returns its RVA within the
    /// stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `body` has no valid header or the stream
    /// outgrows 32-bit offsets.
    pub fn add_body(&mut self, body: &[u8]) -> Result<u32> {
        let header = MethodBody::from(body)?;
        if header.is_fat {
            align_to(&mut self.data, 4);
        }

        let rva = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("IL stream exceeds 32 bits"))?;
        self.data.extend_from_slice(body);
        Ok(rva)
    }

    /// Returns true if no body has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 4
    }

    /// Returns the finished stream.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        let data = [0x1E, 0x18, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];

        let method_header = MethodBody::from(&data).unwrap();

        assert!(!method_header.is_fat);
        assert!(!method_header.is_init_local);
        assert_eq!(method_header.max_stack, 8);
        assert_eq!(method_header.size_code, 7);
        assert_eq!(method_header.size_header, 1);
        assert_eq!(method_header.size(), 8);
        assert_eq!(method_header.local_var_sig_token, 0);
        assert_eq!(method_header.code(&data).unwrap(), &data[1..]);
    }

    #[test]
    fn fat() {
        let data = [
            0x13, 0x30, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11, 0x16, 0x2A,
        ];

        let method_header = MethodBody::from(&data).unwrap();

        assert!(method_header.is_fat);
        assert!(method_header.is_init_local);
        assert_eq!(method_header.max_stack, 2);
        assert_eq!(method_header.size_code, 2);
        assert_eq!(method_header.size_header, 12);
        assert_eq!(method_header.local_var_sig_token, 0x11000001);
    }

    #[test]
    fn truncated() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x1E, 0x00]).is_err());
        assert!(MethodBody::from(&[0x13, 0x30, 0x02]).is_err());
        assert!(MethodBody::from(&[0x00]).is_err());
    }

    #[test]
    fn encode_tiny() {
        let body = encode_method_body(&[0x16, 0x2A], 1, None, true).unwrap();
        assert_eq!(body, [0x0A, 0x16, 0x2A]);
    }

    #[test]
    fn encode_fat_for_locals() {
        let body = encode_method_body(&[0x16, 0x2A], 2, Some(Token(0x11000001)), true).unwrap();
        assert_eq!(
            body,
            [0x13, 0x30, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11, 0x16, 0x2A]
        );

        let parsed = MethodBody::from(&body).unwrap();
        assert_eq!(parsed.local_var_sig_token, 0x11000001);
    }

    #[test]
    fn encode_fat_for_stack_and_size() {
        assert!(MethodBody::from(&encode_method_body(&[0x00], 9, None, false).unwrap())
            .unwrap()
            .is_fat);
        assert!(MethodBody::from(&encode_method_body(&[0x00; 64], 1, None, false).unwrap())
            .unwrap()
            .is_fat);
        assert!(!MethodBody::from(&encode_method_body(&[0x00; 63], 8, None, false).unwrap())
            .unwrap()
            .is_fat);
    }

    #[test]
    fn il_stream_layout() {
        let mut stream = IlStreamBuilder::new();
        assert!(stream.is_empty());

        let tiny = encode_method_body(&[0x2A], 0, None, false).unwrap();
        assert_eq!(stream.add_body(&tiny).unwrap(), 4);

        let fat = encode_method_body(&[0x2A], 0, Some(Token(0x11000002)), true).unwrap();
        assert_eq!(stream.add_body(&fat).unwrap(), 8);

        let bytes = stream.into_bytes();
        assert_eq!(&bytes[..4], [0, 0, 0, 0]);
        assert_eq!(&bytes[4..6], [0x06, 0x2A]);
        assert_eq!(&bytes[6..8], [0, 0]);
        assert_eq!(bytes.len(), 8 + 13);
    }
}
