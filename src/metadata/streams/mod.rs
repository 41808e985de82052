//! Read-side views of metadata streams.
//!
//! These views are used to inspect emitted deltas and to read generation-0 metadata. Every
//! heap view is created with a `base`: the cumulative size of the heap in all earlier
//! generations. Indices passed to `get` are absolute, exactly as they appear in table
//! columns, and the view subtracts its base before looking the entry up. A base of 0 reads
//! a complete (generation 0) heap.
//!
//! # Stream Types
//!
//! ## String Heaps
//! - **`#Strings`** - UTF-8 identifier strings heap containing type names, member names, etc.
//! - **`#US`** - UTF-16 user string heap containing string literals from IL code.
//!
//! ## Binary Data
//! - **`#Blob`** - Binary heap containing signatures and other variable-length structures.
//! - **`#GUID`** - Sequence of 128-bit GUIDs (module version ids, EnC ids).
//!
//! ## Metadata Tables
//! - **`#-`** - Uncompressed tables stream used by Edit-and-Continue deltas; read by
//!   [`crate::metadata::delta::MetadataDeltaView`].
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 24.2.2 - Stream Headers

/// The header of a stream, indicates location + size + name
mod streamheader;
pub use streamheader::StreamHeader;

/// The '#String' heap implementation
mod strings;
pub use strings::Strings;

/// The '#US' heap implementation
mod userstrings;
pub use userstrings::UserStrings;

/// The '#GUID' heap / array implementation
mod guid;
pub use guid::Guid;

/// The '#Blob' heap implementation
mod blob;
pub use blob::Blob;

/// Name of the uncompressed tables stream.
pub const TABLES_STREAM_UNCOMPRESSED: &str = "#-";
/// Name of the compressed tables stream.
pub const TABLES_STREAM_COMPRESSED: &str = "#~";
/// Name of the identifier heap.
pub const STRINGS_STREAM: &str = "#Strings";
/// Name of the user string heap.
pub const USER_STRINGS_STREAM: &str = "#US";
/// Name of the GUID heap.
pub const GUID_STREAM: &str = "#GUID";
/// Name of the blob heap.
pub const BLOB_STREAM: &str = "#Blob";

fn local_index(index: usize, base: usize) -> crate::Result<usize> {
    index.checked_sub(base).ok_or(crate::Error::OutOfBounds)
}
