//! ECMA-335 metadata primitives for Edit-and-Continue deltas.
//!
//! This module contains everything needed to lay out a metadata delta byte for byte and
//! to read one back: tokens and table rows, assembly identities and wildcard versions,
//! append-only heaps, signature blobs, IL and method body encoding, the metadata root and
//! the `#-` tables stream, plus read access to the generation-0 image a delta applies to.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references used throughout .NET
//! - [`tables`] - Table ids, coded indices, delta row layouts and the `#-` writer
//! - [`identity`] - Assembly identities, public key tokens and version patterns
//! - [`heaps`] - `#Strings`, `#Blob`, `#US` and `#GUID` builders continuing from a base
//! - [`signatures`] - Method, field, local and type-spec signature blobs
//! - [`method`] - IL instruction encoding, method body headers and the IL stream
//! - [`root`] - Metadata root (`BSJB`) writer and reader
//! - [`streams`] - Heap readers used when inspecting a delta
//! - [`delta`] - [`delta::MetadataDeltaView`], a parsed view of an emitted delta
//! - [`image`] - [`image::MetadataReader`] over a finished generation-0 image
//!
//! # Examples
//!
//! ```rust
//! use cildelta::metadata::{tables::TableId, token::Token};
//!
//! let token = Token::new(0x0600_0001);
//! assert_eq!(token.table_id(), Some(TableId::MethodDef));
//! assert_eq!(token.row(), 1);
//! ```

/// Parsed view of an emitted metadata delta
pub mod delta;
/// Append-only metadata heap builders
pub mod heaps;
/// Identity of assemblies and their versions
pub mod identity;
/// Read access to a generation-0 image
pub mod image;
/// IL encoding and method bodies
pub mod method;
/// The root metadata structure
pub mod root;
/// Signature blobs
pub mod signatures;
/// Metadata heap readers
pub mod streams;
/// Metadata tables of a delta
pub mod tables;
/// Commonly used metadata token type
pub mod token;
