//! Byte-level reading and writing helpers.
//!
//! Everything that touches raw bytes (heap builders, the `#-` writer, IL encoding, the
//! delta reader) goes through [`io`], so bounds checks and endianness live in one place.

pub mod io;
