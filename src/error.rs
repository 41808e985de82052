use thiserror::Error;

use crate::metadata::tables::TableId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall in two families. Structural errors (`OutOfBounds`, `Malformed`, ...) come from
/// reading or writing ECMA-335 binary structures. Emission errors come from the
/// Edit-and-Continue pipeline itself.
///
/// Note that most user-facing emission problems never reach callers as an `Err`: an edit that
/// cannot be applied is reported as a [`crate::Diagnostic`] inside the
/// [`crate::EmitResult`], and the input baseline stays valid. Only cancellation and internal
/// invariant violations abort an emission with an `Err`.
///
/// # Error Categories
///
/// ## Binary format errors
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer boundary
/// - [`Error::Malformed`] - Corrupted or invalid metadata structure
/// - [`Error::NotSupported`] - Unsupported format or feature
///
/// ## Identity errors
/// - [`Error::InvalidVersion`] - A version string or version pattern could not be parsed
///
/// ## Edit-and-Continue errors
/// - [`Error::BaselineMismatch`] - A compilation does not describe the image it is paired with
/// - [`Error::Unsupported`] - An edit requires something the delta format cannot express
/// - [`Error::SymbolNotFound`] - A symbol has no definition in the baseline or the delta
/// - [`Error::Cancelled`] - The caller's cancellation predicate fired
/// - [`Error::InvariantViolation`] - A token or heap invariant would have been broken
/// - [`Error::TokenExhausted`] - A metadata table ran out of 24-bit row ids
///
/// # Examples
///
/// ```rust,ignore
/// use cildelta::{Error, DeltaEmitter, EmitConfig};
///
/// match DeltaEmitter::new(EmitConfig::default()).emit_difference(&baseline, &next, &edits, &|| false) {
///     Ok(result) if result.is_success() => println!("delta ready"),
///     Ok(result) => eprintln!("rejected: {:?}", result.diagnostics),
///     Err(Error::Cancelled) => eprintln!("cancelled, baseline untouched"),
///     Err(e) => eprintln!("emission aborted: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An out of bound access was attempted while reading or writing binary data.
    ///
    /// This is a safety check to prevent buffer overruns during parsing and serialization.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The data is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This format or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// A version string or version pattern could not be parsed.
    ///
    /// Raised for malformed four-part versions as well as for wildcard patterns that
    /// place `*` anywhere other than the build or revision position.
    #[error("Invalid version - {0}")]
    InvalidVersion(String),

    /// The compilation paired with a generation-0 image does not describe that image.
    ///
    /// Raised while building the initial baseline when a declared type, method or field
    /// has no corresponding row in the image.
    #[error("Baseline does not match compilation - {0}")]
    BaselineMismatch(String),

    /// An edit requires something the delta format or the runtime cannot express.
    ///
    /// The emitter converts this error into an `ENC0004` diagnostic; callers only see it
    /// when using the lower-level building blocks directly.
    #[error("Unsupported edit - {0}")]
    Unsupported(String),

    /// A referenced symbol has no definition in the baseline or in the current delta.
    ///
    /// The emitter converts this error into an `ENC0005` diagnostic.
    #[error("Symbol not found - {0}")]
    SymbolNotFound(String),

    /// The caller's cancellation predicate fired between two emission steps.
    ///
    /// The input baseline is untouched and may be reused.
    #[error("Emission was cancelled")]
    Cancelled,

    /// A token or heap invariant would have been broken by the emitted delta.
    ///
    /// This indicates a defect, not a user error: a token reassigned to a different symbol,
    /// a token below the high-water mark handed out as new, or a heap offset rewritten.
    /// The emission is aborted rather than producing a corrupt delta.
    #[error("Internal invariant violated - {0}")]
    InvariantViolation(String),

    /// A metadata table has no row ids left (rows are limited to 24 bits).
    #[error("No more row ids available in table {0:?}")]
    TokenExhausted(TableId),
}
