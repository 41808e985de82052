//! Diagnostics reported by delta emission.
//!
//! Every recoverable emission problem becomes a [`Diagnostic`] in the returned
//! [`crate::EmitResult`] instead of an `Err`. A diagnostic is a `(code, severity,
//! arguments)` tuple: the code identifies the problem family, the arguments carry the
//! names and versions a caller needs to present or act on it.
//!
//! # Key Components
//!
//! - [`Diagnostic`] - Individual diagnostic entry
//! - [`DiagnosticCode`] - The `ENC00xx` problem families
//! - [`DiagnosticSeverity`] - Severity level (Info, Warning, Error)
//!
//! # Usage Examples
//!
//! ```rust
//! use cildelta::{Diagnostic, DiagnosticCode, DiagnosticSeverity};
//!
//! let diagnostic = Diagnostic::reference_version_changed("Lib", "1.0.0.0", "2.0.0.0");
//! assert_eq!(diagnostic.code, DiagnosticCode::ReferenceVersionChanged);
//! assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
//! assert_eq!(diagnostic.arguments, ["Lib", "1.0.0.0", "2.0.0.0"]);
//! assert_eq!(
//!     diagnostic.to_string(),
//!     "[ERROR] ENC0001: Referenced assembly 'Lib' changed version from '1.0.0.0' to '2.0.0.0' during debugging"
//! );
//! ```

use std::fmt;

use crate::metadata::token::Token;

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    /// Informational message, not indicating a problem.
    Info,

    /// Something unusual that did not prevent emission.
    Warning,

    /// The emission was rejected; no delta and no next baseline were produced.
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "INFO"),
            DiagnosticSeverity::Warning => write!(f, "WARN"),
            DiagnosticSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// Problem family of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticCode {
    /// `ENC0001`: a committed assembly reference changed version.
    ///
    /// Arguments: dependency name, committed version, new version.
    ReferenceVersionChanged,

    /// `ENC0002`: two references share the same identity key.
    ///
    /// Arguments: dependency name, extern alias (empty if none).
    AmbiguousReference,

    /// `ENC0003`: a symbol matched more than one counterpart.
    ///
    /// Arguments: symbol, candidate count.
    AmbiguousSymbol,

    /// `ENC0004`: the edit cannot be expressed as a delta.
    ///
    /// Arguments: symbol, reason.
    UnsupportedEdit,

    /// `ENC0005`: the symbol an edit targets has no definition in the baseline.
    ///
    /// Arguments: symbol.
    EditTargetNotFound,

    /// `ENC0006`: an inserted symbol already exists in the baseline.
    ///
    /// Arguments: symbol.
    InsertCollision,

    /// `ENC0007`: a deleted method needs a core library reference for its stub body.
    ///
    /// Arguments: method.
    MissingCoreLibrary,
}

impl DiagnosticCode {
    /// The `ENC00xx` identifier.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            DiagnosticCode::ReferenceVersionChanged => "ENC0001",
            DiagnosticCode::AmbiguousReference => "ENC0002",
            DiagnosticCode::AmbiguousSymbol => "ENC0003",
            DiagnosticCode::UnsupportedEdit => "ENC0004",
            DiagnosticCode::EditTargetNotFound => "ENC0005",
            DiagnosticCode::InsertCollision => "ENC0006",
            DiagnosticCode::MissingCoreLibrary => "ENC0007",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Problem family.
    pub code: DiagnosticCode,

    /// Severity level.
    pub severity: DiagnosticSeverity,

    /// Positional arguments, as documented on each [`DiagnosticCode`].
    pub arguments: Vec<String>,

    /// Optional baseline token the diagnostic refers to.
    pub token: Option<Token>,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    pub fn error<I, S>(code: DiagnosticCode, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            severity: DiagnosticSeverity::Error,
            arguments: arguments.into_iter().map(Into::into).collect(),
            token: None,
        }
    }

    /// Adds metadata token information to the diagnostic.
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// `ENC0001` for dependency `name`.
    pub fn reference_version_changed(
        name: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        let arguments: [String; 3] = [name.into(), old.into(), new.into()];
        Self::error(DiagnosticCode::ReferenceVersionChanged, arguments)
    }

    /// `ENC0002` for dependency `name`.
    pub fn ambiguous_reference(name: impl Into<String>, alias: Option<&str>) -> Self {
        let arguments: [String; 2] = [name.into(), alias.unwrap_or_default().to_string()];
        Self::error(DiagnosticCode::AmbiguousReference, arguments)
    }

    /// `ENC0004` for `symbol`.
    pub fn unsupported_edit(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        let arguments: [String; 2] = [symbol.into(), reason.into()];
        Self::error(DiagnosticCode::UnsupportedEdit, arguments)
    }

    /// Returns true for errors.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    fn argument(&self, index: usize) -> &str {
        self.arguments.get(index).map_or("", String::as_str)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.severity, self.code)?;

        match self.code {
            DiagnosticCode::ReferenceVersionChanged => write!(
                f,
                "Referenced assembly '{}' changed version from '{}' to '{}' during debugging",
                self.argument(0),
                self.argument(1),
                self.argument(2)
            )?,
            DiagnosticCode::AmbiguousReference => write!(
                f,
                "Referenced assembly '{}' (alias '{}') is declared more than once",
                self.argument(0),
                self.argument(1)
            )?,
            DiagnosticCode::AmbiguousSymbol => write!(
                f,
                "'{}' matches {} symbols of the previous generation",
                self.argument(0),
                self.argument(1)
            )?,
            DiagnosticCode::UnsupportedEdit => write!(
                f,
                "Edit of '{}' is not supported: {}",
                self.argument(0),
                self.argument(1)
            )?,
            DiagnosticCode::EditTargetNotFound => write!(
                f,
                "'{}' has no definition in the previous generation",
                self.argument(0)
            )?,
            DiagnosticCode::InsertCollision => write!(
                f,
                "'{}' already exists in the previous generation",
                self.argument(0)
            )?,
            DiagnosticCode::MissingCoreLibrary => write!(
                f,
                "Deleting '{}' requires a core library reference",
                self.argument(0)
            )?,
        }

        if let Some(token) = self.token {
            write!(f, " (token: 0x{:08x})", token.value())?;
        }

        Ok(())
    }
}
