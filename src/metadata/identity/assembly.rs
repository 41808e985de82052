//! Assembly identity: simple name, four-part version, culture and strong name.
//!
//! # ECMA-335 References
//!
//! - **Section II.6.2.1**: Assembly versioning - four-part version number semantics
//! - **Section II.6.2.1.3**: Public key and token - strong name identity format
//! - **Section II.22.5**: AssemblyRef table - assembly reference structure
//!
//! # Examples
//!
//! ```rust,ignore
//! use cildelta::metadata::identity::{AssemblyIdentity, AssemblyVersion};
//!
//! let runtime = AssemblyIdentity::parse(
//!     "System.Runtime, Version=8.0.0.0, Culture=neutral, PublicKeyToken=b03f5f7f11d50a3a"
//! )?;
//! assert_eq!(runtime.version, AssemblyVersion::new(8, 0, 0, 0));
//! # Ok::<(), cildelta::Error>(())
//! ```

use std::{fmt, fmt::Write as _, str::FromStr};

use crate::{metadata::identity::Identity, Error, Result};

/// Complete identity of an assembly as written into an `AssemblyRef` row.
///
/// Equality and hashing ignore the strong name representation: an identity carrying the
/// full public key and one carrying the token of that key name the same assembly. Use
/// [`AssemblyIdentity::public_key_token`] when the token itself matters.
#[derive(Debug, Clone)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `System.Runtime`.
    pub name: String,
    /// Concrete four-part version.
    pub version: AssemblyVersion,
    /// Culture, `None` for culture-neutral assemblies.
    pub culture: Option<String>,
    /// Public key or public key token, `None` for weakly named assemblies.
    pub strong_name: Option<Identity>,
}

impl PartialEq for AssemblyIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.culture == other.culture
            && self.public_key_token() == other.public_key_token()
    }
}

impl Eq for AssemblyIdentity {}

impl std::hash::Hash for AssemblyIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.culture.hash(state);
        self.public_key_token().hash(state);
    }
}

/// Four-part assembly version `major.minor.build.revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
    /// Build number.
    pub build: u16,
    /// Revision number.
    pub revision: u16,
}

impl AssemblyIdentity {
    /// Creates a new identity.
    pub fn new(
        name: impl Into<String>,
        version: AssemblyVersion,
        culture: Option<String>,
        strong_name: Option<Identity>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            culture,
            strong_name,
        }
    }

    /// Parses a display name such as
    /// `mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty name, an invalid token, or an
    /// invalid version component.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);

        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(malformed_error!("Assembly name cannot be empty"));
        }

        let mut version = AssemblyVersion::UNKNOWN;
        let mut culture = None;
        let mut strong_name = None;

        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                version = AssemblyVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if value != "neutral" {
                    culture = Some(value.to_string());
                }
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if value != "null" && !value.is_empty() {
                    strong_name = Some(Identity::Token(parse_token(value)?));
                }
            }
        }

        Ok(Self {
            name,
            version,
            culture,
            strong_name,
        })
    }

    /// Returns the SHA-1 public key token, if the assembly is strong named.
    #[must_use]
    pub fn public_key_token(&self) -> Option<u64> {
        self.strong_name
            .as_ref()
            .and_then(|identity| identity.token().ok())
    }

    /// Formats the identity as a display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);
        result.push_str(&self.name);

        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match self.public_key_token() {
            Some(token) => {
                for byte in token.to_le_bytes() {
                    let _ = write!(result, "{byte:02x}");
                }
            }
            None => result.push_str("null"),
        }

        result
    }

    /// Returns true if the assembly has no culture.
    #[must_use]
    pub fn is_culture_neutral(&self) -> bool {
        self.culture.is_none()
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn parse_token(value: &str) -> Result<u64> {
    if value.len() != 16 || !value.is_ascii() {
        return Err(malformed_error!(
            "PublicKeyToken must be exactly 16 hex characters, got '{}'",
            value
        ));
    }

    let mut bytes = [0u8; 8];
    for (index, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&value[index * 2..index * 2 + 2], 16)
            .map_err(|e| malformed_error!("Invalid hex in PublicKeyToken '{}': {}", value, e))?;
    }

    Ok(u64::from_le_bytes(bytes))
}

impl AssemblyVersion {
    /// The all-zero version.
    pub const UNKNOWN: Self = Self {
        major: 0,
        minor: 0,
        build: 0,
        revision: 0,
    };

    /// Creates a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parses `major[.minor[.build[.revision]]]`; missing components are 0.
    ///
    /// Wildcards are not accepted here; see [`crate::metadata::identity::VersionPattern`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidVersion`] for more than four parts or a component
    /// that is not a `u16`.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.split('.').collect();
        if parts.len() > 4 {
            return Err(Error::InvalidVersion(version_str.to_string()));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| Error::InvalidVersion(version_str.to_string()))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_display_name() {
        let identity = AssemblyIdentity::parse(
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089",
        )
        .unwrap();

        assert_eq!(identity.name, "mscorlib");
        assert_eq!(identity.version, AssemblyVersion::new(4, 0, 0, 0));
        assert!(identity.is_culture_neutral());
        assert_eq!(
            identity.public_key_token().unwrap().to_le_bytes(),
            [0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]
        );
        assert_eq!(
            identity.display_name(),
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );
    }

    #[test]
    fn parse_minimal() {
        let identity = AssemblyIdentity::parse("Lib").unwrap();
        assert_eq!(identity.version, AssemblyVersion::UNKNOWN);
        assert_eq!(identity.public_key_token(), None);
        assert_eq!(
            identity.to_string(),
            "Lib, Version=0.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn parse_errors() {
        assert!(AssemblyIdentity::parse("").is_err());
        assert!(AssemblyIdentity::parse("A, PublicKeyToken=123").is_err());
        assert!(AssemblyIdentity::parse("A, PublicKeyToken=zz7a5c561934e089").is_err());
        assert!(AssemblyIdentity::parse("A, Version=1.x").is_err());
    }

    #[test]
    fn equality_uses_token() {
        let key = vec![7u8; 32];
        let token = Identity::PubKey(key.clone()).token().unwrap();

        let with_key = AssemblyIdentity::new(
            "Lib",
            AssemblyVersion::new(1, 0, 0, 0),
            None,
            Some(Identity::PubKey(key)),
        );
        let with_token = AssemblyIdentity::new(
            "Lib",
            AssemblyVersion::new(1, 0, 0, 0),
            None,
            Some(Identity::Token(token)),
        );
        assert_eq!(with_key, with_token);
    }

    #[test]
    fn version_parse() {
        assert_eq!(
            AssemblyVersion::parse("1.2.3.4").unwrap(),
            AssemblyVersion::new(1, 2, 3, 4)
        );
        assert_eq!(
            "1.2".parse::<AssemblyVersion>().unwrap(),
            AssemblyVersion::new(1, 2, 0, 0)
        );
        assert!(matches!(
            AssemblyVersion::parse("1.2.3.4.5"),
            Err(Error::InvalidVersion(_))
        ));
        assert!(AssemblyVersion::parse("1.0.*").is_err());
        assert!(AssemblyVersion::parse("70000").is_err());
    }

    #[test]
    fn version_ordering() {
        assert!(AssemblyVersion::new(1, 0, 0, 1) > AssemblyVersion::new(1, 0, 0, 0));
        assert!(AssemblyVersion::new(2, 0, 0, 0) > AssemblyVersion::new(1, 9, 9, 9));
        assert_eq!(AssemblyVersion::new(1, 2, 3, 4).to_string(), "1.2.3.4");
    }
}
