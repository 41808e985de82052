//! Wildcard assembly versions such as `1.0.*` and `1.0.0.*`.
//!
//! A wildcard version is a two-phase value. The source declaration is an unresolved
//! [`VersionPattern`]; finalizing a compilation resolves it exactly once against a
//! [`BuildStamp`] into a concrete [`AssemblyVersion`], which is what gets embedded in
//! metadata and compared from then on. The pattern is kept next to the resolved version
//! so later generations can ask whether two concrete versions are explainable by the same
//! pattern ([`VersionPattern::admits`]).
//!
//! Expansion follows the .NET convention:
//! - `*` in the build position: build = days since 2000-01-01, revision = seconds since
//!   midnight / 2
//! - `*` in the revision position: revision = seconds since midnight / 2

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{metadata::identity::AssemblyVersion, Error, Result};

const SECONDS_PER_DAY: u64 = 86_400;
/// Seconds between 1970-01-01 and 2000-01-01.
const EPOCH_2000: u64 = 946_684_800;
/// Largest revision a wildcard can produce.
const MAX_WILDCARD_REVISION: u16 = 43_199;

/// The build-time instant a wildcard version is expanded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildStamp {
    days: u16,
    seconds: u32,
}

impl BuildStamp {
    /// Creates a stamp from days since 2000-01-01 and seconds since midnight.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidVersion`] if `seconds` is not within one day.
    pub fn new(days: u16, seconds: u32) -> Result<Self> {
        if u64::from(seconds) >= SECONDS_PER_DAY {
            return Err(Error::InvalidVersion(format!(
                "{seconds} seconds exceeds one day"
            )));
        }

        Ok(Self { days, seconds })
    }

    /// Derives a stamp from a point in time, using UTC as the day boundary.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidVersion`] for instants before 2000-01-01 or after the
    /// last day a `u16` build number can express.
    pub fn from_system_time(time: SystemTime) -> Result<Self> {
        let since_unix = time
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::InvalidVersion("build time before 1970".to_string()))?
            .as_secs();
        let since_2000 = since_unix
            .checked_sub(EPOCH_2000)
            .ok_or_else(|| Error::InvalidVersion("build time before 2000".to_string()))?;

        let days = u16::try_from(since_2000 / SECONDS_PER_DAY)
            .map_err(|_| Error::InvalidVersion("build time beyond version range".to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let seconds = (since_2000 % SECONDS_PER_DAY) as u32;

        Self::new(days, seconds)
    }

    /// The current time as a stamp.
    ///
    /// # Errors
    /// See [`BuildStamp::from_system_time`].
    pub fn now() -> Result<Self> {
        Self::from_system_time(SystemTime::now())
    }

    /// Days since 2000-01-01.
    #[must_use]
    pub fn days(&self) -> u16 {
        self.days
    }

    /// Seconds since midnight.
    #[must_use]
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    #[allow(clippy::cast_possible_truncation)]
    fn revision(self) -> u16 {
        (self.seconds / 2) as u16
    }
}

/// A declared assembly version, possibly containing a `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionPattern {
    /// A plain version without wildcard.
    Fixed(AssemblyVersion),
    /// `major.minor.*`
    BuildWildcard {
        /// Major version.
        major: u16,
        /// Minor version.
        minor: u16,
    },
    /// `major.minor.build.*`
    RevisionWildcard {
        /// Major version.
        major: u16,
        /// Minor version.
        minor: u16,
        /// Build number.
        build: u16,
    },
}

impl VersionPattern {
    /// Parses a declared version.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidVersion`] if `*` appears anywhere other than the last
    /// component of a three-part (build) or four-part (revision) version.
    pub fn parse(pattern: &str) -> Result<Self> {
        let parts: Vec<&str> = pattern.split('.').collect();
        let invalid = || Error::InvalidVersion(pattern.to_string());

        match parts.as_slice() {
            [major, minor, "*"] => Ok(VersionPattern::BuildWildcard {
                major: major.parse().map_err(|_| invalid())?,
                minor: minor.parse().map_err(|_| invalid())?,
            }),
            [major, minor, build, "*"] => Ok(VersionPattern::RevisionWildcard {
                major: major.parse().map_err(|_| invalid())?,
                minor: minor.parse().map_err(|_| invalid())?,
                build: build.parse().map_err(|_| invalid())?,
            }),
            _ if pattern.contains('*') => Err(invalid()),
            _ => Ok(VersionPattern::Fixed(AssemblyVersion::parse(pattern)?)),
        }
    }

    /// Returns true if the pattern contains a wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, VersionPattern::Fixed(_))
    }

    /// Expands the pattern against `stamp`.
    #[must_use]
    pub fn resolve(&self, stamp: BuildStamp) -> AssemblyVersion {
        match *self {
            VersionPattern::Fixed(version) => version,
            VersionPattern::BuildWildcard { major, minor } => {
                AssemblyVersion::new(major, minor, stamp.days(), stamp.revision())
            }
            VersionPattern::RevisionWildcard {
                major,
                minor,
                build,
            } => AssemblyVersion::new(major, minor, build, stamp.revision()),
        }
    }

    /// Returns true if `version` could have been produced by resolving this pattern.
    #[must_use]
    pub fn admits(&self, version: &AssemblyVersion) -> bool {
        match *self {
            VersionPattern::Fixed(fixed) => fixed == *version,
            VersionPattern::BuildWildcard { major, minor } => {
                version.major == major
                    && version.minor == minor
                    && version.revision <= MAX_WILDCARD_REVISION
            }
            VersionPattern::RevisionWildcard {
                major,
                minor,
                build,
            } => {
                version.major == major
                    && version.minor == minor
                    && version.build == build
                    && version.revision <= MAX_WILDCARD_REVISION
            }
        }
    }
}

impl From<AssemblyVersion> for VersionPattern {
    fn from(version: AssemblyVersion) -> Self {
        VersionPattern::Fixed(version)
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPattern::Fixed(version) => write!(f, "{version}"),
            VersionPattern::BuildWildcard { major, minor } => write!(f, "{major}.{minor}.*"),
            VersionPattern::RevisionWildcard {
                major,
                minor,
                build,
            } => write!(f, "{major}.{minor}.{build}.*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_patterns() {
        assert_eq!(
            VersionPattern::parse("1.0.*").unwrap(),
            VersionPattern::BuildWildcard { major: 1, minor: 0 }
        );
        assert_eq!(
            VersionPattern::parse("1.0.0.*").unwrap(),
            VersionPattern::RevisionWildcard {
                major: 1,
                minor: 0,
                build: 0
            }
        );
        assert_eq!(
            VersionPattern::parse("1.2.3.4").unwrap(),
            VersionPattern::Fixed(AssemblyVersion::new(1, 2, 3, 4))
        );
        assert_eq!(VersionPattern::parse("1.0.*").unwrap().to_string(), "1.0.*");
    }

    #[test]
    fn parse_misplaced_wildcard() {
        for bad in ["*", "1.*", "1.*.0", "1.0.*.0", "1.0.0.0.*", "a.0.*"] {
            assert!(
                matches!(VersionPattern::parse(bad), Err(Error::InvalidVersion(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn resolve_build_wildcard() {
        let stamp = BuildStamp::new(9000, 3601).unwrap();
        let version = VersionPattern::parse("1.0.*").unwrap().resolve(stamp);
        assert_eq!(version, AssemblyVersion::new(1, 0, 9000, 1800));
    }

    #[test]
    fn resolve_revision_wildcard() {
        let stamp = BuildStamp::new(9000, 86_399).unwrap();
        let version = VersionPattern::parse("2.1.7.*").unwrap().resolve(stamp);
        assert_eq!(version, AssemblyVersion::new(2, 1, 7, 43_199));
    }

    #[test]
    fn admits() {
        let pattern = VersionPattern::parse("1.0.*").unwrap();
        assert!(pattern.admits(&AssemblyVersion::new(1, 0, 2000, 10)));
        assert!(pattern.admits(&AssemblyVersion::new(1, 0, 2001, 43_199)));
        assert!(!pattern.admits(&AssemblyVersion::new(1, 0, 2001, 43_200)));
        assert!(!pattern.admits(&AssemblyVersion::new(1, 1, 2000, 10)));

        let pattern = VersionPattern::parse("1.0.5.*").unwrap();
        assert!(pattern.admits(&AssemblyVersion::new(1, 0, 5, 0)));
        assert!(!pattern.admits(&AssemblyVersion::new(1, 0, 6, 0)));

        let fixed = VersionPattern::parse("1.0.0.0").unwrap();
        assert!(fixed.admits(&AssemblyVersion::new(1, 0, 0, 0)));
        assert!(!fixed.admits(&AssemblyVersion::new(1, 0, 0, 1)));
        assert!(!fixed.is_wildcard());
    }

    #[test]
    fn stamp_from_time() {
        // 2000-01-02 01:00:10 UTC
        let time = UNIX_EPOCH + Duration::from_secs(EPOCH_2000 + SECONDS_PER_DAY + 3610);
        let stamp = BuildStamp::from_system_time(time).unwrap();
        assert_eq!(stamp.days(), 1);
        assert_eq!(stamp.seconds(), 3610);

        let before = UNIX_EPOCH + Duration::from_secs(10);
        assert!(BuildStamp::from_system_time(before).is_err());
        assert!(BuildStamp::new(0, 86_400).is_err());
    }
}
