//! Version types for rule set schemas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic version of a rule set, serialized as `"major.minor.patch"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    /// Incompatible rule changes
    pub major: u64,
    /// Added rules
    pub minor: u64,
    /// Parameter tweaks
    pub patch: u64,
}

impl Version {
    /// Create a new version
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse from string
    ///
    /// # Errors
    ///
    /// Returns error if format is invalid
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let malformed = || VersionError::InvalidFormat(s.to_string());
        let mut parts = s.trim().split('.');
        let mut component = || {
            let part = parts.next().ok_or_else(malformed)?;
            part.parse::<u64>()
                .map_err(|_| VersionError::InvalidComponent(part.to_string()))
        };
        let version = Self::new(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Version-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Invalid format
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
    /// Invalid component
    #[error("Invalid version component: {0}")]
    InvalidComponent(String),
}
