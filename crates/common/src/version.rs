//! Dotted-numeric code versions ("1.2", "2.0.3").
//!
//! Projection instances record the code version that built them and the
//! lowest reader version able to read them. Both are compared component-wise
//! as numbers, so `1.10` is newer than `1.2`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_COMPONENTS: usize = 4;

/// Errors produced when parsing a [`CodeVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,

    #[error("version `{0}` has more than 4 components")]
    TooManyComponents(String),

    #[error("version `{input}` has a non-numeric component `{component}`")]
    InvalidComponent { input: String, component: String },
}

/// A code version parsed once into a fixed-arity numeric tuple.
///
/// Missing trailing components count as zero for comparison, so `1.0` and
/// `1.0.0` are equal. The number of components given is kept only for display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeVersion {
    parts: [u32; MAX_COMPONENTS],
    len: u8,
}

impl CodeVersion {
    /// Builds a two-component `major.minor` version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            parts: [major, minor, 0, 0],
            len: 2,
        }
    }

    /// Builds a version from up to four components.
    ///
    /// Components past the fourth are ignored.
    pub fn from_components(components: &[u32]) -> Self {
        let mut parts = [0; MAX_COMPONENTS];
        let len = components.len().clamp(1, MAX_COMPONENTS);
        for (slot, value) in parts.iter_mut().zip(components) {
            *slot = *value;
        }
        Self {
            parts,
            len: len as u8,
        }
    }

    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    pub fn minor(&self) -> u32 {
        self.parts[1]
    }

    /// All four components, zero-padded.
    pub fn components(&self) -> [u32; MAX_COMPONENTS] {
        self.parts
    }
}

impl PartialEq for CodeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for CodeVersion {}

impl Hash for CodeVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for CodeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl FromStr for CodeVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = [0; MAX_COMPONENTS];
        let mut len = 0;
        for component in trimmed.split('.') {
            if len == MAX_COMPONENTS {
                return Err(VersionParseError::TooManyComponents(s.to_string()));
            }
            parts[len] = component
                .parse()
                .map_err(|_| VersionParseError::InvalidComponent {
                    input: s.to_string(),
                    component: component.to_string(),
                })?;
            len += 1;
        }

        Ok(Self {
            parts,
            len: len as u8,
        })
    }
}

impl TryFrom<String> for CodeVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CodeVersion> for String {
    fn from(version: CodeVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for CodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = usize::from(self.len.max(1));
        for (i, part) in self.parts[..shown].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> CodeVersion {
        s.parse().unwrap()
    }

    #[test]
    fn compares_numerically_not_lexically() {
        assert!(v("1.10") > v("1.2"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("1.0.1") > v("1.0"));
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(v("1"), v("1.0.0.0"));
        assert_eq!(v("1.0"), CodeVersion::new(1, 0));
    }

    #[test]
    fn display_keeps_given_arity() {
        assert_eq!(v("1.2").to_string(), "1.2");
        assert_eq!(v("3.0.1").to_string(), "3.0.1");
        assert_eq!(CodeVersion::from_components(&[4, 5, 6]).to_string(), "4.5.6");
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!("".parse::<CodeVersion>(), Err(VersionParseError::Empty));
        assert!(matches!(
            "1.x".parse::<CodeVersion>(),
            Err(VersionParseError::InvalidComponent { .. })
        ));
        assert!(matches!(
            "1.2.3.4.5".parse::<CodeVersion>(),
            Err(VersionParseError::TooManyComponents(_))
        ));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&v("1.10")).unwrap();
        assert_eq!(json, "\"1.10\"");
        let back: CodeVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.10"));
        assert!(serde_json::from_str::<CodeVersion>("\"abc\"").is_err());
    }
}
