use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol versions served, each with its own URL prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "v1.0")]
    V1_0,
    #[serde(rename = "v1.1")]
    V1_1,
}

impl Version {
    pub const ALL: [Version; 2] = [Version::V1_0, Version::V1_1];

    /// The path segment of this version, e.g. `v1.0`
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "v1.0",
            Version::V1_1 => "v1.1",
        }
    }

    /// Parse a version path segment; anything but an exact match is rejected
    pub fn from_segment(segment: &str) -> Option<Version> {
        Self::ALL.into_iter().find(|v| v.as_str() == segment)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_segments() {
        assert_eq!(Version::from_segment("v1.0"), Some(Version::V1_0));
        assert_eq!(Version::from_segment("v1.1"), Some(Version::V1_1));
        assert_eq!(Version::from_segment("v2.0"), None);
        assert_eq!(Version::from_segment("V1.0"), None);
        assert_eq!(Version::V1_1.to_string(), "v1.1");
    }

    #[test]
    fn test_version_serde_uses_segment() {
        let json = serde_json::to_string(&Version::V1_0).unwrap();
        assert_eq!(json, "\"v1.0\"");
        let back: Version = serde_json::from_str("\"v1.1\"").unwrap();
        assert_eq!(back, Version::V1_1);
    }
}
