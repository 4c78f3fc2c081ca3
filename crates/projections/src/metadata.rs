//! Projection instance metadata.

use std::fmt;

use common::CodeVersion;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a projection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionStatus {
    /// Being built; not yet caught up.
    NewBuild,
    /// Caught up and serving.
    Running,
    /// Superseded by a newer running instance.
    Legacy,
    /// Build abandoned before completion.
    CancelledBuild,
    /// Retired.
    Discontinued,
}

impl ProjectionStatus {
    /// Returns true for statuses a reader may be pointed at.
    pub fn is_readable(&self) -> bool {
        matches!(self, ProjectionStatus::Running | ProjectionStatus::NewBuild)
    }

    /// Returns true for statuses that tell a builder to give up.
    pub fn is_revoked(&self) -> bool {
        matches!(
            self,
            ProjectionStatus::CancelledBuild | ProjectionStatus::Discontinued
        )
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectionStatus::NewBuild => "NewBuild",
            ProjectionStatus::Running => "Running",
            ProjectionStatus::Legacy => "Legacy",
            ProjectionStatus::CancelledBuild => "CancelledBuild",
            ProjectionStatus::Discontinued => "Discontinued",
        };
        f.write_str(s)
    }
}

/// One materialized instance of a logical projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionInstanceMetadata {
    /// Unique instance name, distinct from the logical projection name.
    pub name: String,
    /// Code version that built this instance.
    pub version: CodeVersion,
    /// Lowest reader code version able to read this instance.
    pub minimal_reader: CodeVersion,
    /// Node that owns the build, if recorded.
    pub node_name: Option<String>,
    pub status: ProjectionStatus,
}

/// Orders metadata newest version first, then by name.
pub(crate) fn sort_newest_first(instances: &mut [ProjectionInstanceMetadata]) {
    instances.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, version: &str) -> ProjectionInstanceMetadata {
        ProjectionInstanceMetadata {
            name: name.to_string(),
            version: version.parse().unwrap(),
            minimal_reader: CodeVersion::new(1, 0),
            node_name: None,
            status: ProjectionStatus::Running,
        }
    }

    #[test]
    fn sorts_numerically_not_lexically() {
        let mut all = vec![meta("a", "1.2"), meta("b", "1.10"), meta("c", "1.9")];
        sort_newest_first(&mut all);
        let names: Vec<_> = all.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn serializes_versions_as_strings() {
        let json = serde_json::to_value(meta("a", "1.2")).unwrap();
        assert_eq!(json["version"], "1.2");
        assert_eq!(json["status"], "Running");
        let back: ProjectionInstanceMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.version, CodeVersion::new(1, 2));
    }

    #[test]
    fn readable_and_revoked_statuses() {
        assert!(ProjectionStatus::Running.is_readable());
        assert!(ProjectionStatus::NewBuild.is_readable());
        assert!(!ProjectionStatus::Legacy.is_readable());
        assert!(ProjectionStatus::CancelledBuild.is_revoked());
        assert!(ProjectionStatus::Discontinued.is_revoked());
        assert!(!ProjectionStatus::Running.is_revoked());
    }
}
