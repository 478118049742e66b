//! Public artifact shapes and list queries.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wharf_core::Error;
use wharf_registry::Platform;

/// Annotation that overrides the media type of an index.
pub const ANNOTATION_ARTIFACT_TYPE: &str = "org.opencontainers.artifactType";

/// Artifact type used when nothing more specific is known.
pub const TYPE_UNKNOWN: &str = "UNKNOWN";

/// A content-addressed unit stored under a repository.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Artifact {
    /// Assigned on insert.
    pub id: i64,

    /// Uppercase type tag derived by the processor, e.g. `IMAGE`.
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// Type-distinguishing media type (usually the config media type).
    pub media_type: String,

    /// Media type of the manifest document.
    pub manifest_media_type: String,

    /// Owning project.
    pub project_id: i64,

    /// Owning repository.
    pub repository_id: i64,

    /// Repository name, `<project>/<name>`.
    pub repository_name: String,

    /// Manifest digest.
    pub digest: String,

    /// Total size in bytes.
    pub size: i64,

    /// When the artifact was pushed.
    pub push_time: DateTime<Utc>,

    /// When the artifact was last pulled.
    pub pull_time: Option<DateTime<Utc>>,

    /// Processor-extracted attributes.
    #[serde(default)]
    pub extra_attrs: Map<String, Value>,

    /// Manifest annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Child references, populated for indexes.
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Artifact {
    /// Creates an artifact pushed now, ready for abstraction.
    #[must_use]
    pub fn new(
        project_id: i64,
        repository_id: i64,
        repository_name: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            repository_id,
            repository_name: repository_name.into(),
            digest: digest.into(),
            push_time: Utc::now(),
            ..Self::default()
        }
    }

    /// Returns true when the artifact references children.
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.references.is_empty()
    }
}

/// A directed parent to child edge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reference {
    /// Assigned on insert.
    pub id: i64,
    /// Referencing artifact.
    pub parent_id: i64,
    /// Referenced artifact.
    pub child_id: i64,
    /// Digest of the referenced artifact.
    pub child_digest: String,
    /// Platform of a multi-arch entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Alternative locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Descriptor annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Tag condition of an artifact list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagFilter {
    /// Tagged artifacts plus untagged ones nothing references.
    #[default]
    Any,
    /// Artifacts with at least one tag (`*`).
    Tagged,
    /// Artifacts with no tag and no inbound reference (`nil`).
    Untagged,
}

impl FromStr for TagFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(Self::Tagged),
            "nil" => Ok(Self::Untagged),
            other => Err(Error::bad_request(format!(
                "unsupported tags filter {other:?}, only \"*\" and \"nil\" are supported"
            ))),
        }
    }
}

/// Filters and paging for artifact listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Restrict to one project.
    pub project_id: Option<i64>,
    /// Restrict to one repository.
    pub repository_id: Option<i64>,
    /// Restrict to one repository by name.
    pub repository_name: Option<String>,
    /// Exact digest.
    pub digest: Option<String>,
    /// Exact media type.
    pub media_type: Option<String>,
    /// Exact artifact type.
    pub artifact_type: Option<String>,
    /// Tag condition.
    pub tags: TagFilter,
    /// 1-based page; ignored when `page_size` is 0.
    pub page: u32,
    /// Page size; 0 lists everything.
    pub page_size: u32,
}

impl ListQuery {
    /// Lists everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a repository id.
    #[must_use]
    pub const fn with_repository_id(mut self, repository_id: i64) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    /// Restricts to a repository name.
    #[must_use]
    pub fn with_repository_name(mut self, name: impl Into<String>) -> Self {
        self.repository_name = Some(name.into());
        self
    }

    /// Restricts to a project.
    #[must_use]
    pub const fn with_project_id(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Sets the tag condition.
    #[must_use]
    pub const fn with_tags(mut self, tags: TagFilter) -> Self {
        self.tags = tags;
        self
    }

    /// Sets paging.
    #[must_use]
    pub const fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Returns `(limit, offset)` when paging applies.
    #[must_use]
    pub fn limit_offset(&self) -> Option<(i64, i64)> {
        if self.page_size == 0 {
            return None;
        }
        let page = i64::from(self.page.max(1));
        let size = i64::from(self.page_size);
        Some((size, (page - 1) * size))
    }
}

/// Selects references by either end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceQuery {
    /// Outgoing edges of this artifact.
    pub parent_id: Option<i64>,
    /// Inbound edges of this artifact.
    pub child_id: Option<i64>,
}

impl ReferenceQuery {
    /// Edges leaving `parent_id`.
    #[must_use]
    pub const fn parent(parent_id: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            child_id: None,
        }
    }

    /// Edges arriving at `child_id`.
    #[must_use]
    pub const fn child(child_id: i64) -> Self {
        Self {
            parent_id: None,
            child_id: Some(child_id),
        }
    }
}

/// Supplementary content derived from an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addition {
    /// Content bytes.
    pub content: Vec<u8>,
    /// MIME type of `content`.
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wharf_core::ErrorCode;

    #[test]
    fn test_tag_filter_parse() {
        assert_eq!("*".parse::<TagFilter>().unwrap(), TagFilter::Tagged);
        assert_eq!("nil".parse::<TagFilter>().unwrap(), TagFilter::Untagged);
        let err = "latest".parse::<TagFilter>().unwrap_err();
        assert!(err.is_code(ErrorCode::BadRequest));
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(ListQuery::new().limit_offset(), None);
        assert_eq!(ListQuery::new().with_page(1, 10).limit_offset(), Some((10, 0)));
        assert_eq!(ListQuery::new().with_page(3, 10).limit_offset(), Some((10, 20)));
        assert_eq!(ListQuery::new().with_page(0, 5).limit_offset(), Some((5, 0)));
    }

    #[test]
    fn test_artifact_serializes_type_field() {
        let mut artifact = Artifact::new(1, 2, "library/hello", "sha256:abc");
        artifact.artifact_type = "IMAGE".into();
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["type"], "IMAGE");
        assert_eq!(value["repository_name"], "library/hello");
    }
}
