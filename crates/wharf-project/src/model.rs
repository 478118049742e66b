//! Project shapes and queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata key marking a project readable by anyone.
pub const METADATA_PUBLIC: &str = "public";

/// A project: the namespace repositories live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    /// Assigned on insert.
    pub project_id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Unique name; also the first path segment of its repositories.
    pub name: String,
    /// Upstream registry for proxy projects, 0 otherwise.
    pub registry_id: i64,
    /// Creation time.
    pub creation_time: DateTime<Utc>,
    /// Last update time.
    pub update_time: DateTime<Utc>,
}

impl Project {
    /// Creates a project record stamped now.
    #[must_use]
    pub fn new(name: impl Into<String>, owner_id: i64) -> Self {
        let now = Utc::now();
        Self {
            project_id: 0,
            owner_id,
            name: name.into(),
            registry_id: 0,
            creation_time: now,
            update_time: now,
        }
    }
}

/// One metadata entry of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProjectMetadata {
    /// Assigned on insert.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Key.
    pub name: String,
    /// Value.
    pub value: String,
    /// Creation time.
    pub creation_time: DateTime<Utc>,
    /// Last update time.
    pub update_time: DateTime<Utc>,
}

/// Filters and paging for project listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectQuery {
    /// Restrict to these ids.
    pub project_ids: Option<Vec<i64>>,
    /// Substring of the name.
    pub name: Option<String>,
    /// Restrict to one owner.
    pub owner_id: Option<i64>,
    /// Restrict by the `public` metadata flag.
    pub public: Option<bool>,
    /// 1-based page; ignored when `page_size` is 0.
    pub page: u32,
    /// Page size; 0 lists everything.
    pub page_size: u32,
}

impl ProjectQuery {
    /// Returns `(limit, offset)` when paging applies.
    #[must_use]
    pub fn limit_offset(&self) -> Option<(i64, i64)> {
        if self.page_size == 0 {
            return None;
        }
        let size = i64::from(self.page_size);
        Some((size, (i64::from(self.page.max(1)) - 1) * size))
    }
}
