//! # Wharf Cached
//!
//! Read-through caching in front of the artifact, repository, project and
//! project metadata managers, plus a cache of raw manifest bodies.
//!
//! Every wrapper implements the same trait as its delegate. Reads format a
//! key in the resource namespace, return a hit, and on a miss build the
//! value once through the delegate and save it. Writes go to the delegate
//! first and then drop every key the entity may be cached under; the drop
//! is retried and, inside a transaction, repeated after commit.
//!
//! | Resource | Keys |
//! |---|---|
//! | `artifact` | `artifact:id:<id>`, `artifact:digest:<digest>:repository:<name>` |
//! | `repository` | `repository:id:<id>`, `repository:name:<name>` |
//! | `project` | `project:id:<id>`, `project:name:<name>` |
//! | `project_metadata` | `project_metadata:projectID:<id>` |
//! | `manifest` | `manifest:digest:<digest>` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod artifact;
mod base;
mod manifest;
mod metadata;
mod project;
mod repository;

pub use artifact::CachedArtifactManager;
pub use base::CacheAdmin;
pub use manifest::ManifestCache;
pub use metadata::CachedMetadataManager;
pub use project::CachedProjectManager;
pub use repository::CachedRepositoryManager;

/// Namespace of cached artifacts.
pub const RESOURCE_ARTIFACT: &str = "artifact";
/// Namespace of cached repositories.
pub const RESOURCE_REPOSITORY: &str = "repository";
/// Namespace of cached projects.
pub const RESOURCE_PROJECT: &str = "project";
/// Namespace of cached project metadata.
pub const RESOURCE_PROJECT_METADATA: &str = "project_metadata";
/// Namespace of cached manifest bodies.
pub const RESOURCE_MANIFEST: &str = "manifest";
