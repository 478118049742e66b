//! # Wharf Artifact
//!
//! The typed artifact graph behind a registry: repositories, artifacts,
//! parent/child references and tags persisted in SQLite, plus the
//! machinery that builds artifacts from pushed manifests.
//!
//! - [`ArtifactDao`] / [`ArtifactManager`] - persistence with coded errors
//! - [`processor`] - media type to processor registry and built-ins
//!   (schema 1, image, index, CNAB, default)
//! - [`Abstractor`] - resolves media type, size, annotations and children
//!   from a manifest
//! - [`ArtifactController`] - idempotent ingestion with tags, deep delete,
//!   pull time tracking, additions
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wharf_artifact::{
//!     Abstractor, ArtifactController, ArtifactDao, DefaultArtifactManager,
//!     DefaultRepositoryManager, MIGRATIONS,
//! };
//! use wharf_core::{Context, Database};
//! use wharf_registry::{ClientConfig, RegistryClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open("/var/lib/wharf/wharf.db").await?;
//! db.migrate(MIGRATIONS).await?;
//!
//! let artifacts = Arc::new(DefaultArtifactManager::new(ArtifactDao::new(db.clone())));
//! let registry = Arc::new(RegistryClient::new(ClientConfig::new("http://localhost:5000"))?);
//! let controller = ArtifactController::new(
//!     db.clone(),
//!     artifacts.clone(),
//!     Arc::new(DefaultRepositoryManager::new(db)),
//!     Abstractor::new(artifacts, registry),
//! );
//!
//! let ctx = Context::new();
//! controller.ensure_repository(&ctx, 1, "library/hello").await?;
//! let (_, id) = controller
//!     .ensure(&ctx, "library/hello", "sha256:...", &["latest".to_string()])
//!     .await?;
//! println!("artifact {id}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod abstractor;
mod controller;
mod dao;
mod manager;
mod model;
pub mod processor;
mod repository;
mod schema;
mod tag;

pub use abstractor::Abstractor;
pub use controller::ArtifactController;
pub use dao::{ArtifactDao, UPDATABLE_PROPERTIES};
pub use manager::{ArtifactManager, DefaultArtifactManager};
pub use model::{
    Addition, Artifact, ListQuery, Reference, ReferenceQuery, TagFilter, ANNOTATION_ARTIFACT_TYPE,
    TYPE_UNKNOWN,
};
pub use processor::{BlobFetcher, Processor, ProcessorRegistry};
pub use repository::{DefaultRepositoryManager, Repository, RepositoryManager, RepositoryQuery};
pub use schema::MIGRATIONS;
pub use tag::{Tag, TagManager, TagQuery};
