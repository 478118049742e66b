//! # Wharf Project
//!
//! Projects are the namespaces repositories live in. This crate persists
//! them with soft deletion and keeps their key/value metadata (such as the
//! `public` flag) in a separate table.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod metadata;
mod model;
mod project;
mod schema;

pub use metadata::{DefaultMetadataManager, MetadataManager};
pub use model::{Project, ProjectMetadata, ProjectQuery, METADATA_PUBLIC};
pub use project::{DefaultProjectManager, ProjectManager};
pub use schema::MIGRATIONS;
