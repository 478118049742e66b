//! # Wharf Registry
//!
//! Client for the OCI distribution API, used by the abstractor to pull
//! manifests and config blobs and by the replication adapters to move
//! content between registries.
//!
//! ## Features
//!
//! - **Distribution API**: ping, catalog, tags, manifests, blobs, cross-repository mount
//! - **Auth**: anonymous, basic, fixed bearer, and token-service challenges
//! - **Rate limiting**: optional requests-per-second cap for throttled registries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wharf_registry::{ClientConfig, RegistryAuth, RegistryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("https://registry.example.com")
//!         .with_auth(RegistryAuth::basic("admin", "secret"));
//!     let client = RegistryClient::new(config)?;
//!
//!     let manifest = client.pull_manifest("library/hello", "latest", &[]).await?;
//!     println!("{} {}", manifest.media_type, manifest.digest);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod client;
mod config;
mod error;
mod oci;

pub use client::{PulledManifest, RegistryClient};
pub use config::{ClientConfig, RegistryAuth};
pub use error::RegistryError;
pub use oci::{
    compute_digest, is_digest, Catalog, Descriptor, ErrorResponse, Index, Manifest, MediaType,
    Platform, RegistryApiError, TagList,
};
