//! # Wharf Replication
//!
//! Connections to remote registries for replication:
//!
//! - [`adapter`] - the adapter contract, the factory registry and the
//!   built-in `docker-registry` and `docker-hub` adapters
//! - [`filter`] - glob filters over repositories, tags, labels and
//!   resource types
//! - [`WorkerPool`] - bounded concurrency for bulk listing
//! - [`LazyToken`] - short-lived provider tokens shared by all requests
//! - [`RegistryManager`] - registry records with encrypted secrets
//!
//! ## Example
//!
//! ```no_run
//! use wharf_core::{Context, Database};
//! use wharf_replication::{
//!     adapter, DefaultRegistryManager, Encryptor, Registry, RegistryManager,
//!     REGISTRY_TYPE_DOCKER_REGISTRY,
//! };
//!
//! # async fn example() -> wharf_core::Result<()> {
//! adapter::register_builtins();
//! let db = Database::open("/var/lib/wharf/wharf.db").await?;
//! db.migrate(wharf_replication::MIGRATIONS).await?;
//! let manager = DefaultRegistryManager::new(db)
//!     .with_encryptor(Encryptor::from_file("/etc/wharf/secretkey"));
//!
//! let ctx = Context::new();
//! let registry = Registry::new("mirror", REGISTRY_TYPE_DOCKER_REGISTRY, "https://mirror.local");
//! let id = manager.create(&ctx, &registry).await?;
//! let status = manager.health_check(&ctx, &manager.get(&ctx, id).await?).await?;
//! println!("{status}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod error;
pub mod filter;
mod manager;
pub mod model;
mod pool;
mod schema;
mod secret;
mod token;

pub use adapter::{Adapter, AdapterFactory, ArtifactRegistry, FactoryRegistry};
pub use error::AdapterError;
pub use manager::{
    normalize_url, DefaultRegistryManager, LocalRegistry, RegistryManager, LOCAL_REGISTRY_ID,
    LOCAL_REGISTRY_NAME, UPDATABLE_PROPERTIES,
};
pub use model::{
    Credential, CredentialType, Filter, HealthStatus, Registry, RegistryInfo, RegistryQuery,
    Resource, ResourceType, REGISTRY_TYPES, REGISTRY_TYPE_DOCKER_HUB,
    REGISTRY_TYPE_DOCKER_REGISTRY, REGISTRY_TYPE_HARBOR,
};
pub use pool::{WorkerPool, MAX_CONCURRENCY};
pub use schema::MIGRATIONS;
pub use secret::{Encryptor, ENCRYPTED_PREFIX};
pub use token::{LazyToken, TokenSource};
