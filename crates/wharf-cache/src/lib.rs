//! # Wharf Cache
//!
//! Pluggable key/value cache used by the wharf managers.
//!
//! Backends are selected by address scheme:
//!
//! ```text
//! memory://
//! redis://[user:pass@]host:port/db
//! redis+sentinel://[user:pass@]h1,h2/<master>/<db>?<query>
//! redis+cluster://[user:pass@]h1,h2/?<query>
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use wharf_cache::{fetch_or_save, new_cache, CacheOptions};
//! use wharf_core::Context;
//!
//! # async fn example() -> wharf_core::Result<()> {
//! let cache = new_cache("memory://", CacheOptions::default()).await?;
//! let ctx = Context::new();
//! let size: i64 = fetch_or_save(&ctx, cache.as_ref(), "artifact:id:1", || async { Ok(3011) }, None).await?;
//! assert_eq!(size, 3011);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod codec;
pub mod error;
pub mod factory;
pub mod key;
pub mod layer;
pub mod memory;
pub mod options;
pub mod redis;
pub mod single_flight;

pub use cache::{Cache, CacheExt};
pub use codec::{Codec, JsonCodec, MsgpackCodec, SessionCodec};
pub use error::{CacheError, CacheResult};
pub use factory::{
    address_from_env, bootstrap, new_cache, register, CacheFactory, ENV_REDIS_URL_CORE,
    ENV_REDIS_URL_HARBOR, ENV_REDIS_URL_REG,
};
pub use key::{KeyFormatter, KeyValue};
pub use layer::LayerCache;
pub use memory::MemoryCache;
pub use options::CacheOptions;
pub use single_flight::fetch_or_save;
