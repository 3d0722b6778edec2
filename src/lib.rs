//! FileMemCache - A two-tier memoization cache
//!
//! Caches function results under keys derived from the function name and its
//! arguments, in a TTL-bound primary store backed by a checksummed file store.
//!
//! ```ignore
//! use filememcache::cache::{CallArgs, FileMemCache};
//! use filememcache::config::CacheConfig;
//!
//! let cache = FileMemCache::in_memory(CacheConfig::new("ns").with_file_root("/tmp/cache"))?;
//! let args = CallArgs::new().arg("ticker", "ABC").arg("as_of", "2020-01-01");
//! let price: f64 = cache.memoize("getPrice", &args, None, || 42.0)?;
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::FileMemCache;
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
