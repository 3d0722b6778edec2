//! Cache Module
//!
//! Two-tier memoization cache: a TTL-bound, size-bounded primary store backed
//! by a checksummed, never-expiring file store.

mod admin;
mod engine;
mod entry;
mod file_store;
mod key;
mod memory;
mod primary;
#[cfg(feature = "redis")]
mod redis_store;
mod stats;


use regex::Regex;

use crate::error::{CacheError, Result};

// Re-export public types
pub use admin::{Invalidation, InvalidationReport, ListEntry, Tier};
pub use engine::{Computed, FileMemCache, Lookup};
pub use file_store::{FileLookup, FileStore};
pub use key::{CacheKey, CallArgs, DerivedKey, KeyCodec, PartitionToken};
pub(crate) use key::validate_namespace;
pub use memory::MemoryStore;
pub use primary::{Batch, BatchOp, PrimaryStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use stats::CacheStats;

// == Public Constants ==
/// Separator between key components
pub const KEY_DELIMITER: char = ':';

/// Partition token of entries without an as-of date
pub const NO_PARTITION: &str = "0";

/// chrono format of dated partition tokens
pub const PARTITION_FORMAT: &str = "%Y%m%d_%H%M";

/// Last component of the primary key holding a function definition
pub const FUNC_DEF_SUFFIX: &str = "funcDef";

/// Directory of function-definition files inside a namespace
pub const FUNC_DEF_DIR: &str = "funcDefDir";

/// Compiles a store glob pattern (`*`, `?`) into an anchored regex.
pub(crate) fn glob_regex(pattern: &str) -> Result<Regex> {
    let translated = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{}$", translated))
        .map_err(|e| CacheError::InvalidRequest(format!("Invalid pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_regex() {
        let regex = glob_regex("ns:get*:*").unwrap();
        assert!(regex.is_match("ns:getPrices:ab:0"));
        assert!(!regex.is_match("xns:getPrices:ab:0"));
        assert!(glob_regex("a.b").unwrap().is_match("a.b"));
        assert!(!glob_regex("a.b").unwrap().is_match("axb"));
        assert!(glob_regex("f?").unwrap().is_match("fg"));
    }
}
