//! Cache Engine Module
//!
//! Orchestrates lookups and writes across the primary tier and the file tier,
//! enforcing the per-signature entry limit on the primary tier.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::file_store::{FileLookup, FileStore};
use crate::cache::key::{CacheKey, CallArgs, DerivedKey, KeyCodec};
use crate::cache::memory::MemoryStore;
use crate::cache::primary::{Batch, PrimaryStore};
use crate::cache::stats::CacheStats;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Lookup ==
/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    /// The key was never cached
    Miss,
    /// The key was cached but its value is gone
    Expired,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Maps misses onto [`CacheError::CacheMiss`] and [`CacheError::ExpiredKey`].
    pub fn into_result(self, key: &CacheKey) -> Result<T> {
        match self {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss => Err(CacheError::CacheMiss(key.to_string())),
            Lookup::Expired => Err(CacheError::ExpiredKey(key.to_string())),
        }
    }
}

/// Output of a memoized computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Computed<T> {
    /// Cache the value
    Store(T),
    /// Return the value without caching it
    Skip(T),
}

impl<T> Computed<T> {
    pub fn into_inner(self) -> T {
        match self {
            Computed::Store(value) | Computed::Skip(value) => value,
        }
    }
}

/// Tier that answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Primary,
    File,
}

// == File Mem Cache ==
/// Two-tier memoization cache.
///
/// The primary store handle is injected once at construction. When it is
/// missing or unreachable the primary tier stays disabled for the lifetime of
/// the cache and every operation runs against the file tier alone.
pub struct FileMemCache {
    config: CacheConfig,
    codec: KeyCodec,
    pub(crate) primary: Option<Arc<dyn PrimaryStore>>,
    pub(crate) files: Option<FileStore>,
    stats: Mutex<CacheStats>,
}

impl FileMemCache {
    // == Constructor ==
    /// Creates a cache over the given primary store.
    ///
    /// Fails only on invalid configuration; an unreachable store degrades the
    /// cache to file-tier-only mode.
    pub fn new(config: CacheConfig, primary: Option<Arc<dyn PrimaryStore>>) -> Result<Self> {
        config.validate()?;

        let primary = if config.disable_memory {
            None
        } else {
            match primary {
                Some(store) => match store.ping() {
                    Ok(()) => Some(store),
                    Err(e) => {
                        warn!("Primary store unreachable ({}), disabling mem cache", e);
                        None
                    }
                },
                None => {
                    warn!("No primary store configured, disabling mem cache");
                    None
                }
            }
        };

        let files = config
            .effective_file_root()
            .map(|root| FileStore::new(root.clone(), config.file_extension.clone()));

        Ok(Self {
            codec: KeyCodec::new(config.namespace.clone(), config.date_arg.clone()),
            config,
            primary,
            files,
            stats: Mutex::new(CacheStats::new()),
        })
    }

    /// Creates a cache whose primary tier is an in-process [`MemoryStore`].
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        let store: Arc<dyn PrimaryStore> = Arc::new(MemoryStore::new());
        Self::new(config, Some(store))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory_enabled(&self) -> bool {
        self.primary.is_some()
    }

    pub fn file_enabled(&self) -> bool {
        self.files.is_some()
    }

    pub fn file_store(&self) -> Option<&FileStore> {
        self.files.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    pub(crate) fn namespace(&self) -> &str {
        self.codec.namespace()
    }

    /// Rejects keys of another namespace; the cache only reads and writes its own.
    fn check_namespace(&self, key: &CacheKey) -> Result<()> {
        if key.namespace() == self.namespace() {
            Ok(())
        } else {
            Err(CacheError::InvalidRequest(format!(
                "Key {} is outside namespace {}",
                key,
                self.namespace()
            )))
        }
    }

    // == Key Derivation ==
    /// Derives the key of a call and records its function definition in both tiers.
    pub fn key_for(&self, function: &str, args: &CallArgs) -> Result<DerivedKey> {
        let derived = self.codec.derive(function, args)?;

        if let Some(primary) = &self.primary {
            let def_key = derived.key.func_def_key();
            if let Err(e) = primary.set_if_absent(&def_key, derived.func_def.as_bytes()) {
                warn!("Cannot record function definition {}: {}", def_key, e);
            }
        }
        if let Some(files) = &self.files {
            let key = &derived.key;
            let created = files.ensure_function_def(key.namespace(), key.hash(), &derived.func_def);
            if let Err(e) = created {
                warn!("Cannot record function definition file: {}", e);
            }
        }

        Ok(derived)
    }

    // == Get ==
    /// Looks a key up in the primary tier, then in the file tier.
    ///
    /// A primary hit backfills a missing file; a file hit is promoted into the
    /// primary tier. A miss on a key still tracked by its signature set is
    /// reported as expired and the key is dropped from the set. A key of
    /// another namespace is a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Lookup<T> {
        if let Err(e) = self.check_namespace(key) {
            warn!("{}", e);
            self.stats.lock().record_miss();
            return Lookup::Miss;
        }

        match self.get_value(key) {
            Lookup::Hit((value, source)) => match serde_json::from_value(value) {
                Ok(value) => {
                    let mut stats = self.stats.lock();
                    match source {
                        Source::Primary => stats.record_hit(),
                        Source::File => stats.record_file_hit(),
                    }
                    Lookup::Hit(value)
                }
                Err(e) => {
                    warn!("Cached value for {} has an unexpected shape: {}", key, e);
                    self.stats.lock().record_miss();
                    Lookup::Miss
                }
            },
            Lookup::Miss => Lookup::Miss,
            Lookup::Expired => Lookup::Expired,
        }
    }

    /// Like [`FileMemCache::get`], with misses reported as errors and keys of
    /// another namespace rejected.
    pub fn get_or_err<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T> {
        self.check_namespace(key)?;
        self.get(key).into_result(key)
    }

    /// Counts misses and expiries; hits are counted by the caller once the
    /// value has the requested shape.
    fn get_value(&self, key: &CacheKey) -> Lookup<(Value, Source)> {
        let rendered = key.to_string();

        if let Some(primary) = &self.primary {
            match primary.get(&rendered) {
                Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => {
                        debug!("Primary hit: {}", rendered);
                        self.backfill_file(key, &value);
                        return Lookup::Hit((value, Source::Primary));
                    }
                    Err(e) => warn!("Undecodable primary value for {}: {}", rendered, e),
                },
                Ok(None) => {}
                Err(e) => warn!("Primary lookup failed for {}: {}", rendered, e),
            }
        }

        if let Some(files) = &self.files {
            match files.read(key) {
                Ok(FileLookup::Found(value)) => {
                    debug!("File hit: {}", rendered);
                    self.promote(key, &value);
                    return Lookup::Hit((value, Source::File));
                }
                Ok(FileLookup::Corrupt) => self.stats.lock().record_corruption(),
                Ok(FileLookup::Absent) => {}
                Err(e) => warn!("File lookup failed for {}: {}", rendered, e),
            }
        }

        self.classify_miss(key)
    }

    fn classify_miss(&self, key: &CacheKey) -> Lookup<(Value, Source)> {
        let rendered = key.to_string();
        let signature = key.signature();

        let tracked = match &self.primary {
            Some(primary) => match primary.set_contains(&signature, &rendered) {
                Ok(true) => {
                    if let Err(e) = primary.set_remove(&signature, &rendered) {
                        warn!("Cannot untrack expired key {}: {}", rendered, e);
                    }
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    warn!("Membership check failed for {}: {}", rendered, e);
                    false
                }
            },
            None => false,
        };

        if tracked {
            debug!("Expired: {}", rendered);
            self.stats.lock().record_expired();
            Lookup::Expired
        } else {
            debug!("Miss: {}", rendered);
            self.stats.lock().record_miss();
            Lookup::Miss
        }
    }

    fn backfill_file(&self, key: &CacheKey, value: &Value) {
        if let Some(files) = &self.files {
            if !files.exists(key) {
                self.write_file(files, key, value);
            }
        }
    }

    fn promote(&self, key: &CacheKey, value: &Value) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.write_primary(key, &bytes, None),
            Err(e) => warn!("Cannot promote {}: {}", key, e),
        }
    }

    // == Store ==
    /// Stores a value in both tiers.
    ///
    /// `ttl` is in seconds; `None` uses the configured default and `Some(0)`
    /// disables expiry. Tier failures are logged and counted, never returned:
    /// only a key of another namespace or a value that cannot be serialized
    /// is an error.
    pub fn store<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<u64>) -> Result<()> {
        self.check_namespace(key)?;
        let value = serde_json::to_value(value)?;
        let bytes = serde_json::to_vec(&value)?;

        self.write_primary(key, &bytes, ttl);
        if let Some(files) = &self.files {
            self.write_file(files, key, &value);
        }
        Ok(())
    }

    fn write_file(&self, files: &FileStore, key: &CacheKey, value: &Value) {
        if let Err(e) = files.write(key, value) {
            warn!("Error writing file cache for {}: {}", key, e);
            self.stats.lock().record_write_failure();
        }
    }

    fn write_primary(&self, key: &CacheKey, bytes: &[u8], ttl: Option<u64>) {
        let Some(primary) = &self.primary else {
            return;
        };
        if let Err(e) = self.evict_and_write(primary.as_ref(), key, bytes, ttl) {
            warn!("Error writing mem cache for {}: {}", key, e);
            self.stats.lock().record_write_failure();
        }
    }

    /// Evicts random members of the key's signature set until there is room,
    /// then writes the value and its membership as one batch.
    ///
    /// The cardinality check and the pops are separate round trips, so
    /// concurrent writers can overshoot the limit slightly.
    fn evict_and_write(
        &self,
        primary: &dyn PrimaryStore,
        key: &CacheKey,
        bytes: &[u8],
        ttl: Option<u64>,
    ) -> Result<()> {
        let rendered = key.to_string();
        let signature = key.signature();

        if !primary.set_contains(&signature, &rendered)? {
            while primary.set_cardinality(&signature)? >= self.config.limit {
                let Some(evicted) = primary.set_pop(&signature)? else {
                    break;
                };
                primary.delete(std::slice::from_ref(&evicted))?;
                debug!("Evicted {}", evicted);
                self.stats.lock().record_eviction();
            }
        }

        let batch = Batch::new()
            .set(rendered.clone(), bytes.to_vec(), self.effective_ttl(ttl))
            .set_add(signature, rendered);
        primary.execute(batch)
    }

    fn effective_ttl(&self, ttl: Option<u64>) -> Option<u64> {
        match ttl.unwrap_or(self.config.default_ttl) {
            0 => None,
            seconds => Some(seconds),
        }
    }

    // == Membership ==
    /// Returns true when the key is tracked by its signature set.
    pub fn contains(&self, key: &CacheKey) -> bool {
        if key.namespace() != self.namespace() {
            return false;
        }
        self.primary
            .as_ref()
            .and_then(|primary| primary.set_contains(&key.signature(), &key.to_string()).ok())
            .unwrap_or(false)
    }

    // == Remove ==
    /// Removes one key from both tiers. Returns true when anything was deleted.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.check_namespace(key)?;
        let rendered = key.to_string();
        let mut removed = false;

        if let Some(primary) = &self.primary {
            removed |= primary.delete(std::slice::from_ref(&rendered))? > 0;
            primary.set_remove(&key.signature(), &rendered)?;
        }
        if let Some(files) = &self.files {
            removed |= files.remove(key)?;
        }
        Ok(removed)
    }

    // == Memoize ==
    /// Returns the cached result of `function(args)`, computing and caching it on a miss.
    pub fn memoize<T, F>(
        &self,
        function: &str,
        args: &CallArgs,
        ttl: Option<u64>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.memoize_with(function, args, ttl, || Computed::Store(compute()))
    }

    /// Like [`FileMemCache::memoize`]; the computation decides whether its result is cached.
    pub fn memoize_with<T, F>(
        &self,
        function: &str,
        args: &CallArgs,
        ttl: Option<u64>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Computed<T>,
    {
        if !self.memory_enabled() && !self.file_enabled() {
            return Ok(compute().into_inner());
        }

        let derived = self.key_for(function, args)?;
        if let Lookup::Hit(value) = self.get(&derived.key) {
            return Ok(value);
        }

        match compute() {
            Computed::Store(value) => {
                if let Err(e) = self.store(&derived.key, &value, ttl) {
                    warn!("Result of {} not cached: {}", derived.key, e);
                }
                Ok(value)
            }
            Computed::Skip(value) => Ok(value),
        }
    }
}

impl std::fmt::Debug for FileMemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMemCache")
            .field("config", &self.config)
            .field("memory_enabled", &self.memory_enabled())
            .field("files", &self.files)
            .finish()
    }
}
