//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. Engine calls touch the
//! filesystem and the primary store synchronously, so they run on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::warn;

use crate::cache::{CacheKey, FileMemCache, Invalidation, MemoryStore, PrimaryStore};
use crate::config::{CacheConfig, Config};
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HealthResponse, InvalidateRequest, InvalidateResponse,
    KeyRequest, KeyResponse, ListQuery, ListResponse, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FileMemCache>,
    /// In-process primary store, when the cache runs on one
    local_store: Option<Arc<MemoryStore>>,
}

impl AppState {
    /// Creates a new AppState over an already built cache.
    pub fn new(cache: FileMemCache) -> Self {
        Self {
            cache: Arc::new(cache),
            local_store: None,
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The primary tier is Redis when `REDIS_URL` is set and the `redis`
    /// feature is built, otherwise an in-process [`MemoryStore`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let (primary, local_store) = primary_from_config(config);
        let cache = FileMemCache::new(config.cache.clone(), primary)?;
        Ok(Self {
            cache: Arc::new(cache),
            local_store,
        })
    }

    /// Creates a new AppState over an in-process primary store.
    pub fn with_local_store(config: CacheConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let primary: Arc<dyn PrimaryStore> = store.clone();
        let cache = FileMemCache::new(config, Some(primary))?;
        Ok(Self {
            cache: Arc::new(cache),
            local_store: Some(store),
        })
    }

    /// The in-process primary store, which needs periodic purging.
    pub fn local_store(&self) -> Option<Arc<MemoryStore>> {
        self.local_store.clone()
    }
}

type Primary = (Option<Arc<dyn PrimaryStore>>, Option<Arc<MemoryStore>>);

#[cfg(feature = "redis")]
fn primary_from_config(config: &Config) -> Primary {
    if let Some(url) = &config.redis_url {
        return match crate::cache::RedisStore::connect(url) {
            Ok(store) => {
                let primary: Arc<dyn PrimaryStore> = Arc::new(store);
                (Some(primary), None)
            }
            Err(e) => {
                warn!("Cannot connect to Redis at {}: {}", url, e);
                (None, None)
            }
        };
    }
    local_primary()
}

#[cfg(not(feature = "redis"))]
fn primary_from_config(config: &Config) -> Primary {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is not built, using the in-process store");
    }
    local_primary()
}

fn local_primary() -> Primary {
    let store = Arc::new(MemoryStore::new());
    let primary: Arc<dyn PrimaryStore> = store.clone();
    (Some(primary), Some(store))
}

/// Runs a synchronous engine call on the blocking pool.
async fn blocking<T, F>(state: &AppState, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&FileMemCache) -> Result<T> + Send + 'static,
{
    let cache = state.cache.clone();
    tokio::task::spawn_blocking(move || call(cache.as_ref()))
        .await
        .map_err(|e| CacheError::Internal(format!("Cache task failed: {}", e)))?
}

/// Handler for POST /key
///
/// Derives the cache key of a call and records its function definition.
pub async fn key_handler(
    State(state): State<AppState>,
    Json(req): Json<KeyRequest>,
) -> Result<Json<KeyResponse>> {
    let derived = blocking(&state, move |cache| {
        cache.key_for(&req.function, &req.call_args())
    })
    .await?;

    Ok(Json(KeyResponse::from(derived)))
}

/// Handler for PUT /set
///
/// Stores a value under a full cache key with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    let key = CacheKey::parse(&req.key)?;

    blocking(&state, move |cache| cache.store(&key, &req.value, req.ttl)).await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Looks a value up in the primary tier, then the file tier.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let parsed = CacheKey::parse(&key)?;
    let value = blocking(&state, move |cache| cache.get_or_err::<Value>(&parsed)).await?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
///
/// Deletes a key from both tiers.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let parsed = CacheKey::parse(&key)?;
    let removed = blocking(&state, move |cache| cache.remove(&parsed)).await?;
    if !removed {
        return Err(CacheError::CacheMiss(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /list
///
/// Lists cached signatures of one tier by function name prefix.
pub async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let tier = query.tier;
    let entries = blocking(&state, move |cache| {
        cache.list(query.tier, &query.func, query.show)
    })
    .await?;

    Ok(Json(ListResponse::new(tier, entries)))
}

/// Handler for POST /invalidate
///
/// Deletes every entry matching the filters.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    let request: Invalidation = req.into();
    let report = blocking(&state, move |cache| cache.invalidate(&request)).await?;

    Ok(Json(InvalidateResponse::from(report)))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = &state.cache;
    Json(StatsResponse::new(
        cache.config().namespace.clone(),
        cache.memory_enabled(),
        cache.file_enabled(),
        cache.stats(),
    ))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::new("ns").with_file_root(dir.path());
        (dir, AppState::with_local_store(config).unwrap())
    }

    fn key_request(function: &str, args: Value) -> KeyRequest {
        let args: Map<String, Value> = serde_json::from_value(args).unwrap();
        KeyRequest {
            function: function.to_string(),
            args,
        }
    }

    async fn derive(state: &AppState, function: &str, args: Value) -> String {
        key_handler(State(state.clone()), Json(key_request(function, args)))
            .await
            .unwrap()
            .key
            .clone()
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let (_dir, state) = test_state();
        let key = derive(&state, "f", json!({"a": 10, "b": 20})).await;

        let req = SetRequest {
            key: key.clone(),
            value: json!(30),
            ttl: None,
        };
        let result = set_handler(State(state.clone()), Json(req)).await;
        assert!(result.is_ok());

        let response = get_handler(State(state.clone()), Path(key)).await.unwrap();
        assert_eq!(response.value, json!(30));
    }

    #[tokio::test]
    async fn test_get_unknown_key_is_miss() {
        let (_dir, state) = test_state();
        let key = derive(&state, "f", json!({})).await;

        let result = get_handler(State(state), Path(key)).await;
        assert!(matches!(result, Err(CacheError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_get_malformed_key_is_rejected() {
        let (_dir, state) = test_state();
        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let (_dir, state) = test_state();
        let key = derive(&state, "f", json!({"a": 1})).await;
        let req = SetRequest {
            key: key.clone(),
            value: json!("value"),
            ttl: None,
        };
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        let result = delete_handler(State(state.clone()), Path(key.clone())).await;
        assert!(result.is_ok());

        let result = delete_handler(State(state.clone()), Path(key.clone())).await;
        assert!(matches!(result, Err(CacheError::CacheMiss(_))));

        let result = get_handler(State(state), Path(key)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_and_invalidate_handlers() {
        let (_dir, state) = test_state();
        let key = derive(&state, "getPrices", json!({"as_of": "2020-01-01"})).await;
        let req = SetRequest {
            key: key.clone(),
            value: json!([1, 2, 3]),
            ttl: None,
        };
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        let query = ListQuery {
            func: "get".to_string(),
            tier: crate::cache::Tier::File,
            show: false,
        };
        let listed = list_handler(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(listed.total, 1);

        let req = InvalidateRequest {
            function: Some("getPrices".to_string()),
            params: None,
            start: Some("20200101_0000".to_string()),
            end: None,
            hash: None,
            memory: true,
            file: true,
            show: false,
        };
        let report = invalidate_handler(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(report.memory_deleted, 1);
        assert_eq!(report.files_deleted, 1);

        let result = get_handler(State(state), Path(key)).await;
        assert!(matches!(result, Err(CacheError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let (_dir, state) = test_state();

        let response = stats_handler(State(state)).await;
        assert_eq!(response.counters.hits, 0);
        assert_eq!(response.counters.misses, 0);
        assert!(response.memory_enabled);
        assert!(response.file_enabled);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let (_dir, state) = test_state();

        let req = SetRequest {
            key: "".to_string(),
            value: json!("value"),
            ttl: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_uses_local_store() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache = CacheConfig::new("ns").with_file_root(dir.path());

        let state = AppState::from_config(&config).unwrap();
        assert!(state.local_store().is_some());
        assert!(state.cache.memory_enabled());
    }
}
