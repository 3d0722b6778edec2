//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheStats, DerivedKey, InvalidationReport, ListEntry, Tier};

/// Response body for key derivation (POST /key)
#[derive(Debug, Clone, Serialize)]
pub struct KeyResponse {
    pub key: String,
    pub signature: String,
    pub func_def: String,
}

impl From<DerivedKey> for KeyResponse {
    fn from(derived: DerivedKey) -> Self {
        Self {
            key: derived.key.to_string(),
            signature: derived.signature(),
            func_def: derived.func_def,
        }
    }
}

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for the listing endpoint (GET /list)
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub tier: Tier,
    pub entries: Vec<ListEntry>,
    pub total: usize,
}

impl ListResponse {
    pub fn new(tier: Tier, entries: Vec<ListEntry>) -> Self {
        Self {
            tier,
            total: entries.len(),
            entries,
        }
    }
}

/// Response body for bulk invalidation (POST /invalidate)
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub memory_deleted: usize,
    pub files_deleted: usize,
    pub total: usize,
}

impl From<InvalidationReport> for InvalidateResponse {
    fn from(report: InvalidationReport) -> Self {
        Self {
            memory_deleted: report.memory_deleted,
            files_deleted: report.files_deleted,
            total: report.total(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub namespace: String,
    pub memory_enabled: bool,
    pub file_enabled: bool,
    #[serde(flatten)]
    pub counters: CacheStats,
    /// Hits over lookups, both tiers counted as hits
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(
        namespace: impl Into<String>,
        memory_enabled: bool,
        file_enabled: bool,
        counters: CacheStats,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            memory_enabled,
            file_enabled,
            hit_rate: counters.hit_rate(),
            counters,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("ns:f:ab:0", json!({"px": 1.5}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "ns:f:ab:0");
        assert_eq!(json["value"]["px"], 1.5);
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_list_response_counts_entries() {
        let entry = ListEntry {
            signature: "ns:f:ab".to_string(),
            func_def: "f{}".to_string(),
        };
        let json = serde_json::to_value(ListResponse::new(Tier::File, vec![entry])).unwrap();
        assert_eq!(json["tier"], "file");
        assert_eq!(json["total"], 1);
        assert_eq!(json["entries"][0]["signature"], "ns:f:ab");
    }

    #[test]
    fn test_invalidate_response_total() {
        let report = InvalidationReport {
            memory_deleted: 2,
            files_deleted: 3,
        };
        assert_eq!(InvalidateResponse::from(report).total, 5);
    }

    #[test]
    fn test_stats_response_flattens_counters() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_file_hit();

        let json = serde_json::to_value(StatsResponse::new("ns", true, false, stats)).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["file_hits"], 1);
        assert_eq!(json["misses"], 2);
        assert_eq!(json["hit_rate"], 0.5);
        assert_eq!(json["file_enabled"], false);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Something went wrong"));
    }
}
