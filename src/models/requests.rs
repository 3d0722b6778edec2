//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::cache::{CallArgs, Invalidation, Tier};

/// Request body for key derivation (POST /key)
#[derive(Debug, Clone, Deserialize)]
pub struct KeyRequest {
    /// Function name
    pub function: String,
    /// Named call arguments, including the as-of date if any
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl KeyRequest {
    pub fn call_args(&self) -> CallArgs {
        CallArgs::from(self.args.clone())
    }
}

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: A full cache key `namespace:function:hash:partition`
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds (uses default if not specified, 0 = no expiry)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        None
    }
}

/// Request body for bulk invalidation (POST /invalidate)
///
/// Every filter is optional; both tiers are cleared unless disabled.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default = "enabled")]
    pub memory: bool,
    #[serde(default = "enabled")]
    pub file: bool,
    #[serde(default)]
    pub show: bool,
}

fn enabled() -> bool {
    true
}

impl From<InvalidateRequest> for Invalidation {
    fn from(req: InvalidateRequest) -> Self {
        Invalidation {
            function: req.function,
            params: req.params,
            start: req.start,
            end: req.end,
            hash: req.hash,
            memory: req.memory,
            file: req.file,
            show: req.show,
        }
    }
}

/// Query string of the listing endpoint (GET /list)
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    /// Function name prefix, empty for all functions
    #[serde(default)]
    pub func: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default)]
    pub show: bool,
}

fn default_tier() -> Tier {
    Tier::Memory
}
