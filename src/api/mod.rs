//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `POST /key` - Derive the cache key of a call
//! - `PUT /set` - Store a value under a cache key
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key from both tiers
//! - `GET /list` - List cached signatures
//! - `POST /invalidate` - Bulk invalidation
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
