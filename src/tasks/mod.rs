//! Background Tasks Module
//!
//! # Tasks
//! - TTL Cleanup: purges expired primary-store entries at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
