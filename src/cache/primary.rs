//! Primary Store Module
//!
//! Contract over the fast, TTL-capable key-value store used as the first tier.

use crate::error::Result;

// == Batch ==
/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write a value, `ttl` in seconds, `None` = no expiry
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<u64>,
    },
    /// Delete keys
    Delete(Vec<String>),
    /// Add a member to a set
    SetAdd { set: String, member: String },
    /// Remove a member from a set
    SetRemove { set: String, member: String },
}

/// Operations submitted to the store as one atomic unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Vec<u8>, ttl: Option<u64>) -> Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn delete(mut self, keys: Vec<String>) -> Self {
        if !keys.is_empty() {
            self.ops.push(BatchOp::Delete(keys));
        }
        self
    }

    pub fn set_add(mut self, set: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::SetAdd {
            set: set.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_remove(mut self, set: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::SetRemove {
            set: set.into(),
            member: member.into(),
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// == Primary Store Trait ==
/// A TTL-capable key-value store with set operations.
///
/// Implementations are shared by every caller of the engine and must be
/// usable concurrently through `&self`.
pub trait PrimaryStore: Send + Sync {
    /// Checks connectivity.
    fn ping(&self) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a value, `ttl` in seconds, `None` = no expiry.
    fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()>;

    /// Writes a value without expiry unless the key already exists.
    ///
    /// Returns true when the value was written.
    fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Deletes keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> Result<usize>;

    fn set_add(&self, set: &str, member: &str) -> Result<()>;

    fn set_remove(&self, set: &str, member: &str) -> Result<()>;

    fn set_contains(&self, set: &str, member: &str) -> Result<bool>;

    fn set_cardinality(&self, set: &str) -> Result<usize>;

    /// Returns every member of a set, sorted.
    fn set_members(&self, set: &str) -> Result<Vec<String>>;

    /// Removes and returns a random member.
    fn set_pop(&self, set: &str) -> Result<Option<String>>;

    /// Returns the live keys matching a glob pattern (`*` and `?`).
    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Applies every operation of the batch atomically.
    fn execute(&self, batch: Batch) -> Result<()>;
}
