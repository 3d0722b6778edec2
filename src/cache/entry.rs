//! Cache Entry Module
//!
//! Defines the structure for individual in-process store entries with TTL support.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

// == Slot ==
/// Value held by an entry: raw bytes or a set of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

// == Cache Entry ==
/// Represents a single store entry with its value and expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub slot: Slot,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new byte entry with optional TTL.
    ///
    /// # Arguments
    /// * `value` - The bytes to store
    /// * `ttl_seconds` - Optional TTL in seconds; TTLs past the clock's range saturate
    pub fn bytes(value: Vec<u8>, ttl_seconds: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            slot: Slot::Bytes(value),
            expires_at: ttl_seconds.map(|ttl| now.saturating_add(ttl.saturating_mul(1000))),
        }
    }

    /// Creates a new empty set entry. Sets never expire.
    pub fn set() -> Self {
        Self {
            slot: Slot::Set(HashSet::new()),
            expires_at: None,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// the expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::bytes(b"test_value".to_vec(), None);

        assert_eq!(entry.slot, Slot::Bytes(b"test_value".to_vec()));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let before = current_timestamp_ms();
        let entry = CacheEntry::bytes(b"v".to_vec(), Some(10));

        assert!(!entry.is_expired());
        let expires = entry.expires_at.unwrap();
        assert!(expires >= before + 10_000);
        assert!(expires <= current_timestamp_ms() + 10_000);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::bytes(b"v".to_vec(), Some(u64::MAX / 10));
        assert_eq!(entry.expires_at, Some(u64::MAX));
        assert!(!entry.is_expired());

        let entry = CacheEntry::bytes(b"v".to_vec(), Some(u64::MAX));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::bytes(b"v".to_vec(), Some(1));
        assert!(!entry.is_expired());

        sleep(Duration::from_millis(1100));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_set_entry_never_expires() {
        let entry = CacheEntry::set();
        assert!(matches!(entry.slot, Slot::Set(ref s) if s.is_empty()));
        assert!(!entry.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            slot: Slot::Bytes(Vec::new()),
            expires_at: Some(now),
        };

        assert!(entry.is_expired_at(now), "Entry should be expired at boundary");
        assert!(!entry.is_expired_at(now - 1));
    }
}
