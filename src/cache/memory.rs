//! Memory Store Module
//!
//! In-process primary store: byte values with TTL expiration, string sets,
//! glob key scans and atomic batches, all behind a single lock.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;

use crate::cache::entry::{current_timestamp_ms, CacheEntry, Slot};
use crate::cache::glob_regex;
use crate::cache::primary::{Batch, BatchOp, PrimaryStore};
use crate::error::{CacheError, Result};

// == Memory Store ==
/// Primary store kept in process memory.
///
/// Expired entries are dropped lazily on access and in bulk by
/// [`MemoryStore::purge_expired`], which the background cleanup task calls.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Purge Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut inner = self.inner.lock();
        let before = inner.map.len();
        inner.map.retain(|_, entry| !entry.is_expired_at(now));
        before - inner.map.len()
    }

    // == Length ==
    /// Returns the number of stored keys, including not yet purged expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::InvalidRequest(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

impl Entries {
    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut CacheEntry> {
        if self.map.get(key).is_some_and(CacheEntry::is_expired) {
            self.map.remove(key);
        }
        self.map.get_mut(key)
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.slot {
                Slot::Bytes(value) => Ok(Some(value.clone())),
                Slot::Set(_) => Err(wrong_type(key)),
            },
        }
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<u64>) {
        self.map
            .insert(key.to_string(), CacheEntry::bytes(value.to_vec(), ttl));
    }

    fn delete(&mut self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| {
                let live = self.live(key).is_some();
                self.map.remove(key.as_str());
                live
            })
            .count()
    }

    fn set_add(&mut self, set: &str, member: &str) -> Result<()> {
        if self.live(set).is_none() {
            self.map.insert(set.to_string(), CacheEntry::set());
        }
        match self.map.get_mut(set).map(|entry| &mut entry.slot) {
            Some(Slot::Set(members)) => {
                members.insert(member.to_string());
                Ok(())
            }
            _ => Err(wrong_type(set)),
        }
    }

    fn members(&mut self, set: &str) -> Result<Option<&mut std::collections::HashSet<String>>> {
        match self.live(set).map(|entry| &mut entry.slot) {
            None => Ok(None),
            Some(Slot::Set(members)) => Ok(Some(members)),
            Some(Slot::Bytes(_)) => Err(wrong_type(set)),
        }
    }

    fn set_remove(&mut self, set: &str, member: &str) -> Result<()> {
        let now_empty = match self.members(set)? {
            Some(members) => {
                members.remove(member);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.map.remove(set);
        }
        Ok(())
    }

    fn set_pop(&mut self, set: &str) -> Result<Option<String>> {
        let (popped, now_empty) = match self.members(set)? {
            Some(members) => {
                let popped = members.iter().choose(&mut rand::rng()).cloned();
                if let Some(member) = &popped {
                    members.remove(member);
                }
                (popped, members.is_empty())
            }
            None => (None, false),
        };
        if now_empty {
            self.map.remove(set);
        }
        Ok(popped)
    }

    fn apply(&mut self, op: BatchOp) -> Result<()> {
        match op {
            BatchOp::Set { key, value, ttl } => self.set(&key, &value, ttl),
            BatchOp::Delete(keys) => {
                self.delete(&keys);
            }
            BatchOp::SetAdd { set, member } => self.set_add(&set, &member)?,
            BatchOp::SetRemove { set, member } => self.set_remove(&set, &member)?,
        }
        Ok(())
    }
}

// == Primary Store Implementation ==
impl PrimaryStore for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.lock().get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        self.inner.lock().set(key, value, ttl);
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.set(key, value, None);
        Ok(true)
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        Ok(self.inner.lock().delete(keys))
    }

    fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.inner.lock().set_add(set, member)
    }

    fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        self.inner.lock().set_remove(set, member)
    }

    fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .members(set)?
            .is_some_and(|members| members.contains(member)))
    }

    fn set_cardinality(&self, set: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .members(set)?
            .map_or(0, |members| members.len()))
    }

    fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let mut members: Vec<String> = inner
            .members(set)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    fn set_pop(&self, set: &str) -> Result<Option<String>> {
        self.inner.lock().set_pop(set)
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = glob_regex(pattern)?;
        let now = current_timestamp_ms();
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .map
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Applies the batch under one lock acquisition.
    ///
    /// As with a MULTI/EXEC transaction, an operation failing on a wrongly
    /// typed key does not roll back the operations before it.
    fn execute(&self, batch: Batch) -> Result<()> {
        let mut inner = self.inner.lock();
        for op in batch.ops().iter().cloned() {
            inner.apply(op)?;
        }
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_store_new() {
        let store = MemoryStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let store = MemoryStore::new();

        store.set("key1", b"value1", None).unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_store_overwrite() {
        let store = MemoryStore::new();

        store.set("key1", b"value1", None).unwrap();
        store.set("key1", b"value2", None).unwrap();

        assert_eq!(store.get("key1").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let store = MemoryStore::new();

        store.set("key1", b"value1", Some(1)).unwrap();
        assert!(store.get("key1").unwrap().is_some());

        sleep(Duration::from_millis(1100));

        assert!(store.get("key1").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_if_absent() {
        let store = MemoryStore::new();

        assert!(store.set_if_absent("def", b"first").unwrap());
        assert!(!store.set_if_absent("def", b"second").unwrap());
        assert_eq!(store.get("def").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn test_delete_counts_existing_keys() {
        let store = MemoryStore::new();
        store.set("a", b"1", None).unwrap();
        store.set("b", b"2", None).unwrap();

        let deleted = store
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_operations() {
        let store = MemoryStore::new();

        store.set_add("s", "a").unwrap();
        store.set_add("s", "b").unwrap();
        store.set_add("s", "a").unwrap();

        assert_eq!(store.set_cardinality("s").unwrap(), 2);
        assert!(store.set_contains("s", "a").unwrap());
        assert!(!store.set_contains("s", "z").unwrap());
        assert_eq!(store.set_cardinality("missing").unwrap(), 0);
        assert_eq!(store.set_members("s").unwrap(), vec!["a", "b"]);
        assert!(store.set_members("missing").unwrap().is_empty());

        store.set_remove("s", "a").unwrap();
        store.set_remove("s", "b").unwrap();
        assert_eq!(store.set_cardinality("s").unwrap(), 0);
        assert!(store.is_empty(), "Empty sets are removed");
    }

    #[test]
    fn test_set_pop_drains_set() {
        let store = MemoryStore::new();
        for member in ["a", "b", "c"] {
            store.set_add("s", member).unwrap();
        }

        let mut popped = Vec::new();
        while let Some(member) = store.set_pop("s").unwrap() {
            popped.push(member);
        }
        popped.sort();

        assert_eq!(popped, vec!["a", "b", "c"]);
        assert_eq!(store.set_pop("s").unwrap(), None);
    }

    #[test]
    fn test_wrong_type_errors() {
        let store = MemoryStore::new();
        store.set("k", b"v", None).unwrap();
        store.set_add("s", "m").unwrap();

        assert!(matches!(
            store.set_add("k", "m"),
            Err(CacheError::InvalidRequest(_))
        ));
        assert!(matches!(store.get("s"), Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_scan_keys_glob() {
        let store = MemoryStore::new();
        store.set("ns:f:1:0", b"v", None).unwrap();
        store.set("ns:fg:2:0", b"v", None).unwrap();
        store.set("other:f:1:0", b"v", None).unwrap();
        store.set_add("ns:f:1", "ns:f:1:0").unwrap();

        assert_eq!(
            store.scan_keys("ns:f:*").unwrap(),
            vec!["ns:f:1".to_string(), "ns:f:1:0".to_string()]
        );
        assert_eq!(store.scan_keys("ns:f*").unwrap().len(), 3);
        assert_eq!(store.scan_keys("ns:f?:*").unwrap(), vec!["ns:fg:2:0"]);
        assert_eq!(store.scan_keys("*").unwrap().len(), 4);
    }

    #[test]
    fn test_execute_batch() {
        let store = MemoryStore::new();
        store.set("old", b"x", None).unwrap();

        let batch = Batch::new()
            .set("k", b"v".to_vec(), Some(60))
            .set_add("s", "k")
            .delete(vec!["old".to_string()]);
        store.execute(batch).unwrap();

        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(store.set_contains("s", "k").unwrap());
        assert!(store.get("old").unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryStore::new();

        store.set("key1", b"value1", Some(1)).unwrap();
        store.set("key2", b"value2", Some(10)).unwrap();
        store.set_add("s", "key1").unwrap();

        sleep(Duration::from_millis(1100));

        let removed = store.purge_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("key2").unwrap().is_some());
    }

    #[test]
    fn test_huge_ttl_is_stored() {
        let store = MemoryStore::new();

        store.set("key1", b"value1", Some(u64::MAX / 10)).unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.purge_expired(), 0);
    }
}
