//! Redis Store Module
//!
//! [`PrimaryStore`] over a Redis server. Requires the `redis` feature.

use parking_lot::Mutex;
use redis::{Client, Commands, Connection, RedisError};

use crate::cache::primary::{Batch, BatchOp, PrimaryStore};
use crate::error::{CacheError, Result};

/// Redis-backed primary store sharing one synchronous connection.
pub struct RedisStore {
    conn: Mutex<Connection>,
}

impl RedisStore {
    /// Connects to a Redis server, e.g. `redis://localhost:6379`.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| unavailable("client", e))?;
        let conn = client
            .get_connection()
            .map_err(|e| unavailable("connection", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Redis refuses expiries whose millisecond deadline overflows an i64.
const MAX_EXPIRE_SECONDS: u64 = (i64::MAX / 1000 / 2) as u64;

fn unavailable(op: &str, e: RedisError) -> CacheError {
    CacheError::StoreUnavailable(format!("Redis {} error: {}", op, e))
}

fn expire_seconds(seconds: u64) -> u64 {
    seconds.min(MAX_EXPIRE_SECONDS)
}

impl PrimaryStore for RedisStore {
    fn ping(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let _: String = redis::cmd("PING")
            .query(&mut *conn)
            .map_err(|e| unavailable("PING", e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn.lock().get(key).map_err(|e| unavailable("GET", e))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        let mut conn = self.conn.lock();
        match ttl {
            Some(seconds) => conn
                .set_ex::<_, _, ()>(key, value, expire_seconds(seconds))
                .map_err(|e| unavailable("SETEX", e)),
            None => conn
                .set::<_, _, ()>(key, value)
                .map_err(|e| unavailable("SET", e)),
        }
    }

    fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.conn
            .lock()
            .set_nx(key, value)
            .map_err(|e| unavailable("SETNX", e))
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn.lock().del(keys).map_err(|e| unavailable("DEL", e))
    }

    fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.conn
            .lock()
            .sadd::<_, _, ()>(set, member)
            .map_err(|e| unavailable("SADD", e))
    }

    fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        self.conn
            .lock()
            .srem::<_, _, ()>(set, member)
            .map_err(|e| unavailable("SREM", e))
    }

    fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        self.conn
            .lock()
            .sismember(set, member)
            .map_err(|e| unavailable("SISMEMBER", e))
    }

    fn set_cardinality(&self, set: &str) -> Result<usize> {
        self.conn
            .lock()
            .scard(set)
            .map_err(|e| unavailable("SCARD", e))
    }

    fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = self
            .conn
            .lock()
            .smembers(set)
            .map_err(|e| unavailable("SMEMBERS", e))?;
        members.sort();
        Ok(members)
    }

    fn set_pop(&self, set: &str) -> Result<Option<String>> {
        self.conn
            .lock()
            .spop(set)
            .map_err(|e| unavailable("SPOP", e))
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .conn
            .lock()
            .keys(pattern)
            .map_err(|e| unavailable("KEYS", e))?;
        keys.sort();
        Ok(keys)
    }

    fn execute(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                BatchOp::Set {
                    key,
                    value,
                    ttl: Some(seconds),
                } => pipe.set_ex(key, value.as_slice(), expire_seconds(*seconds)).ignore(),
                BatchOp::Set {
                    key,
                    value,
                    ttl: None,
                } => pipe.set(key, value.as_slice()).ignore(),
                BatchOp::Delete(keys) => pipe.del(keys).ignore(),
                BatchOp::SetAdd { set, member } => pipe.sadd(set, member).ignore(),
                BatchOp::SetRemove { set, member } => pipe.srem(set, member).ignore(),
            };
        }

        let mut conn = self.conn.lock();
        pipe.query::<()>(&mut *conn)
            .map_err(|e| unavailable("MULTI", e))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
