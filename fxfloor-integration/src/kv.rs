use crate::error::KvError;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

/// Storage interface over a shared key-value store.
///
/// The store is the only cross-process coordination primitive in the system, so the
/// interface is pinned to exactly the operations the task lock manager and realtime
/// layer require: atomic conditional-set with TTL, plain set/get/delete, cursor-based
/// SCAN (never a blocking full enumeration), and pub/sub.
pub trait KvStore: Send + Sync {
    /// Atomic conditional-set: succeeds iff `key` is currently absent (Redis SETNX).
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Set `key` to `value` with the provided TTL, overwriting any existing value.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Fetch the value at `key`, if present and not expired.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Delete `key`.
    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Cursor-based scan for keys matching `pattern` (`*` wildcard, Redis SCAN
    /// semantics). Returns the next cursor (0 when iteration is complete) and a page
    /// of matching keys.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), KvError>;

    /// Publish `payload` on the provided pub/sub channel.
    fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError>;
}

/// In-memory [`KvStore`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKv {
    entries: Arc<Mutex<BTreeMap<String, InMemoryEntry>>>,
    published: Arc<Mutex<Vec<(String, String)>>>,
}

#[derive(Debug, Clone)]
struct InMemoryEntry {
    value: String,
    expires_at: Instant,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &InMemoryEntry) -> bool {
        entry.expires_at > Instant::now()
    }

    /// Messages published so far, oldest first. Helper used in tests.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    fn matches(pattern: &str, key: &str) -> bool {
        // Supports the single trailing/leading/infix `*` forms used by the lock
        // manager scan patterns.
        match pattern.split_once('*') {
            None => pattern == key,
            Some((prefix, suffix)) => {
                key.len() >= prefix.len() + suffix.len()
                    && key.starts_with(prefix)
                    && key.ends_with(suffix)
            }
        }
    }
}

impl KvStore for InMemoryKv {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(existing) if Self::is_live(existing) => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    InMemoryEntry {
                        value: value.to_string(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.entries.lock().insert(
            key.to_string(),
            InMemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|entry| Self::is_live(entry))
            .map(|entry| entry.value.clone()))
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), KvError> {
        let entries = self.entries.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| Self::is_live(entry) && Self::matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        let start = cursor as usize;
        let page: Vec<String> = matching.iter().skip(start).take(count).cloned().collect();
        let next = start + page.len();
        let next_cursor = if next >= matching.len() { 0 } else { next as u64 };
        Ok((next_cursor, page))
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Redis backed [`KvStore`] used in production.
#[derive(Debug, Clone)]
pub struct RedisKv {
    client: redis::Client,
}

impl RedisKv {
    pub fn new(url: &str) -> Result<Self, KvError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

impl KvStore for RedisKv {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.client.get_connection()?;
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query(&mut conn)?;
        Ok(set.is_some())
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.client.get_connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query::<()>(&mut conn)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.client.get_connection()?;
        Ok(redis::cmd("GET").arg(key).query(&mut conn)?)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.client.get_connection()?;
        redis::cmd("DEL").arg(key).query::<()>(&mut conn)?;
        Ok(())
    }

    fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), KvError> {
        let mut conn = self.client.get_connection()?;
        Ok(redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query(&mut conn)?)
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        let mut conn = self.client.get_connection()?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query::<()>(&mut conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_if_absent_is_exclusive() {
        let kv = InMemoryKv::new();
        let ttl = Duration::from_secs(60);

        assert!(kv.set_if_absent("lock:a", "worker-1", ttl).unwrap());
        assert!(!kv.set_if_absent("lock:a", "worker-2", ttl).unwrap());
        assert_eq!(kv.get("lock:a").unwrap().as_deref(), Some("worker-1"));

        kv.delete("lock:a").unwrap();
        assert!(kv.set_if_absent("lock:a", "worker-2", ttl).unwrap());
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let kv = InMemoryKv::new();
        kv.set("k", "v", Duration::from_millis(0)).unwrap();
        assert_eq!(kv.get("k").unwrap(), None);
        assert!(kv.set_if_absent("k", "v2", Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_scan_pages_through_matches() {
        let kv = InMemoryKv::new();
        let ttl = Duration::from_secs(60);
        for id in 0..5 {
            kv.set(&format!("task_lock:backtest:{id}"), "x", ttl).unwrap();
        }
        kv.set("task_heartbeat:backtest:0", "x", ttl).unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, page) = kv.scan(cursor, "task_lock:*", 2).unwrap();
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|key| key.starts_with("task_lock:")));
    }
}
