//! Key-value store for volatile firewall state.
//!
//! Rate counters, blacklist flags, loop-detection windows, and threat-intel
//! sets live here rather than in the relational store. The trait mirrors
//! the primitives the firewall needs: atomic counter increment with a TTL
//! armed on first increment, string get/set with expiry, bounded
//! prepend-trim lists, and persistent sets.
//!
//! Key layout:
//!
//! | Key                      | Type    | TTL        |
//! |--------------------------|---------|------------|
//! | `agent:ratelimit:<id>`   | counter | 60 s       |
//! | `agent:blacklist:<id>`   | string  | configured |
//! | `agent:messages:<id>`    | list    | 300 s      |
//! | `threat:bad_ips`         | set     | persistent |
//! | `threat:bad_domains`     | set     | persistent |

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Async key-value operations used by the inspection pipeline.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment a counter and return the new value. The TTL is
    /// armed when the counter is created and not extended afterwards.
    async fn incr(&self, key: &str, ttl: Duration) -> u64;

    /// Read a string value, if present and unexpired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Write a string value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);

    /// Remove a key.
    async fn delete(&self, key: &str);

    /// Prepend to a list, trim it to `max_len`, and re-arm the TTL.
    async fn list_prepend(&self, key: &str, value: &str, max_len: usize, ttl: Duration);

    /// Read the whole list, newest first.
    async fn list_range(&self, key: &str) -> Vec<String>;

    /// Add a member to a persistent set.
    async fn set_add(&self, key: &str, member: &str);

    /// Membership test on a persistent set.
    async fn set_contains(&self, key: &str, member: &str) -> bool;
}

#[derive(Debug, Clone)]
enum EntryValue {
    Counter(u64),
    Text(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: EntryValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process KV store backed by a lock-guarded map with lazy expiry.
///
/// Mutations happen under a single write lock, which makes increment and
/// prepend-trim atomic per key.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        // Expired, missing, or wrong-typed entries restart as a fresh
        // counter; the TTL is armed only at creation.
        let reset = match entries.get(key) {
            Some(entry) if !entry.expired(now) => {
                !matches!(entry.value, EntryValue::Counter(_))
            }
            _ => true,
        };
        if reset {
            entries.insert(
                key.to_string(),
                Entry {
                    value: EntryValue::Counter(0),
                    expires_at: Some(now + ttl),
                },
            );
        }

        let entry = entries.get_mut(key).expect("counter entry present");
        match &mut entry.value {
            EntryValue::Counter(n) => {
                *n += 1;
                *n
            }
            _ => unreachable!("counter entry was just reset"),
        }
    }

    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expired(now) {
            return None;
        }
        match &entry.value {
            EntryValue::Text(s) => Some(s.clone()),
            EntryValue::Counter(n) => Some(n.to_string()),
            _ => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: EntryValue::Text(value.to_string()),
                expires_at: ttl.map(|t| now + t),
            },
        );
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    async fn list_prepend(&self, key: &str, value: &str, max_len: usize, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let reset = match entries.get(key) {
            Some(entry) if !entry.expired(now) => !matches!(entry.value, EntryValue::List(_)),
            _ => true,
        };
        if reset {
            entries.insert(
                key.to_string(),
                Entry {
                    value: EntryValue::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }

        let entry = entries.get_mut(key).expect("list entry present");
        // Every prepend re-arms the TTL.
        entry.expires_at = Some(now + ttl);
        if let EntryValue::List(list) = &mut entry.value {
            list.push_front(value.to_string());
            list.truncate(max_len);
        }
    }

    async fn list_range(&self, key: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.expired(now) => match &entry.value {
                EntryValue::List(list) => list.iter().cloned().collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    async fn set_add(&self, key: &str, member: &str) {
        let mut entries = self.entries.write().await;

        let reset = !matches!(
            entries.get(key),
            Some(Entry {
                value: EntryValue::Set(_),
                ..
            })
        );
        if reset {
            entries.insert(
                key.to_string(),
                Entry {
                    value: EntryValue::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }

        let entry = entries.get_mut(key).expect("set entry present");
        if let EntryValue::Set(set) = &mut entry.value {
            set.insert(member.to_string());
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(Entry {
                value: EntryValue::Set(set),
                ..
            }) => set.contains(member),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_increments() {
        let kv = MemoryKv::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(kv.incr("agent:ratelimit:a", ttl).await, 1);
        assert_eq!(kv.incr("agent:ratelimit:a", ttl).await, 2);
        assert_eq!(kv.incr("agent:ratelimit:b", ttl).await, 1);
    }

    #[tokio::test]
    async fn test_counter_expires() {
        let kv = MemoryKv::new();

        assert_eq!(kv.incr("k", Duration::from_millis(10)).await, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Expired counter restarts from 1
        assert_eq!(kv.incr("k", Duration::from_millis(10)).await, 1);
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let kv = MemoryKv::new();

        kv.set("agent:blacklist:bad", "1", Some(Duration::from_secs(60)))
            .await;
        assert_eq!(kv.get("agent:blacklist:bad").await.as_deref(), Some("1"));

        kv.delete("agent:blacklist:bad").await;
        assert!(kv.get("agent:blacklist:bad").await.is_none());
    }

    #[tokio::test]
    async fn test_text_expiry() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(kv.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_list_prepend_trims_and_orders() {
        let kv = MemoryKv::new();
        let ttl = Duration::from_secs(300);

        for i in 0..12 {
            kv.list_prepend("agent:messages:a", &i.to_string(), 10, ttl)
                .await;
        }

        let list = kv.list_range("agent:messages:a").await;
        assert_eq!(list.len(), 10);
        // Newest first
        assert_eq!(list[0], "11");
        assert_eq!(list[9], "2");
    }

    #[tokio::test]
    async fn test_sets_are_persistent() {
        let kv = MemoryKv::new();

        kv.set_add("threat:bad_ips", "203.0.113.9").await;
        assert!(kv.set_contains("threat:bad_ips", "203.0.113.9").await);
        assert!(!kv.set_contains("threat:bad_ips", "198.51.100.1").await);
        assert!(!kv.set_contains("threat:bad_domains", "evil.test").await);
    }
}
