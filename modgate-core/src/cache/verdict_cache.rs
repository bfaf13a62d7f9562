//! Byte-budgeted LRU + TTL cache of classifier verdicts keyed by message
//! payload.
//!
//! One mutex guards the index map, the recency list, and the byte counter
//! together; every operation is O(1) amortized except the expiry sweep.
//! The recency list is index-linked over a slab of nodes, so there is no
//! pointer juggling and no allocation churn on promote.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use modgate_common::models::Verdict;

/// Flat per-entry overhead added to the measured byte size.
const ENTRY_OVERHEAD_BYTES: usize = 128;

struct Node {
    key: String,
    verdict: Verdict,
    expires_at: Instant,
    size_bytes: usize,
    /// Toward the MRU end; `None` for the head.
    prev: Option<usize>,
    /// Toward the LRU end; `None` for the tail.
    next: Option<usize>,
}

#[derive(Default)]
struct CacheInner {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_bytes: usize,
}

/// In-memory verdict cache with LRU eviction and per-entry TTL.
pub struct VerdictCache {
    max_bytes: usize,
    inner: Mutex<CacheInner>,
}

fn estimate_entry_size(key: &str, verdict: &Verdict) -> usize {
    key.len()
        + verdict.reason.len()
        + verdict
            .trigger_tokens
            .iter()
            .map(String::len)
            .sum::<usize>()
        + ENTRY_OVERHEAD_BYTES
}

impl CacheInner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.index.remove(&node.key);
            self.total_bytes = self.total_bytes.saturating_sub(node.size_bytes);
            self.free.push(idx);
        }
    }

    fn allocate(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn evict_to_fit(&mut self, max_bytes: usize) {
        while self.total_bytes > max_bytes {
            match self.tail {
                Some(idx) => self.remove(idx),
                None => break,
            }
        }
    }
}

impl VerdictCache {
    /// Creates a cache with the given byte budget. A zero budget yields no
    /// cache at all; callers hold `Option<VerdictCache>`.
    pub fn new(max_bytes: usize) -> Option<Self> {
        if max_bytes == 0 {
            return None;
        }
        Some(Self {
            max_bytes,
            inner: Mutex::new(CacheInner::default()),
        })
    }

    /// Looks up a verdict. Expired entries are deleted on sight and
    /// reported as a miss; hits move the entry to the MRU position.
    pub fn get(&self, key: &str, now: Instant) -> Option<Verdict> {
        if key.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = *inner.index.get(key)?;
        let expired = match &inner.nodes[idx] {
            Some(node) => now > node.expires_at,
            None => return None,
        };
        if expired {
            inner.remove(idx);
            return None;
        }
        inner.promote(idx);
        inner.nodes[idx].as_ref().map(|node| node.verdict.clone())
    }

    /// Inserts or replaces a verdict under `key`.
    ///
    /// No-ops on an empty key, a zero TTL, or an entry that alone exceeds
    /// the whole budget (a single oversized entry would otherwise thrash
    /// the tail). After an insert the LRU tail is evicted until the byte
    /// budget holds again.
    pub fn insert(&self, key: &str, verdict: Verdict, ttl: Duration, now: Instant) {
        if key.is_empty() || ttl.is_zero() {
            return;
        }
        let size_bytes = estimate_entry_size(key, &verdict);
        if size_bytes > self.max_bytes {
            return;
        }
        let expires_at = now + ttl;

        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;
        if let Some(idx) = inner.index.get(key).copied() {
            if let Some(node) = inner.nodes[idx].as_mut() {
                let old_size = node.size_bytes;
                node.verdict = verdict;
                node.expires_at = expires_at;
                node.size_bytes = size_bytes;
                inner.total_bytes = inner.total_bytes.saturating_sub(old_size) + size_bytes;
            }
            inner.promote(idx);
            inner.evict_to_fit(self.max_bytes);
            return;
        }

        let idx = inner.allocate(Node {
            key: key.to_string(),
            verdict,
            expires_at,
            size_bytes,
            prev: None,
            next: None,
        });
        inner.index.insert(key.to_string(), idx);
        inner.push_front(idx);
        inner.total_bytes += size_bytes;
        inner.evict_to_fit(self.max_bytes);
    }

    /// Sweeps expired entries, tail to head. Entries still inside their TTL
    /// are left alone even when they sit behind expired ones.
    pub fn remove_expired(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cursor = inner.tail;
        while let Some(idx) = cursor {
            let (prev, expired) = match &inner.nodes[idx] {
                Some(node) => (node.prev, now > node.expires_at),
                None => break,
            };
            if expired {
                inner.remove(idx);
            }
            cursor = prev;
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total_bytes
    }
}

#[cfg(test)]
mod tests {
    use modgate_common::models::StatusCode;

    use super::*;

    fn verdict(reason: &str) -> Verdict {
        Verdict {
            status: StatusCode::CommercialOffPlatform,
            reason: reason.into(),
            confidence: 0.9,
            trigger_tokens: vec!["buy now".into()],
            violator_user_id: 1,
            message_id: 1,
        }
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn zero_budget_disables_cache() {
        assert!(VerdictCache::new(0).is_none());
    }

    #[test]
    fn get_miss_and_hit() {
        let cache = VerdictCache::new(64 * 1024).unwrap();
        let now = Instant::now();
        assert!(cache.get("k", now).is_none());
        cache.insert("k", verdict("promo"), TTL, now);
        let hit = cache.get("k", now).expect("hit expected");
        assert_eq!(hit.reason, "promo");
        assert!(cache.get("", now).is_none(), "empty key is always a miss");
    }

    #[test]
    fn expired_entry_is_deleted_on_read() {
        let cache = VerdictCache::new(64 * 1024).unwrap();
        let now = Instant::now();
        cache.insert("k", verdict("promo"), Duration::from_secs(10), now);
        assert!(cache.get("k", now + Duration::from_secs(11)).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn zero_ttl_is_a_no_op() {
        let cache = VerdictCache::new(64 * 1024).unwrap();
        cache.insert("k", verdict("promo"), Duration::ZERO, Instant::now());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let cache = VerdictCache::new(ENTRY_OVERHEAD_BYTES + 4).unwrap();
        let now = Instant::now();
        cache.insert("key-longer-than-budget", verdict("a very long reason"), TTL, now);
        assert_eq!(cache.len(), 0, "entry above the whole budget must not insert");
    }

    #[test]
    fn lru_tail_is_evicted_under_pressure() {
        // Budget fits two small entries, not three.
        let entry = estimate_entry_size("k1", &verdict("r"));
        let cache = VerdictCache::new(2 * entry).unwrap();
        let now = Instant::now();
        cache.insert("k1", verdict("r"), TTL, now);
        cache.insert("k2", verdict("r"), TTL, now);
        // Touch k1 so k2 becomes the LRU tail.
        assert!(cache.get("k1", now).is_some());
        cache.insert("k3", verdict("r"), TTL, now);

        assert!(cache.get("k2", now).is_none(), "LRU entry should be gone");
        assert!(cache.get("k1", now).is_some());
        assert!(cache.get("k3", now).is_some());
        assert!(cache.total_bytes() <= 2 * entry);
    }

    #[test]
    fn upsert_replaces_and_promotes() {
        let entry = estimate_entry_size("k1", &verdict("r"));
        let cache = VerdictCache::new(2 * entry).unwrap();
        let now = Instant::now();
        cache.insert("k1", verdict("r"), TTL, now);
        cache.insert("k2", verdict("r"), TTL, now);
        cache.insert("k1", verdict("s"), TTL, now);
        cache.insert("k3", verdict("r"), TTL, now);

        assert_eq!(cache.get("k1", now).expect("k1 stays").reason, "s");
        assert!(cache.get("k2", now).is_none(), "k2 was the tail");
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = VerdictCache::new(64 * 1024).unwrap();
        let now = Instant::now();
        cache.insert("short", verdict("r"), Duration::from_secs(5), now);
        cache.insert("long", verdict("r"), TTL, now);

        cache.remove_expired(now + Duration::from_secs(6));
        assert!(cache.get("short", now + Duration::from_secs(6)).is_none());
        assert!(cache.get("long", now + Duration::from_secs(6)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn byte_accounting_tracks_removals() {
        let cache = VerdictCache::new(64 * 1024).unwrap();
        let now = Instant::now();
        cache.insert("k1", verdict("r"), TTL, now);
        cache.insert("k2", verdict("r"), TTL, now);
        let full = cache.total_bytes();
        cache.remove_expired(now + TTL + Duration::from_secs(1));
        assert_eq!(cache.total_bytes(), 0);
        assert!(full > 0);
    }
}
