//! In-memory response cache
//!
//! Bounded, TTL-expiring map from request fingerprint to relayed bytes.
//!
//! - An entry whose age is >= TTL is never served; a lookup that finds one
//!   removes it and reports a miss.
//! - The map never holds more than `max_entries`. Inserting a new key at
//!   capacity evicts the entry with the oldest creation time (not the least
//!   recently used one).
//! - A background task sweeps expired entries on a fixed interval.
//!
//! Time comes from a [`Clock`] so tests can advance it without sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// Cache key for a media URL.
///
/// Hex SHA-256 of the URL with its fragment removed. Scheme and host are
/// already lower-cased by the parser; path and query are taken as given.
pub fn fingerprint(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    hex::encode(Sha256::digest(normalized.as_str().as_bytes()))
}

/// A cached upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMedia {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug)]
struct CacheEntry {
    media: CachedMedia,
    created_at: Instant,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded TTL cache shared by all request handlers
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh entry for `key`, if any. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<CachedMedia> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let fresh = match entries.get(key) {
            Some(entry) if now.duration_since(entry.created_at) < self.ttl => {
                Some(entry.media.clone())
            }
            Some(_) => {
                entries.remove(key);
                tracing::debug!(target: "cache", key = %key, "expired entry dropped on lookup");
                None
            }
            None => None,
        };
        drop(entries);

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Store `media` under `key`, evicting the oldest entry if a new key
    /// would exceed capacity. Replacing an existing key does not evict.
    pub fn put(&self, key: String, media: CachedMedia) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(target: "cache", evicted = %oldest, "capacity eviction");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                media,
                created_at: now,
            },
        );
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic sweeper. It exits when `shutdown` flips to `true`
    /// or its sender is dropped.
    pub fn start_sweep_task(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.evict_expired();
                        if removed > 0 {
                            tracing::info!(target: "cache", removed, remaining = self.len(), "swept expired entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!(target: "cache", "sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(body: &'static [u8]) -> CachedMedia {
        CachedMedia {
            bytes: Bytes::from_static(body),
            content_type: "image/png".to_string(),
        }
    }

    fn cache(ttl_secs: u64, max: usize) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::with_clock(Duration::from_secs(ttl_secs), max, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let (cache, clock) = cache(60, 10);
        cache.put("k".into(), media(b"abc"));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("k"), Some(media(b"abc")));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_miss_after_ttl_removes_entry() {
        let (cache, clock) = cache(60, 10);
        cache.put("k".into(), media(b"abc"));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_created() {
        let (cache, clock) = cache(600, 3);
        for key in ["a", "b", "c"] {
            cache.put(key.into(), media(b"x"));
            clock.advance(Duration::from_secs(1));
        }
        // Reading "a" does not protect it: eviction is by age, not recency
        assert!(cache.get("a").is_some());

        cache.put("d".into(), media(b"y"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_replace_existing_key_does_not_evict() {
        let (cache, clock) = cache(600, 2);
        cache.put("a".into(), media(b"1"));
        clock.advance(Duration::from_secs(1));
        cache.put("b".into(), media(b"2"));

        cache.put("a".into(), media(b"3"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(media(b"3")));
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_evict_expired() {
        let (cache, clock) = cache(10, 10);
        cache.put("old".into(), media(b"1"));
        clock.advance(Duration::from_secs(6));
        cache.put("new".into(), media(b"2"));
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (cache, _) = cache(10, 0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a".into(), media(b"1"));
        cache.put("b".into(), media(b"2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fingerprint_ignores_fragment() {
        let a = Url::parse("https://CDN.example.com/a.png?x=1#frag").unwrap();
        let b = Url::parse("https://cdn.example.com/a.png?x=1").unwrap();
        let c = Url::parse("https://cdn.example.com/a.png?x=2").unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&b), fingerprint(&c));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(ResponseCache::with_clock(
            Duration::from_secs(30),
            16,
            clock.clone(),
        ));

        std::thread::scope(|scope| {
            for worker in 0..8u32 {
                let cache = cache.clone();
                let clock = clock.clone();
                scope.spawn(move || {
                    for i in 0..500u32 {
                        let key = format!("k{}", (worker * 7 + i) % 64);
                        cache.put(
                            key.clone(),
                            CachedMedia {
                                bytes: Bytes::from(key.clone().into_bytes()),
                                content_type: "image/png".to_string(),
                            },
                        );
                        if let Some(hit) = cache.get(&key) {
                            assert_eq!(hit.bytes, Bytes::from(key.clone().into_bytes()));
                        }
                        let other = format!("k{}", i % 64);
                        if let Some(hit) = cache.get(&other) {
                            assert_eq!(hit.bytes, Bytes::from(other.into_bytes()));
                        }
                        if i % 50 == 0 {
                            clock.advance(Duration::from_secs(1));
                            cache.evict_expired();
                        }
                        assert!(cache.len() <= cache.capacity());
                    }
                });
            }
        });

        assert!(cache.len() <= 16);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 8 * 500 * 2);
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_shutdown() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
        let (tx, rx) = watch::channel(false);
        let handle = cache
            .clone()
            .start_sweep_task(Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_task_removes_expired() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(ResponseCache::with_clock(
            Duration::from_secs(5),
            10,
            clock.clone(),
        ));
        cache.put("k".into(), media(b"1"));
        clock.advance(Duration::from_secs(10));

        let (tx, rx) = watch::channel(false);
        let handle = cache
            .clone()
            .start_sweep_task(Duration::from_millis(10), rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !cache.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry should be swept");

        drop(tx);
        handle.await.unwrap();
    }
}
