//! Quote Cache
//!
//! TTL-bounded cache of quote maps keyed by instrument set, backed by a primary
//! source with fallback to a secondary one. Expiries are tracked in a min-heap
//! so purging and size-bound eviction never scan the whole map.
//!
//! Only cache state is behind the mutex; upstream calls happen outside it, so
//! two concurrent misses on the same key may both fetch.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::domain::entities::quote::QuoteMap;
use crate::domain::errors::QuoteError;
use crate::domain::repositories::quote_source::QuoteSource;

#[derive(Debug, Clone)]
pub struct QuoteCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for QuoteCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_entries: 32,
        }
    }
}

struct CacheEntry {
    quotes: QuoteMap,
    expires_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// (expiry, insertion sequence, key); stale rows are skipped on pop.
    expiry_heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_seq: u64,
}

impl CacheState {
    fn is_live(&self, key: &str, seq: u64) -> bool {
        self.entries.get(key).map(|e| e.seq == seq).unwrap_or(false)
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some(Reverse((expires_at, _, _))) = self.expiry_heap.peek() {
            if *expires_at > now {
                break;
            }
            if let Some(Reverse((_, seq, key))) = self.expiry_heap.pop() {
                if self.is_live(&key, seq) {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn insert(&mut self, key: String, quotes: QuoteMap, expires_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.expiry_heap.push(Reverse((expires_at, seq, key.clone())));
        self.entries.insert(
            key,
            CacheEntry {
                quotes,
                expires_at,
                seq,
            },
        );
    }

    /// Drops entries with the earliest expiry (oldest first on ties) until
    /// at most `max_entries` remain.
    fn enforce_bound(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries {
            let Some(Reverse((_, seq, key))) = self.expiry_heap.pop() else {
                break;
            };
            if self.is_live(&key, seq) {
                debug!(key = %key, "Evicting quote cache entry");
                self.entries.remove(&key);
            }
        }
    }
}

pub struct QuoteCache {
    primary: Arc<dyn QuoteSource>,
    secondary: Arc<dyn QuoteSource>,
    config: QuoteCacheConfig,
    state: Mutex<CacheState>,
}

impl QuoteCache {
    pub fn new(
        primary: Arc<dyn QuoteSource>,
        secondary: Arc<dyn QuoteSource>,
        config: QuoteCacheConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn cache_key(instruments: &[String]) -> String {
        let mut sorted: Vec<&str> = instruments.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        format!("prices_{}", sorted.join("_"))
    }

    /// Quotes for `instruments`, served from cache while fresh.
    pub async fn get_quotes(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError> {
        let key = Self::cache_key(instruments);

        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            state.purge_expired(now);
            if let Some(entry) = state.entries.get(&key) {
                if entry.expires_at > now {
                    return Ok(entry.quotes.clone());
                }
            }
        }

        let mut requested: Vec<String> = instruments.to_vec();
        requested.sort_unstable();
        requested.dedup();

        let quotes = self.fetch_upstream(&requested).await?;
        self.store(key, quotes.clone()).await;
        Ok(quotes)
    }

    async fn fetch_upstream(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError> {
        let primary_cause = match self.primary.fetch_quotes(instruments).await {
            Ok(quotes) if !quotes.is_empty() => return Ok(quotes),
            Ok(_) => {
                warn!(
                    source = self.primary.name(),
                    "Primary quote source returned no data, falling back"
                );
                "empty result".to_string()
            }
            Err(e) => {
                error!(source = self.primary.name(), error = %e, "Primary quote source failed");
                e.to_string()
            }
        };

        let secondary_cause = match self.secondary.fetch_quotes(instruments).await {
            Ok(quotes) if !quotes.is_empty() => return Ok(quotes),
            Ok(_) => "empty result".to_string(),
            Err(e) => e.to_string(),
        };

        error!(
            primary = %primary_cause,
            secondary = %secondary_cause,
            "Market data unavailable from every source"
        );
        Err(QuoteError::MarketDataUnavailable {
            primary: primary_cause,
            secondary: secondary_cause,
        })
    }

    async fn store(&self, key: String, quotes: QuoteMap) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.insert(key, quotes, now + self.config.ttl);
        state.purge_expired(now);
        state.enforce_bound(self.config.max_entries);
    }

    /// Number of entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, instruments: &[String]) -> bool {
        let key = Self::cache_key(instruments);
        self.state.lock().await.entries.contains_key(&key)
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.expiry_heap.clear();
    }
}
