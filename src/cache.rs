//! # Field Cache
//! Short-lived, process-wide cache of successful field extractions.
//!
//! Keys are `"{snapshot}.{field}"`. TTL is absolute (no sliding refresh) and
//! only successful results are stored, so a failing upstream is re-probed on
//! every request. Not required for correctness; pass `None` to disable.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};

use crate::fetch::{ensure_metrics_described, ExtractionResult};

pub const DEFAULT_TTL_MS: u64 = 30_000;

#[derive(Debug)]
pub struct FieldCache {
    inner: Mutex<HashMap<String, (Instant, ExtractionResult)>>,
    ttl: Duration,
}

impl FieldCache {
    pub fn new(ttl: Duration) -> Self {
        ensure_metrics_described();
        gauge!("field_cache_ttl_ms").set(ttl.as_millis() as f64);
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// `None` when `ttl_ms` is zero.
    pub fn with_ttl_ms(ttl_ms: u64) -> Option<Self> {
        (ttl_ms > 0).then(|| Self::new(Duration::from_millis(ttl_ms)))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(snapshot: &str, field: &str) -> String {
        format!("{snapshot}.{field}")
    }

    /// Fresh entry for `key`, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<ExtractionResult> {
        let mut map = self.inner.lock().expect("field cache mutex poisoned");
        let hit = match map.get(key) {
            Some((at, res)) if at.elapsed() < self.ttl => Some(res.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        };
        if hit.is_some() {
            counter!("field_cache_hits_total").increment(1);
        } else {
            counter!("field_cache_misses_total").increment(1);
        }
        hit
    }

    pub fn put(&self, key: &str, result: ExtractionResult) {
        let mut map = self.inner.lock().expect("field cache mutex poisoned");
        map.insert(key.to_string(), (Instant::now(), result));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("field cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
