// src/snapshot.rs
//! Snapshot assembly: every field chain of a snapshot runs concurrently, and
//! a full briefing runs every snapshot concurrently. Total latency is bounded
//! by the slowest single chain rather than the sum of chains.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, info};

use crate::cache::FieldCache;
use crate::config::{SnapshotSpec, SourceCatalog};
use crate::fetch::extract::extract;
use crate::fetch::{ensure_metrics_described, run_chain, FieldSpec, Fetcher};
use crate::normalize::{accepts, normalize, FieldOutcome, SnapshotResult};

pub struct Briefing {
    catalog: SourceCatalog,
    fetcher: Arc<dyn Fetcher>,
    cache: Option<FieldCache>,
}

impl Briefing {
    pub fn new(catalog: SourceCatalog, fetcher: Arc<dyn Fetcher>) -> Self {
        ensure_metrics_described();
        Self {
            catalog,
            fetcher,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<FieldCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// `None` for a snapshot name the catalog does not define.
    pub async fn snapshot(&self, name: &str) -> Option<SnapshotResult> {
        let spec = self.catalog.snapshot(name)?;
        Some(self.assemble(spec).await)
    }

    /// All snapshots, keyed by name.
    pub async fn briefing(&self) -> BTreeMap<String, SnapshotResult> {
        let runs = self.catalog.snapshots.iter().map(|spec| async move {
            (spec.name.clone(), self.assemble(spec).await)
        });
        join_all(runs).await.into_iter().collect()
    }

    pub async fn assemble(&self, spec: &SnapshotSpec) -> SnapshotResult {
        let t0 = Instant::now();
        let outcomes = join_all(spec.fields.iter().map(|f| self.field(&spec.name, f))).await;
        let result = normalize(&outcomes, Utc::now());

        counter!("snapshot_requests_total", "snapshot" => spec.name.clone()).increment(1);
        info!(
            target: "briefing",
            snapshot = %spec.name,
            stale = result.stale,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "snapshot assembled"
        );
        result
    }

    async fn field<'a>(&self, snapshot: &str, field: &'a FieldSpec) -> FieldOutcome<'a> {
        let key = FieldCache::key(snapshot, &field.key);
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!(target: "briefing", field = %key, source = %hit.source_name, "cache hit");
            return FieldOutcome {
                field,
                result: Some(hit),
                attempts: Vec::new(),
                cached: true,
            };
        }

        let run = run_chain(self.fetcher.as_ref(), &field.sources, |decoded, source| {
            extract(decoded, field, source)
        })
        .await;
        let attempts = run.attempts.clone();
        let result = run.into_result();

        // Only readings the normalizer will publish are cached.
        if let (Some(cache), Some(res)) = (self.cache.as_ref(), result.as_ref()) {
            if accepts(field, &res.value) {
                cache.put(&key, res.clone());
            }
        }
        FieldOutcome {
            field,
            result,
            attempts,
            cached: false,
        }
    }
}
