// src/fetch/mod.rs
//! Resilient source-chain fetching: decode, extract, run.

pub mod decode;
pub mod extract;
pub mod fetcher;
pub mod runner;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use fetcher::{Fetcher, HttpFetcher, Scripted, ScriptedFetcher};
pub use runner::{run_chain, Attempt, ChainOutcome, ChainRun};
pub use types::{ExtractionResult, FieldSpec, Format, Reading, SourceSpec};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_attempts_total", "Source attempts made by chain runs.");
        describe_counter!(
            "fetch_attempt_failures_total",
            "Failed source attempts, labelled by reason."
        );
        describe_histogram!("fetch_attempt_ms", "Source attempt duration in milliseconds.");
        describe_counter!(
            "fetch_chains_exhausted_total",
            "Chain runs where every source failed."
        );
        describe_counter!("field_cache_hits_total", "Field reads served from cache.");
        describe_counter!("field_cache_misses_total", "Field reads that ran a chain.");
        describe_gauge!("field_cache_ttl_ms", "Configured field cache TTL in milliseconds.");
        describe_counter!("snapshot_requests_total", "Snapshots assembled.");
    });
}
