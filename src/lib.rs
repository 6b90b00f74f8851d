// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod normalize;
pub mod snapshot;

use std::sync::Arc;

use axum::Router;
use tracing::info;

pub use crate::api::{router, AppState};
pub use crate::config::{Settings, SourceCatalog};
pub use crate::normalize::SnapshotResult;
pub use crate::snapshot::Briefing;

use crate::cache::FieldCache;
use crate::fetch::HttpFetcher;
use crate::metrics::Metrics;

/// Public router, plus /debug/sources and /metrics when `settings.debug_routes`.
pub fn build_router(briefing: Arc<Briefing>, settings: &Settings) -> anyhow::Result<Router> {
    let state = AppState { briefing };
    let mut app = api::router(state.clone());
    if settings.debug_routes {
        let metrics = Metrics::init()?;
        app = app.merge(api::debug_router(state)).merge(metrics.router());
    }
    Ok(app)
}

/// Build the full in-process app from the environment (used by the binary and tests).
pub async fn app() -> anyhow::Result<Router> {
    let settings = Settings::from_env();
    if settings.debug_routes {
        // Recorder first so the cache TTL gauge below is captured.
        Metrics::init()?;
    }

    let catalog = SourceCatalog::load_default()?;
    let fetcher = HttpFetcher::new(&settings.user_agent)?;
    let cache = FieldCache::with_ttl_ms(settings.cache_ttl_ms);
    info!(
        target: "config",
        snapshots = catalog.snapshots.len(),
        cache_ttl_ms = settings.cache_ttl_ms,
        debug_routes = settings.debug_routes,
        "briefing service configured"
    );

    let briefing = Briefing::new(catalog, Arc::new(fetcher)).with_cache(cache);
    build_router(Arc::new(briefing), &settings)
}
