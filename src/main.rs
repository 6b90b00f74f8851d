//! Morning Briefing Service: binary entrypoint.
//! Boots the Axum HTTP server on Shuttle with the source catalog, field cache
//! and routes assembled by `morning_briefing::app`.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs filtered by `RUST_LOG`, defaulting to `morning_briefing=info,warn`.
/// A subscriber installed by the host runtime takes precedence.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("morning_briefing=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let router = morning_briefing::app().await?;
    Ok(router.into())
}
