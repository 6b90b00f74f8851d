use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::fetch::Format;
use crate::normalize::SnapshotResult;
use crate::snapshot::Briefing;

#[derive(Clone)]
pub struct AppState {
    pub briefing: Arc<Briefing>,
}

/// Public routes: health, one snapshot, full briefing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/snapshot/{name}", get(get_snapshot))
        .route("/briefing", get(get_briefing))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Diagnostics, mounted only with `DEBUG_ROUTES=1`.
pub fn debug_router(state: AppState) -> Router {
    Router::new()
        .route("/debug/sources", get(debug_sources))
        .with_state(state)
}

async fn get_snapshot(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.briefing.snapshot(&name).await {
        Some(result) => Json(result).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown snapshot {name:?}") })),
        )
            .into_response(),
    }
}

async fn get_briefing(State(state): State<AppState>) -> Json<BTreeMap<String, SnapshotResult>> {
    Json(state.briefing.briefing().await)
}

#[derive(Serialize)]
struct SourceView<'a> {
    name: &'a str,
    format: Format,
    /// Template only; placeholders stay unexpanded.
    url: &'a str,
    timeout_ms: u64,
}

async fn debug_sources(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, BTreeMap<String, serde_json::Value>>> {
    let catalog = state.briefing.catalog();
    let mut out = BTreeMap::new();
    for snap in &catalog.snapshots {
        let fields: BTreeMap<String, serde_json::Value> = snap
            .fields
            .iter()
            .map(|f| {
                let chain: Vec<SourceView<'_>> = f
                    .sources
                    .iter()
                    .map(|s| SourceView {
                        name: &s.name,
                        format: s.format,
                        url: &s.url,
                        timeout_ms: s.timeout_ms,
                    })
                    .collect();
                (f.key.clone(), json!(chain))
            })
            .collect();
        out.insert(snap.name.clone(), fields);
    }
    Json(out)
}
