use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::SharedState;

const DEFAULT_RECENT_LIMIT: usize = 10;

pub async fn root() -> &'static str {
    "Coding webhook trigger is running. POST webhooks to /<webhook root>/<job path>."
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    job: Option<String>,
    limit: Option<usize>,
}

/// Server info plus current, queued and recent builds.
/// Supports query parameters: ?job=team/api&limit=20
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<StatusQuery>,
) -> impl IntoResponse {
    let store = state.builds.lock().await;
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);

    let recent: Vec<_> = match params.job.as_deref() {
        Some(job) => store.by_job(job).into_iter().take(limit).collect(),
        None => store.recent(limit),
    };
    let queued = store.queued();

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "webhook_root": state.config.server.webhook_root,
        },
        "builds": {
            "current": store.current(),
            "queued_count": queued.len(),
            "queued": queued,
            "recent": recent,
            "recent_count": recent.len(),
        },
        "config": {
            "total_jobs": state.jobs.len(),
            "jobs": state.jobs.paths(),
        }
    }))
}

/// Returns a specific build by ID
pub async fn get_build(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.builds.lock().await;
    match store.get(&id) {
        Some(build) => Json(build).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Build not found"})),
        )
            .into_response(),
    }
}
