//! Common routes: health, readiness, version.

use crate::state::AppContext;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    database: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready(State(ctx): State<AppContext>) -> Result<Json<ReadyBody>, (StatusCode, Json<ReadyBody>)> {
    if let Err(e) = ctx.executor.ping().await {
        tracing::warn!(error = %e, "readiness check failed");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                database: "unavailable",
            }),
        ));
    }
    Ok(Json(ReadyBody {
        status: "ok",
        database: "ok",
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /ready (executor ping), GET /version. Not gated.
pub fn common_routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(ctx)
}
