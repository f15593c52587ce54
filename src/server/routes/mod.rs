//! HTTP route table

pub mod analyze;
pub mod journal;

use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use crate::config::ServerConfig;

async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "message": "guanxin is alive",
    }))
}

/// Build the router with its layers applied
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/analyze/upload", post(analyze::upload))
        .route("/api/analyze/execute", post(analyze::execute))
        .route("/api/journal/dates", get(journal::list_dates))
        .route("/api/journal/todos", get(journal::list_todos))
        .route(
            "/api/journal/:date",
            get(journal::get_entry).put(journal::save_entry),
        )
        .route("/api/journal/:date/todos/:key", post(journal::set_todo))
        .route(
            "/api/reports",
            get(journal::list_reports).post(journal::save_report),
        )
        .route("/api/reports/latest", get(journal::latest_report))
        .route("/api/admin/stats", get(journal::stats))
        .route("/api/admin/search", get(journal::search))
        .route("/api/admin/missing", get(journal::missing))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http());

    let app = if config.cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    app.with_state(state)
}
