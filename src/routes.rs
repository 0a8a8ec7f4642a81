//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod diff;
mod snapshot;

use crate::config::Settings;
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method, Uri},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState) -> Router {
    let cors = build_cors_layer(&state.settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))

        // Snapshot routes
        .route(
            "/api/snapshots",
            get(snapshot::list_snapshots).post(snapshot::create_snapshot),
        )
        .route("/api/snapshots/prune", post(snapshot::prune_snapshots))
        .route("/api/snapshots/{id}", get(snapshot::get_snapshot))
        .route("/api/snapshots/{id}/export", get(snapshot::export_snapshot))

        // Diff routes
        .route("/api/diff", get(diff::compare_snapshots))
        .route("/api/diff/latest", get(diff::compare_latest))
        .route("/api/diff/report", get(diff::diff_report))

        .fallback(route_not_found)
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "dataSource": state.snapshots.has_source(),
        "schema": state.settings.crawler.schema,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_reports_missing_source() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/health")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["dataSource"], false);
        assert_eq!(json["schema"], "public");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_error_body() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/api/nothing")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "No route for /api/nothing");
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let (router, _) = seeded_router();
        let (response, _) = send(router, get("/health")).await;
        assert!(response.headers().contains_key("x-request-id"));
    }
}
