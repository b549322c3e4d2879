pub mod api;
pub mod sse;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Fleet view
        .route("/api/fleet", get(api::handle_fleet_view))
        .route("/api/fleet/events", get(sse::handle_fleet_events))
        .route("/api/fleet/reload", post(api::handle_reload))
        .route("/api/fleet/refresh", post(api::handle_refresh_fleet))
        // Clusters
        .route("/api/clusters", get(api::handle_list_clusters))
        .route("/api/clusters/{id}", patch(api::handle_patch_cluster))
        .route("/api/clusters/{id}/refresh", post(api::handle_refresh_cluster))
        .route(
            "/api/clusters/{id}/resources/{kind}",
            get(api::handle_cluster_resources),
        )
        // Operators
        .route("/api/operators/drift", get(api::handle_drift))
        // Time travel
        .route(
            "/api/time",
            get(api::handle_get_time).put(api::handle_put_time),
        )
        .route("/api/snapshots", get(api::handle_list_snapshots))
        // Health
        .route("/healthz", get(api::handle_healthz))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
