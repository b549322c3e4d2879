use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::FleetError;
use crate::fleet::columns::ResourceKind;
use crate::fleet::filter::FilterState;
use crate::fleet::mode::{LoadIntent, TimeSelection};
use crate::fleet::refresh::RefreshOutcome;
use crate::fleet::store::Merge;
use crate::models::fleet::{ClusterId, ClusterPatch};

#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    /// Comma separated, e.g. `PROD,AZURE`.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub q: String,
}

impl ViewQuery {
    pub fn filter(&self) -> FilterState {
        FilterState::parse(&self.tags, &self.q)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct TimeRequest {
    /// Snapshot token; null or empty returns to live.
    #[serde(default)]
    pub snapshot: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClusterRefresh {
    id: ClusterId,
    outcome: RefreshOutcome,
}

fn backend_error(e: FleetError) -> Response {
    let status = match e {
        FleetError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string()).into_response()
}

pub async fn handle_fleet_view(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Response {
    Json(state.fleet.view(&query.filter())).into_response()
}

pub async fn handle_reload(
    State(state): State<AppState>,
    Query(query): Query<ReloadQuery>,
) -> Response {
    let intent = if query.refresh {
        LoadIntent::FullRefresh
    } else {
        LoadIntent::Initial
    };
    match state.fleet.load(intent).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            tracing::warn!("bulk load failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

pub async fn handle_refresh_fleet(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Response {
    let started = state.fleet.refresh_visible(&query.filter());
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "started": started })),
    )
        .into_response()
}

/// Raw store contents, unfiltered.
pub async fn handle_list_clusters(State(state): State<AppState>) -> Response {
    Json(state.fleet.store.read_all()).into_response()
}

pub async fn handle_patch_cluster(
    State(state): State<AppState>,
    Path(id): Path<ClusterId>,
    Json(patch): Json<ClusterPatch>,
) -> Response {
    let token = state.fleet.mode.current();
    if !token.selection.is_live() {
        return (StatusCode::CONFLICT, "historical snapshots are read-only").into_response();
    }
    match state.fleet.store.patch_in_epoch(token.epoch, id, patch) {
        Merge::Applied => {}
        Merge::UnknownId => {
            return (StatusCode::NOT_FOUND, format!("cluster {} not found", id)).into_response();
        }
        Merge::StaleEpoch => {
            return (StatusCode::CONFLICT, "live data is still loading").into_response();
        }
    }
    match state.fleet.store.get(id) {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_refresh_cluster(
    State(state): State<AppState>,
    Path(id): Path<ClusterId>,
) -> Response {
    if state.fleet.store.get(id).is_none() {
        return (StatusCode::NOT_FOUND, format!("cluster {} not found", id)).into_response();
    }
    let outcome = state.fleet.refresh_cluster(id).await;
    Json(ClusterRefresh { id, outcome }).into_response()
}

pub async fn handle_cluster_resources(
    State(state): State<AppState>,
    Path((id, kind)): Path<(ClusterId, String)>,
) -> Response {
    let kind: ResourceKind = match kind.parse() {
        Ok(k) => k,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    match state.fleet.resources(id, kind).await {
        Ok(table) => Json(table).into_response(),
        Err(e) => backend_error(e),
    }
}

pub async fn handle_drift(State(state): State<AppState>) -> Response {
    Json(state.fleet.drift()).into_response()
}

pub async fn handle_get_time(State(state): State<AppState>) -> Response {
    let token = state.fleet.mode.current();
    let loaded = state.fleet.store.meta();
    Json(serde_json::json!({
        "selection": token.selection,
        "epoch": token.epoch,
        "loaded_selection": loaded.selection,
        "data_as_of": loaded.as_of,
        "refresh_interval_secs": state.config.refresh_interval_secs,
    }))
    .into_response()
}

pub async fn handle_put_time(
    State(state): State<AppState>,
    Json(req): Json<TimeRequest>,
) -> Response {
    let selection = TimeSelection::from_token(req.snapshot.as_deref());
    match state.fleet.switch_mode(selection).await {
        Ok((token, outcome)) => Json(serde_json::json!({
            "selection": token.selection,
            "epoch": token.epoch,
            "load": outcome,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("load after time switch failed: {}", e);
            backend_error(e)
        }
    }
}

pub async fn handle_list_snapshots(State(state): State<AppState>) -> Response {
    match state.fleet.snapshots().await {
        Ok(snapshots) => Json(snapshots).into_response(),
        Err(e) => backend_error(e),
    }
}

pub async fn handle_healthz() -> &'static str {
    "ok\n"
}
