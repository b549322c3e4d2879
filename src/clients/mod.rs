use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::fleet::columns::ResourceKind;
use crate::fleet::mode::{Endpoint, TimeSelection};
use crate::models::fleet::{ClusterId, ClusterPatch, FleetLoad, FleetPayload};
use crate::models::operators::OperatorMatrix;

/// Everything the console reads from the dashboard backend.
#[async_trait]
pub trait FleetSource: Send + Sync {
    async fn fetch_fleet(&self, endpoint: &Endpoint) -> Result<FleetLoad>;

    async fn fetch_operator_matrix(&self, selection: &TimeSelection) -> Result<OperatorMatrix>;

    /// Current detailed stats for one cluster, merge-compatible with its record.
    async fn fetch_live_stats(&self, id: ClusterId) -> Result<ClusterPatch>;

    async fn list_snapshots(&self) -> Result<Vec<String>>;

    async fn fetch_resources(
        &self,
        id: ClusterId,
        kind: ResourceKind,
        selection: &TimeSelection,
    ) -> Result<Vec<Value>>;
}

pub struct BackendClient {
    pub base_url: String,
    http: Client,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: builder.build()?,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!("GET {} {:?}", path, query);
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(FleetError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| FleetError::Decode {
            what: path.to_string(),
            source,
        })
    }
}

fn snapshot_query(selection: &TimeSelection) -> Vec<(&'static str, String)> {
    match selection.snapshot_time() {
        Some(ts) => vec![("snapshot_time", ts.to_string())],
        None => Vec::new(),
    }
}

#[async_trait]
impl FleetSource for BackendClient {
    async fn fetch_fleet(&self, endpoint: &Endpoint) -> Result<FleetLoad> {
        let payload: FleetPayload = self.get_json(endpoint.path(), &endpoint.query()).await?;
        Ok(payload.into())
    }

    async fn fetch_operator_matrix(&self, selection: &TimeSelection) -> Result<OperatorMatrix> {
        self.get_json("/api/operators/matrix", &snapshot_query(selection))
            .await
    }

    async fn fetch_live_stats(&self, id: ClusterId) -> Result<ClusterPatch> {
        // cache buster, the backend fronts this with an HTTP cache
        let ts = Utc::now().timestamp_millis().to_string();
        self.get_json(&format!("/api/dashboard/{}/live_stats", id), &[("ts", ts)])
            .await
    }

    async fn list_snapshots(&self) -> Result<Vec<String>> {
        self.get_json("/api/dashboard/snapshots", &[]).await
    }

    async fn fetch_resources(
        &self,
        id: ClusterId,
        kind: ResourceKind,
        selection: &TimeSelection,
    ) -> Result<Vec<Value>> {
        self.get_json(
            &format!("/api/dashboard/{}/resources/{}", id, kind.as_str()),
            &snapshot_query(selection),
        )
        .await
    }
}
