pub mod columns;
pub mod consensus;
pub mod filter;
pub mod mode;
pub mod refresh;
pub mod resolver;
pub mod store;
pub mod view;

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clients::FleetSource;
use crate::error::Result;
use crate::models::fleet::ClusterId;
use crate::models::views::{FleetView, RenderedTable};
use columns::{ResourceKind, render_table};
use consensus::{OperatorDrift, drift_report};
use filter::FilterState;
use mode::{LiveSource, LoadIntent, ModeSelector, ModeToken, TimeSelection};
use refresh::{RefreshController, RefreshOutcome};
use store::{FleetSnapshot, FleetStore, LoadMeta};
use view::{ViewInput, compose};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoadOutcome {
    Installed {
        epoch: u64,
        clusters: usize,
        operators: usize,
        /// Clusters queued for a live refresh after the load.
        refreshing: usize,
    },
    /// The time selection changed while the load was in flight.
    Discarded,
}

/// Ties the store, the time selection and live refreshes together.
pub struct FleetService {
    pub store: Arc<FleetStore>,
    pub mode: Arc<ModeSelector>,
    pub refresher: Arc<RefreshController>,
    source: Arc<dyn FleetSource>,
}

impl FleetService {
    pub fn new(source: Arc<dyn FleetSource>, live_source: LiveSource, state_path: Option<PathBuf>) -> Self {
        let store = Arc::new(FleetStore::new());
        let mode = Arc::new(ModeSelector::new(live_source, state_path));
        let refresher = Arc::new(RefreshController::new(
            source.clone(),
            store.clone(),
            mode.clone(),
        ));
        Self {
            store,
            mode,
            refresher,
            source,
        }
    }

    /// Bulk-loads clusters and the operator matrix for the current selection.
    /// On failure the store is left as it was.
    pub async fn load(&self, intent: LoadIntent) -> Result<LoadOutcome> {
        self.load_tracked(intent).await.map(|(outcome, _)| outcome)
    }

    async fn load_tracked(
        &self,
        intent: LoadIntent,
    ) -> Result<(LoadOutcome, Vec<JoinHandle<RefreshOutcome>>)> {
        let (token, cancel) = self.mode.lease();
        let endpoint = self.mode.resolve_source(&token.selection, intent);
        info!("loading fleet from {} (epoch {})", endpoint.path(), token.epoch);

        let fetch = async {
            tokio::try_join!(
                self.source.fetch_fleet(&endpoint),
                self.source.fetch_operator_matrix(&token.selection),
            )
        };
        let (fleet, matrix) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("bulk load for epoch {} cancelled", token.epoch);
                return Ok((LoadOutcome::Discarded, Vec::new()));
            }
            r = fetch => r?,
        };

        let clusters = fleet.clusters.len();
        let operators = matrix.operators.len();
        let snapshot = FleetSnapshot {
            clusters: fleet.clusters,
            matrix,
            meta: LoadMeta {
                selection: token.selection.clone(),
                epoch: token.epoch,
                as_of: fleet.as_of,
                ttl_minutes: fleet.ttl_minutes,
                loaded_at: Some(Utc::now()),
            },
        };
        if !self.store.install_if(snapshot, || self.mode.is_current(&token)) {
            return Ok((LoadOutcome::Discarded, Vec::new()));
        }

        let handles = if endpoint.fans_out() {
            self.refresher.refresh_all(self.store.ids())
        } else {
            Vec::new()
        };
        info!(
            "loaded {} clusters and {} operators, refreshing {}",
            clusters,
            operators,
            handles.len()
        );
        Ok((
            LoadOutcome::Installed {
                epoch: token.epoch,
                clusters,
                operators,
                refreshing: handles.len(),
            },
            handles,
        ))
    }

    /// Switches to `selection` and reloads.
    pub async fn switch_mode(&self, selection: TimeSelection) -> Result<(ModeToken, LoadOutcome)> {
        let token = self.mode.switch(selection).await;
        let outcome = self.load(LoadIntent::Initial).await?;
        Ok((token, outcome))
    }

    pub fn view(&self, filter: &FilterState) -> FleetView {
        let refresh = self.refresher.statuses();
        self.store.with_snapshot(|clusters, matrix, meta, revision| {
            compose(
                ViewInput {
                    clusters,
                    matrix,
                    meta,
                    revision,
                    refresh: &refresh,
                },
                filter,
                Utc::now(),
            )
        })
    }

    pub fn drift(&self) -> Vec<OperatorDrift> {
        self.store.with_snapshot(|_, matrix, _, _| drift_report(matrix))
    }

    /// Starts a live refresh of every cluster the filter shows. Returns how
    /// many were started; none in historical mode.
    pub fn refresh_visible(&self, tags_and_search: &FilterState) -> usize {
        if !self.mode.selection().is_live() {
            return 0;
        }
        let ids: Vec<ClusterId> = self.store.with_snapshot(|clusters, matrix, _, _| {
            filter::resolve(clusters, &matrix.operators, tags_and_search)
                .clusters
                .iter()
                .map(|c| c.id)
                .collect()
        });
        self.refresher.refresh_all(ids).len()
    }

    pub async fn refresh_cluster(&self, id: ClusterId) -> RefreshOutcome {
        self.refresher.refresh_one(id).await
    }

    pub async fn snapshots(&self) -> Result<Vec<String>> {
        self.source.list_snapshots().await
    }

    pub async fn resources(&self, id: ClusterId, kind: ResourceKind) -> Result<RenderedTable> {
        let rows = self
            .source
            .fetch_resources(id, kind, &self.mode.selection())
            .await?;
        Ok(render_table(&kind.columns(), &rows))
    }
}

#[cfg(test)]
mod tests {
    use super::refresh::testing::{FakeSource, failure};
    use super::*;
    use crate::models::fleet::{ClusterPatch, ClusterRecord, ClusterStats, ClusterStatus, FleetLoad};
    use crate::models::operators::OperatorMatrix;

    fn load(names: &[(ClusterId, &str)], nodes: Option<u64>) -> FleetLoad {
        FleetLoad {
            clusters: names
                .iter()
                .map(|(id, name)| {
                    let mut c = ClusterRecord::new(*id, *name);
                    c.status = ClusterStatus::Gray;
                    c.stats = nodes.map(|n| ClusterStats {
                        node_count: Some(n),
                        ..Default::default()
                    });
                    c
                })
                .collect(),
            as_of: Some("2026-01-01T00:00:00".into()),
            ttl_minutes: None,
        }
    }

    fn patch(nodes: u64) -> ClusterPatch {
        ClusterPatch {
            stats: Some(ClusterStats {
                node_count: Some(nodes),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(source: Arc<FakeSource>) -> FleetService {
        FleetService::new(source, LiveSource::FastPath, None)
    }

    #[tokio::test]
    async fn live_load_fans_out_and_merges() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("fast", load(&[(1, "a"), (2, "b")], None));
        source.push_live(1, Ok(patch(3)));
        source.push_live(2, failure(2));
        let svc = service(source.clone());

        let (outcome, handles) = svc.load_tracked(LoadIntent::Initial).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Installed {
                epoch: 0,
                clusters: 2,
                operators: 0,
                refreshing: 2
            }
        );
        for h in handles {
            h.await.unwrap();
        }

        let a = svc.store.get(1).unwrap();
        assert_eq!(a.node_count(), Some(3));
        assert_eq!(a.status, ClusterStatus::Green);
        let b = svc.store.get(2).unwrap();
        assert_eq!(b.status, ClusterStatus::Red);
        assert_eq!(b.node_count(), None);
    }

    #[tokio::test]
    async fn historical_load_never_fans_out() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("2026-01-01T00:00:00", load(&[(1, "a")], Some(5)));
        let svc = service(source.clone());

        let (_, outcome) = svc
            .switch_mode(TimeSelection::Snapshot("2026-01-01T00:00:00".into()))
            .await
            .unwrap();
        assert!(matches!(outcome, LoadOutcome::Installed { refreshing: 0, .. }));
        assert_eq!(svc.refresh_visible(&FilterState::default()), 0);
        assert_eq!(svc.refresh_cluster(1).await, RefreshOutcome::Skipped);
        assert!(source.live_calls.lock().unwrap().is_empty());
        assert_eq!(svc.store.get(1).unwrap().node_count(), Some(5));
    }

    #[tokio::test]
    async fn failed_load_leaves_store_untouched() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("fast", load(&[(1, "a")], Some(2)));
        let svc = service(source.clone());
        let (_, handles) = svc.load_tracked(LoadIntent::Initial).await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        let rev = svc.store.revision();

        // no aggregate payload registered
        assert!(svc.load(LoadIntent::FullRefresh).await.is_err());
        assert_eq!(svc.store.revision(), rev);
        assert_eq!(svc.store.ids(), vec![1]);
    }

    #[tokio::test]
    async fn stale_bulk_load_is_discarded_after_switch() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("fast", load(&[(1, "live")], None));
        source.put_fleet("t1", load(&[(9, "past")], Some(4)));
        let svc = Arc::new(service(source.clone()));

        let release = source.hold_fleet();
        let pending = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.load(LoadIntent::Initial).await })
        };
        while source.fleet_gate.lock().unwrap().is_some() {
            tokio::task::yield_now().await;
        }

        svc.switch_mode(TimeSelection::Snapshot("t1".into()))
            .await
            .unwrap();
        let _ = release.send(());

        assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Discarded);
        assert_eq!(svc.store.ids(), vec![9]);
        assert_eq!(
            svc.store.meta().selection,
            TimeSelection::Snapshot("t1".into())
        );
    }

    #[tokio::test]
    async fn round_trip_through_time_travel_does_not_blend() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("fast", load(&[(1, "a"), (2, "b")], None));
        source.put_fleet("t1", load(&[(1, "a")], Some(100)));
        let svc = service(source.clone());

        // the first live refresh of cluster 1 is held until after time travel
        source.push_live(1, Ok(patch(7)));
        let held = source.gate(1);
        let (_, handles) = svc.load_tracked(LoadIntent::Initial).await.unwrap();
        while svc.refresher.status(1).phase != refresh::RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }

        svc.switch_mode(TimeSelection::Snapshot("t1".into()))
            .await
            .unwrap();
        let _ = held.send(());
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(svc.store.get(1).unwrap().node_count(), Some(100));
        assert!(svc.store.get(2).is_none());

        source.push_live(1, Ok(patch(8)));
        let (_, outcome) = svc.switch_mode(TimeSelection::Live).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Installed { refreshing: 2, .. }));
        let view = svc.view(&FilterState::default());
        assert_eq!(view.selection, TimeSelection::Live);
        assert_eq!(view.clusters.len(), 2);
        // only values from the live load or later live refreshes
        assert!(matches!(
            svc.store.get(1).unwrap().node_count(),
            None | Some(8)
        ));
    }

    #[tokio::test]
    async fn drift_and_resources_use_current_state() {
        let source = Arc::new(FakeSource::default());
        source.put_fleet("fast", load(&[(1, "a")], None));
        source.matrices.lock().unwrap().insert(
            "live".into(),
            OperatorMatrix {
                operators: vec![
                    crate::models::operators::OperatorRecord::new("op", "Op")
                        .with_installation("a", "1.0")
                        .with_installation("b", "1.1")
                        .with_installation("c", "1.1"),
                ],
                ..Default::default()
            },
        );
        let svc = service(source);
        svc.load(LoadIntent::Initial).await.unwrap();

        let drift = svc.drift();
        assert_eq!(drift[0].consensus.as_deref(), Some("1.1"));
        assert_eq!(drift[0].drifted, vec!["a"]);

        let table = svc.resources(1, ResourceKind::Nodes).await.unwrap();
        assert!(table.rows.is_empty());
        assert!(!table.headers.is_empty());
    }
}
