use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::mode::ModeSelector;
use super::store::{FleetStore, Merge};
use crate::clients::FleetSource;
use crate::models::fleet::{ClusterId, ClusterStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    #[default]
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Live stats merged into the record.
    Updated,
    /// Fetch failed; the record was flagged red and otherwise left alone.
    Degraded,
    /// The mode changed while the fetch was in flight; result dropped.
    Discarded,
    /// Nothing to do: historical mode or unknown cluster.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct RefreshStatus {
    pub phase: RefreshPhase,
    pub last_outcome: Option<RefreshOutcome>,
    pub last_finished: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Slot {
    in_flight: u32,
    last_outcome: Option<RefreshOutcome>,
    last_finished: Option<DateTime<Utc>>,
}

pub struct RefreshController {
    source: Arc<dyn FleetSource>,
    store: Arc<FleetStore>,
    mode: Arc<ModeSelector>,
    slots: Mutex<HashMap<ClusterId, Slot>>,
    activity: watch::Sender<u64>,
}

/// Keeps a cluster in `Refreshing` until dropped.
struct InFlight<'a> {
    ctl: &'a RefreshController,
    id: ClusterId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ctl.update_slot(self.id, |slot| {
            slot.in_flight = slot.in_flight.saturating_sub(1);
        });
    }
}

impl RefreshController {
    pub fn new(
        source: Arc<dyn FleetSource>,
        store: Arc<FleetStore>,
        mode: Arc<ModeSelector>,
    ) -> Self {
        let (activity, _) = watch::channel(0);
        Self {
            source,
            store,
            mode,
            slots: Mutex::new(HashMap::new()),
            activity,
        }
    }

    fn update_slot(&self, id: ClusterId, f: impl FnOnce(&mut Slot)) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            f(slots.entry(id).or_default());
        }
        self.activity.send_modify(|n| *n += 1);
    }

    fn begin(&self, id: ClusterId) -> InFlight<'_> {
        self.update_slot(id, |slot| slot.in_flight += 1);
        InFlight { ctl: self, id }
    }

    fn finish(&self, id: ClusterId, outcome: RefreshOutcome) -> RefreshOutcome {
        self.update_slot(id, |slot| {
            slot.last_outcome = Some(outcome);
            slot.last_finished = Some(Utc::now());
        });
        outcome
    }

    pub fn status(&self, id: ClusterId) -> RefreshStatus {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&id).map(to_status).unwrap_or_default()
    }

    pub fn statuses(&self) -> HashMap<ClusterId, RefreshStatus> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(id, s)| (*id, to_status(s))).collect()
    }

    /// Ticks whenever a refresh starts or finishes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.activity.subscribe()
    }

    /// The mode token is checked when the result is merged, not when the
    /// request is issued.
    pub async fn refresh_one(&self, id: ClusterId) -> RefreshOutcome {
        let (token, cancel) = self.mode.lease();
        if !token.selection.is_live() {
            debug!("cluster {} refresh skipped in historical mode", id);
            return RefreshOutcome::Skipped;
        }
        if self.store.get(id).is_none() {
            debug!("cluster {} refresh skipped, not in fleet", id);
            return RefreshOutcome::Skipped;
        }

        let _in_flight = self.begin(id);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cluster {} refresh cancelled by mode switch", id);
                return self.finish(id, RefreshOutcome::Discarded);
            }
            r = self.source.fetch_live_stats(id) => r,
        };

        if !self.mode.is_current(&token) {
            debug!("cluster {} refresh result is stale, dropping", id);
            return self.finish(id, RefreshOutcome::Discarded);
        }

        let (merge, applied) = match result {
            Ok(mut patch) => {
                if patch.status.is_none() {
                    patch.status = Some(ClusterStatus::Green);
                }
                (
                    self.store.patch_in_epoch(token.epoch, id, patch),
                    RefreshOutcome::Updated,
                )
            }
            Err(e) => {
                warn!("live refresh of cluster {} failed: {}", id, e);
                (
                    self.store.mark_degraded_in_epoch(token.epoch, id),
                    RefreshOutcome::Degraded,
                )
            }
        };

        let outcome = match merge {
            Merge::Applied => applied,
            Merge::UnknownId => RefreshOutcome::Skipped,
            Merge::StaleEpoch => {
                debug!("cluster {} refresh raced a bulk load, dropping", id);
                RefreshOutcome::Discarded
            }
        };
        self.finish(id, outcome)
    }

    /// Starts one independent refresh per id. The handles may be dropped.
    pub fn refresh_all(
        self: &Arc<Self>,
        ids: impl IntoIterator<Item = ClusterId>,
    ) -> Vec<JoinHandle<RefreshOutcome>> {
        ids.into_iter()
            .map(|id| {
                let ctl = Arc::clone(self);
                tokio::spawn(async move { ctl.refresh_one(id).await })
            })
            .collect()
    }

    /// Periodically refreshes every cluster while the session is live.
    pub async fn run_live_refresher(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<()>,
    ) {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.mode.selection().is_live() {
                        let ids = self.store.ids();
                        debug!("periodic refresh of {} clusters", ids.len());
                        self.refresh_all(ids);
                    }
                }
                _ = shutdown.changed() => {
                    info!("live refresher shutting down");
                    return;
                }
            }
        }
    }
}

fn to_status(slot: &Slot) -> RefreshStatus {
    RefreshStatus {
        phase: if slot.in_flight > 0 {
            RefreshPhase::Refreshing
        } else {
            RefreshPhase::Idle
        },
        last_outcome: slot.last_outcome,
        last_finished: slot.last_finished,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    use crate::clients::FleetSource;
    use crate::error::{FleetError, Result};
    use crate::fleet::columns::ResourceKind;
    use crate::fleet::mode::{Endpoint, TimeSelection};
    use crate::models::fleet::{ClusterId, ClusterPatch, FleetLoad};
    use crate::models::operators::OperatorMatrix;

    pub type Reply = Result<ClusterPatch>;

    /// Scripted backend. Live stats replies can be held back on a gate to
    /// control completion order.
    #[derive(Default)]
    pub struct FakeSource {
        pub fleets: Mutex<HashMap<String, FleetLoad>>,
        pub matrices: Mutex<HashMap<String, OperatorMatrix>>,
        pub live: Mutex<HashMap<ClusterId, Vec<Reply>>>,
        pub gates: Mutex<HashMap<ClusterId, Vec<oneshot::Receiver<()>>>>,
        pub fleet_gate: Mutex<Option<oneshot::Receiver<()>>>,
        pub live_calls: Mutex<Vec<ClusterId>>,
        pub snapshots: Vec<String>,
    }

    pub fn endpoint_key(endpoint: &Endpoint) -> String {
        match endpoint {
            Endpoint::LiveFastPath => "fast".into(),
            Endpoint::LiveAggregate { .. } => "aggregate".into(),
            Endpoint::Historical(ts) => ts.clone(),
        }
    }

    pub fn selection_key(selection: &TimeSelection) -> String {
        selection.snapshot_time().unwrap_or("live").to_string()
    }

    pub fn failure(id: ClusterId) -> Reply {
        Err(FleetError::Status {
            path: format!("/api/dashboard/{}/live_stats", id),
            status: 502,
            body: "bad gateway".into(),
        })
    }

    impl FakeSource {
        pub fn push_live(&self, id: ClusterId, reply: Reply) {
            self.live.lock().unwrap().entry(id).or_default().push(reply);
        }

        pub fn put_fleet(&self, key: &str, load: FleetLoad) {
            self.fleets.lock().unwrap().insert(key.to_string(), load);
        }

        pub fn hold_fleet(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.fleet_gate.lock().unwrap() = Some(rx);
            tx
        }

        pub fn gate(&self, id: ClusterId) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().entry(id).or_default().push(rx);
            tx
        }
    }

    #[async_trait]
    impl FleetSource for FakeSource {
        async fn fetch_fleet(&self, endpoint: &Endpoint) -> Result<FleetLoad> {
            let gate = self.fleet_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.fleets
                .lock()
                .unwrap()
                .get(&endpoint_key(endpoint))
                .cloned()
                .ok_or_else(|| FleetError::Status {
                    path: endpoint.path().into(),
                    status: 404,
                    body: String::new(),
                })
        }

        async fn fetch_operator_matrix(&self, selection: &TimeSelection) -> Result<OperatorMatrix> {
            Ok(self
                .matrices
                .lock()
                .unwrap()
                .get(&selection_key(selection))
                .cloned()
                .unwrap_or_default())
        }

        async fn fetch_live_stats(&self, id: ClusterId) -> Result<ClusterPatch> {
            self.live_calls.lock().unwrap().push(id);
            let gate = {
                let mut gates = self.gates.lock().unwrap();
                gates.get_mut(&id).and_then(|g| (!g.is_empty()).then(|| g.remove(0)))
            };
            let reply = {
                let mut live = self.live.lock().unwrap();
                live.get_mut(&id)
                    .and_then(|r| (!r.is_empty()).then(|| r.remove(0)))
                    .unwrap_or_else(|| Ok(ClusterPatch::default()))
            };
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            reply
        }

        async fn list_snapshots(&self) -> Result<Vec<String>> {
            Ok(self.snapshots.clone())
        }

        async fn fetch_resources(
            &self,
            _id: ClusterId,
            _kind: ResourceKind,
            _selection: &TimeSelection,
        ) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{failure, FakeSource};
    use super::*;
    use crate::fleet::mode::{LiveSource, TimeSelection};
    use crate::fleet::store::{FleetSnapshot, LoadMeta};
    use crate::models::fleet::{ClusterPatch, ClusterRecord, ClusterStats};

    fn record(id: ClusterId, nodes: u64) -> ClusterRecord {
        let mut r = ClusterRecord::new(id, format!("cluster-{}", id));
        r.status = ClusterStatus::Yellow;
        r.stats = Some(ClusterStats {
            node_count: Some(nodes),
            ..Default::default()
        });
        r
    }

    fn live_patch(nodes: u64) -> ClusterPatch {
        ClusterPatch {
            stats: Some(ClusterStats {
                node_count: Some(nodes),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn setup(source: FakeSource) -> (Arc<FakeSource>, Arc<FleetStore>, Arc<ModeSelector>, Arc<RefreshController>) {
        let source = Arc::new(source);
        let store = Arc::new(FleetStore::new());
        let mode = Arc::new(ModeSelector::new(LiveSource::FastPath, None));
        store.install_if(
            FleetSnapshot {
                clusters: vec![record(1, 3), record(2, 5)],
                ..Default::default()
            },
            || true,
        );
        let ctl = Arc::new(RefreshController::new(
            source.clone(),
            store.clone(),
            mode.clone(),
        ));
        (source, store, mode, ctl)
    }

    #[tokio::test]
    async fn success_patches_and_marks_green() {
        let (source, store, _, ctl) = setup(FakeSource::default());
        source.push_live(1, Ok(live_patch(9)));

        assert_eq!(ctl.refresh_one(1).await, RefreshOutcome::Updated);
        let rec = store.get(1).unwrap();
        assert_eq!(rec.node_count(), Some(9));
        assert_eq!(rec.status, ClusterStatus::Green);
        assert_eq!(ctl.status(1).phase, RefreshPhase::Idle);
        assert_eq!(ctl.status(1).last_outcome, Some(RefreshOutcome::Updated));
    }

    #[tokio::test]
    async fn failure_degrades_only_that_cluster() {
        let (source, store, _, ctl) = setup(FakeSource::default());
        source.push_live(1, failure(1));
        source.push_live(2, Ok(live_patch(6)));

        let outcomes: Vec<RefreshOutcome> = futures_util::future::join_all(ctl.refresh_all([1, 2]))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(outcomes, vec![RefreshOutcome::Degraded, RefreshOutcome::Updated]);

        let failed = store.get(1).unwrap();
        assert_eq!(failed.status, ClusterStatus::Red);
        assert_eq!(failed.node_count(), Some(3));
        assert_eq!(store.get(2).unwrap().node_count(), Some(6));
    }

    #[tokio::test]
    async fn historical_mode_never_refreshes() {
        let (source, store, mode, ctl) = setup(FakeSource::default());
        mode.switch(TimeSelection::Snapshot("t".into())).await;
        source.push_live(1, Ok(live_patch(100)));
        assert_eq!(ctl.refresh_one(1).await, RefreshOutcome::Skipped);
        assert_eq!(store.get(1).unwrap().node_count(), Some(3));
    }

    #[tokio::test]
    async fn unknown_cluster_is_skipped() {
        let (_, _, _, ctl) = setup(FakeSource::default());
        assert_eq!(ctl.refresh_one(77).await, RefreshOutcome::Skipped);
    }

    #[tokio::test]
    async fn result_landing_after_switch_is_dropped() {
        let (source, store, mode, ctl) = setup(FakeSource::default());
        source.push_live(1, Ok(live_patch(42)));
        let release = source.gate(1);

        let pending = ctl.refresh_all([1]).pop().unwrap();
        tokio::task::yield_now().await;
        while ctl.status(1).phase != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }

        let token = mode.switch(TimeSelection::Snapshot("2026-01-01T00:00:00".into())).await;
        store.install_if(
            FleetSnapshot {
                clusters: vec![record(1, 1)],
                meta: LoadMeta {
                    selection: token.selection.clone(),
                    epoch: token.epoch,
                    ..Default::default()
                },
                ..Default::default()
            },
            || true,
        );
        let _ = release.send(());

        assert_eq!(pending.await.unwrap(), RefreshOutcome::Discarded);
        assert_eq!(store.get(1).unwrap().node_count(), Some(1));
        assert_eq!(ctl.status(1).phase, RefreshPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_runs_only_while_live() {
        let (source, _, mode, ctl) = setup(FakeSource::default());
        let (stop, stopped) = watch::channel(());
        let task = tokio::spawn(ctl.clone().run_live_refresher(Duration::from_secs(60), stopped));

        time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let mut calls = source.live_calls.lock().unwrap().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![1, 2]);

        mode.switch(TimeSelection::Snapshot("t".into())).await;
        time::sleep(Duration::from_secs(180)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.live_calls.lock().unwrap().len(), 2);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_refreshes_take_last_response() {
        let (source, store, _, ctl) = setup(FakeSource::default());
        source.push_live(1, Ok(live_patch(10)));
        source.push_live(1, Ok(live_patch(20)));
        let first_gate = source.gate(1);
        let second_gate = source.gate(1);

        let mut handles = ctl.refresh_all([1]);
        while ctl.status(1).phase != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }
        handles.extend(ctl.refresh_all([1]));
        loop {
            // both requests must have claimed their gate before releasing
            if source.gates.lock().unwrap().get(&1).is_none_or(|g| g.is_empty()) {
                break;
            }
            tokio::task::yield_now().await;
        }

        // the second request answers first, then the first one lands
        let _ = second_gate.send(());
        let second = handles.pop().unwrap().await.unwrap();
        assert_eq!(second, RefreshOutcome::Updated);
        assert_eq!(store.get(1).unwrap().node_count(), Some(20));
        assert_eq!(ctl.status(1).phase, RefreshPhase::Refreshing);

        let _ = first_gate.send(());
        let first = handles.pop().unwrap().await.unwrap();
        assert_eq!(first, RefreshOutcome::Updated);
        assert_eq!(store.get(1).unwrap().node_count(), Some(10));
        assert_eq!(ctl.status(1).phase, RefreshPhase::Idle);
    }
}
