use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::mode::TimeSelection;
use crate::models::fleet::{ClusterId, ClusterPatch, ClusterRecord, ClusterStatus};
use crate::models::operators::OperatorMatrix;

/// Where the current contents came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadMeta {
    pub selection: TimeSelection,
    /// Mode epoch the contents were loaded under.
    pub epoch: u64,
    /// Backend's "data as of" timestamp, if it sent one.
    pub as_of: Option<String>,
    pub ttl_minutes: Option<i64>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Everything a bulk load installs in one write.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub clusters: Vec<ClusterRecord>,
    pub matrix: OperatorMatrix,
    pub meta: LoadMeta,
}

#[derive(Default)]
struct StoreInner {
    clusters: Vec<ClusterRecord>,
    index: HashMap<ClusterId, usize>,
    matrix: OperatorMatrix,
    meta: LoadMeta,
}

impl StoreInner {
    fn set_clusters(&mut self, records: Vec<ClusterRecord>) {
        let mut index = HashMap::with_capacity(records.len());
        let mut clusters: Vec<ClusterRecord> = Vec::with_capacity(records.len());
        for rec in records {
            match index.get(&rec.id) {
                Some(&pos) => {
                    warn!("duplicate cluster id {} in bulk load, keeping the last", rec.id);
                    clusters[pos] = rec;
                }
                None => {
                    index.insert(rec.id, clusters.len());
                    clusters.push(rec);
                }
            }
        }
        self.clusters = clusters;
        self.index = index;
    }

    fn get_mut(&mut self, id: ClusterId) -> Option<&mut ClusterRecord> {
        let pos = *self.index.get(&id)?;
        self.clusters.get_mut(pos)
    }
}

/// Result of an epoch-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Applied,
    UnknownId,
    /// The store holds data from another mode epoch; nothing was written.
    StaleEpoch,
}

pub struct FleetStore {
    inner: RwLock<StoreInner>,
    revision: watch::Sender<u64>,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(StoreInner::default()),
            revision,
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // --- Bulk ---

    pub fn replace_all(&self, records: Vec<ClusterRecord>) {
        let mut inner = self.write_guard();
        inner.set_clusters(records);
        self.bump();
    }

    /// Installs `snapshot` only if `still_current` holds and no newer epoch
    /// has been installed. Both checks run under the write lock.
    pub fn install_if(&self, snapshot: FleetSnapshot, still_current: impl FnOnce() -> bool) -> bool {
        let mut inner = self.write_guard();
        if snapshot.meta.epoch < inner.meta.epoch || !still_current() {
            debug!("dropping bulk load from epoch {}", snapshot.meta.epoch);
            return false;
        }
        inner.set_clusters(snapshot.clusters);
        inner.matrix = snapshot.matrix;
        inner.meta = snapshot.meta;
        self.bump();
        true
    }

    // --- Per entity ---

    /// Shallow-merges `patch` into the record. Unknown ids are ignored and an
    /// empty patch changes nothing, not even the revision.
    pub fn patch(&self, id: ClusterId, patch: ClusterPatch) -> bool {
        self.merge(None, id, patch) == Merge::Applied
    }

    /// Flags a record whose refresh failed. Last known stats are kept.
    pub fn mark_degraded(&self, id: ClusterId) -> bool {
        self.degrade(None, id) == Merge::Applied
    }

    /// Like [`FleetStore::patch`], but only if the contents were loaded under
    /// `epoch`. The check and the write happen under one lock.
    pub fn patch_in_epoch(&self, epoch: u64, id: ClusterId, patch: ClusterPatch) -> Merge {
        self.merge(Some(epoch), id, patch)
    }

    pub fn mark_degraded_in_epoch(&self, epoch: u64, id: ClusterId) -> Merge {
        self.degrade(Some(epoch), id)
    }

    fn merge(&self, epoch: Option<u64>, id: ClusterId, patch: ClusterPatch) -> Merge {
        let mut inner = self.write_guard();
        if epoch.is_some_and(|e| e != inner.meta.epoch) {
            return Merge::StaleEpoch;
        }
        let Some(record) = inner.get_mut(id) else {
            debug!("patch for unknown cluster {} ignored", id);
            return Merge::UnknownId;
        };
        if patch.is_empty() {
            return Merge::Applied;
        }
        patch.apply_to(record);
        self.bump();
        Merge::Applied
    }

    fn degrade(&self, epoch: Option<u64>, id: ClusterId) -> Merge {
        let mut inner = self.write_guard();
        if epoch.is_some_and(|e| e != inner.meta.epoch) {
            return Merge::StaleEpoch;
        }
        let Some(record) = inner.get_mut(id) else {
            return Merge::UnknownId;
        };
        record.status = ClusterStatus::Red;
        self.bump();
        Merge::Applied
    }

    // --- Reads ---

    pub fn read_all(&self) -> Vec<ClusterRecord> {
        self.read_guard().clusters.clone()
    }

    pub fn get(&self, id: ClusterId) -> Option<ClusterRecord> {
        let inner = self.read_guard();
        inner.index.get(&id).map(|&pos| inner.clusters[pos].clone())
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.read_guard().clusters.iter().map(|c| c.id).collect()
    }

    pub fn meta(&self) -> LoadMeta {
        self.read_guard().meta.clone()
    }

    /// Runs `f` against one consistent view of clusters, matrix and metadata.
    pub fn with_snapshot<R>(
        &self,
        f: impl FnOnce(&[ClusterRecord], &OperatorMatrix, &LoadMeta, u64) -> R,
    ) -> R {
        let inner = self.read_guard();
        f(&inner.clusters, &inner.matrix, &inner.meta, self.revision())
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
