use serde::Serialize;

use crate::fleet::consensus::Drift;
use crate::fleet::filter::SearchOutcome;
use crate::fleet::mode::TimeSelection;
use crate::fleet::refresh::RefreshStatus;
use crate::models::fleet::ClusterRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetView {
    pub selection: TimeSelection,
    pub revision: u64,
    pub data_as_of: Option<String>,
    /// "3 minutes ago" style rendering of the last bulk load.
    pub loaded: String,
    /// Time left on the backend cache, live aggregate loads only.
    pub cache_expires_in: Option<String>,
    pub clusters: Vec<ClusterView>,
    pub inventory: RenderedTable,
    pub matrix_clusters: Vec<String>,
    pub operators: Vec<OperatorView>,
    pub totals: FleetTotals,
    pub search: SearchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    #[serde(flatten)]
    pub record: ClusterRecord,
    pub refresh: RefreshStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorView {
    pub name: String,
    pub display_name: String,
    pub provider: String,
    pub consensus: Option<String>,
    /// One cell per entry of `FleetView::matrix_clusters`, same order.
    pub cells: Vec<OperatorCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperatorCell {
    /// No data was collected for the cluster; shown as N/A.
    NotApplicable,
    PermissionDenied,
    NotInstalled,
    Installed {
        version: String,
        channel: String,
        drift: Drift,
    },
}

/// Fleet-wide sums, independent of filters. Pending stats count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetTotals {
    pub clusters: usize,
    pub nodes: u64,
    pub licensed_nodes: u64,
    pub vcpus: f64,
    pub licensed_vcpus: f64,
    pub licenses: u64,
}
