use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use super::columns::{inventory_columns, render_table};
use super::consensus::{classify, consensus};
use super::filter::{FilterState, FleetMember, SearchOutcome, resolve as visible, tagged};
use super::refresh::RefreshStatus;
use super::store::LoadMeta;
use crate::helpers::{human_time, remaining_cache_time};
use crate::models::fleet::{ClusterId, ClusterRecord};
use crate::models::operators::{MatrixCluster, OperatorMatrix, OperatorRecord};
use crate::models::views::{ClusterView, FleetTotals, FleetView, OperatorCell, OperatorView};

pub fn totals(clusters: &[ClusterRecord]) -> FleetTotals {
    clusters.iter().fold(
        FleetTotals {
            clusters: clusters.len(),
            ..Default::default()
        },
        |mut t, c| {
            t.nodes += c.node_count().unwrap_or(0);
            t.vcpus += c.vcpu_count().unwrap_or(0.0);
            t.licensed_nodes += c.licensed_node_count.unwrap_or(0);
            t.licensed_vcpus += c.licensed_vcpu_count.unwrap_or(0.0);
            t.licenses += c.license_info.as_ref().and_then(|l| l.count).unwrap_or(0);
            t
        },
    )
}

pub fn operator_cell(
    op: &OperatorRecord,
    cluster: &MatrixCluster,
    consensus: Option<&str>,
) -> OperatorCell {
    if !cluster.data_collected {
        return OperatorCell::NotApplicable;
    }
    match op.installations.get(&cluster.name) {
        Some(install) => OperatorCell::Installed {
            version: install.version.clone(),
            channel: install.channel.clone(),
            drift: classify(&install.version, consensus.unwrap_or(&install.version)),
        },
        None if cluster.auth_error => OperatorCell::PermissionDenied,
        None => OperatorCell::NotInstalled,
    }
}

fn operator_view(op: &OperatorRecord, columns: &[&MatrixCluster], excluded: &HashSet<&str>) -> OperatorView {
    // consensus is fleet-wide, filters only narrow what is shown
    let consensus = consensus(op, excluded);
    OperatorView {
        name: op.name.clone(),
        display_name: op.display_name.clone(),
        provider: op.provider.clone(),
        cells: columns
            .iter()
            .map(|c| operator_cell(op, c, consensus.as_deref()))
            .collect(),
        consensus,
    }
}

pub struct ViewInput<'a> {
    pub clusters: &'a [ClusterRecord],
    pub matrix: &'a OperatorMatrix,
    pub meta: &'a LoadMeta,
    pub revision: u64,
    pub refresh: &'a HashMap<ClusterId, RefreshStatus>,
}

pub fn compose(input: ViewInput<'_>, filter: &FilterState, now: DateTime<Utc>) -> FleetView {
    let ViewInput {
        clusters,
        matrix,
        meta,
        revision,
        refresh,
    } = input;

    // the search is decided once, over the inventory; the grid follows it
    let inventory = visible(clusters, &matrix.operators, filter);
    let matched: HashSet<&str> = inventory.clusters.iter().map(|c| c.member_name()).collect();
    let columns: Vec<&MatrixCluster> = tagged(&matrix.clusters, filter)
        .into_iter()
        .filter(|c| {
            inventory.search != SearchOutcome::MatchedClusters || matched.contains(c.member_name())
        })
        .collect();
    let excluded: HashSet<&str> = matrix.uncollected().into_iter().collect();

    let rows: Vec<serde_json::Value> = inventory.clusters.iter().map(|c| c.to_value()).collect();

    let cache_expires_in = match (meta.selection.is_live(), &meta.as_of, meta.ttl_minutes) {
        (true, Some(as_of), Some(ttl)) => remaining_cache_time(as_of, ttl, now),
        _ => None,
    };

    FleetView {
        selection: meta.selection.clone(),
        revision,
        data_as_of: meta.as_of.clone(),
        loaded: human_time(meta.loaded_at, now),
        cache_expires_in,
        inventory: render_table(&inventory_columns(), &rows),
        clusters: inventory
            .clusters
            .iter()
            .map(|c| ClusterView {
                record: (*c).clone(),
                refresh: refresh.get(&c.id).copied().unwrap_or_default(),
            })
            .collect(),
        matrix_clusters: columns.iter().map(|c| c.name.clone()).collect(),
        operators: inventory
            .operators
            .iter()
            .map(|op| operator_view(op, &columns, &excluded))
            .collect(),
        totals: totals(clusters),
        search: inventory.search,
    }
}
