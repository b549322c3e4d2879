use serde_json::Value;
use std::str::FromStr;

use super::resolver::{ColumnSpec, PathExpr, Resolved};
use crate::models::views::RenderedTable;

/// Shown while a stat the backend has not computed yet is outstanding.
pub const PENDING: &str = "pending";

#[derive(Debug, Clone)]
pub struct Column {
    pub header: &'static str,
    pub spec: ColumnSpec,
}

impl Column {
    fn path(header: &'static str, path: &str) -> Self {
        Self {
            header,
            spec: ColumnSpec::path(path),
        }
    }

    fn computed(
        header: &'static str,
        f: impl Fn(&Value) -> Resolved + Send + Sync + 'static,
    ) -> Self {
        Self {
            header,
            spec: ColumnSpec::computed(f),
        }
    }
}

pub fn render_table(columns: &[Column], records: &[Value]) -> RenderedTable {
    RenderedTable {
        headers: columns.iter().map(|c| c.header.to_string()).collect(),
        rows: records
            .iter()
            .map(|r| columns.iter().map(|c| c.spec.resolve(r).render()).collect())
            .collect(),
    }
}

// --- Cluster inventory ---

pub fn inventory_columns() -> Vec<Column> {
    vec![
        Column::path("Name", "name"),
        Column::computed("Status", |r| {
            let status = r.get("status").cloned().unwrap_or(Value::Null);
            let status: crate::models::fleet::ClusterStatus =
                serde_json::from_value(status).unwrap_or_default();
            Resolved::text(status.label())
        }),
        Column::computed("Total Nodes", |r| {
            PathExpr::parse("stats.node_count")
                .resolve(r)
                .map(|v| Resolved::Present(v.clone()))
                .unwrap_or_else(|| Resolved::text(PENDING))
        }),
        Column::path("App Nodes", "licensed_node_count"),
        Column::path("Licenses", "license_info.count"),
        Column::path("Total vCPUs", "stats.vcpu_count"),
        Column::path("Total Licensed vCPUs", "licensed_vcpu_count"),
        Column::computed("Console", |r| {
            match PathExpr::parse("stats.console_url").resolve(r) {
                Some(Value::String(url)) if !url.is_empty() && url != "#" => {
                    Resolved::text(url.clone())
                }
                _ => Resolved::Absent,
            }
        }),
        Column::path("Datacenter", "datacenter"),
        Column::path("Environment", "environment"),
        Column::path("Version", "stats.version"),
    ]
}

// --- Per-cluster resource tables ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Nodes,
    Machines,
    MachineSets,
    Projects,
    MachineAutoscalers,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Machines => "machines",
            ResourceKind::MachineSets => "machinesets",
            ResourceKind::Projects => "projects",
            ResourceKind::MachineAutoscalers => "machineautoscalers",
        }
    }

    pub fn columns(self) -> Vec<Column> {
        match self {
            ResourceKind::Nodes => node_columns(),
            ResourceKind::Machines => machine_columns(),
            _ => default_columns(),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nodes" => Ok(ResourceKind::Nodes),
            "machines" => Ok(ResourceKind::Machines),
            "machinesets" => Ok(ResourceKind::MachineSets),
            "projects" => Ok(ResourceKind::Projects),
            "machineautoscalers" => Ok(ResourceKind::MachineAutoscalers),
            other => Err(format!(
                "resource type {:?} not supported; valid types: nodes, machines, machinesets, projects, machineautoscalers",
                other
            )),
        }
    }
}

fn default_columns() -> Vec<Column> {
    vec![
        Column::path("Name", "metadata.name"),
        Column::path("Namespace", "metadata.namespace"),
        Column::path("Created", "metadata.creationTimestamp"),
    ]
}

fn node_ready(node: &Value) -> Resolved {
    let ready = PathExpr::parse("status.conditions")
        .resolve(node)
        .and_then(Value::as_array)
        .and_then(|conds| conds.iter().find(|c| c["type"] == "Ready"))
        .map(|c| c["status"] == "True")
        .unwrap_or(false);
    Resolved::text(if ready { "Ready" } else { "Not Ready" })
}

fn node_roles(node: &Value) -> Resolved {
    const PREFIX: &str = "node-role.kubernetes.io/";
    let mut roles: Vec<&str> = PathExpr::parse("metadata.labels")
        .resolve(node)
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix(PREFIX))
                .collect()
        })
        .unwrap_or_default();
    roles.sort_unstable();
    Resolved::text(roles.join(", "))
}

fn node_columns() -> Vec<Column> {
    vec![
        Column::path("Name", "metadata.name"),
        Column::computed("Status", node_ready),
        Column::path("Capacity (vCPU)", "__capacity.cpu"),
        Column::path("Capacity (GB)", "__capacity.memory_gb"),
        Column::path("Intake #", "metadata.labels.intake_number"),
        Column::path("MAPID", "metadata.labels.mapid"),
        Column::path("LOB", "metadata.labels.lob"),
        Column::computed("Roles", node_roles),
        Column::path("Created", "metadata.creationTimestamp"),
    ]
}

fn machine_columns() -> Vec<Column> {
    vec![
        Column::path("Name", "metadata.name"),
        Column::path("Namespace", "metadata.namespace"),
        Column::path("Phase", "status.phase"),
        Column::path("Intake #", "metadata.labels.intake_number"),
        Column::path("MAPID", "metadata.labels.mapid"),
        Column::path("VM Type", "__enriched.vm_type"),
        Column::computed("Subnet", |m| {
            ColumnSpec::path("spec.providerSpec.value.subnet")
                .resolve(m)
                .or_else(|| {
                    ColumnSpec::path("spec.providerSpec.value.network.devices[0].networkName")
                        .resolve(m)
                })
        }),
        Column::path("Created", "metadata.creationTimestamp"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fleet::{ClusterRecord, ClusterStats};
    use serde_json::json;

    #[test]
    fn inventory_marks_pending_stats_apart_from_zero() {
        let pending = ClusterRecord::new(1, "prod-east");
        let mut zero = ClusterRecord::new(2, "prod-west");
        zero.stats = Some(ClusterStats {
            node_count: Some(0),
            console_url: Some("#".into()),
            ..Default::default()
        });

        let table = render_table(&inventory_columns(), &[pending.to_value(), zero.to_value()]);
        let nodes = table.headers.iter().position(|h| h == "Total Nodes").unwrap();
        let console = table.headers.iter().position(|h| h == "Console").unwrap();
        let licenses = table.headers.iter().position(|h| h == "Licenses").unwrap();

        assert_eq!(table.rows[0][nodes], PENDING);
        assert_eq!(table.rows[1][nodes], "0");
        assert_eq!(table.rows[1][console], "-");
        assert_eq!(table.rows[0][licenses], "-");
        assert_eq!(table.rows[0][1], "Unknown");
    }

    #[test]
    fn node_table_computes_ready_and_roles() {
        let node = json!({
            "metadata": {
                "name": "master-0",
                "labels": {
                    "node-role.kubernetes.io/master": "",
                    "node-role.kubernetes.io/control-plane": "",
                    "mapid": "M-7"
                }
            },
            "status": {"conditions": [{"type": "Ready", "status": "False"}]},
            "__capacity": {"cpu": 8, "memory_gb": 31.2}
        });
        let table = render_table(&ResourceKind::Nodes.columns(), &[node]);
        let row = &table.rows[0];
        assert_eq!(row[0], "master-0");
        assert_eq!(row[1], "Not Ready");
        assert_eq!(row[2], "8");
        assert_eq!(row[5], "M-7");
        assert_eq!(row[6], "-");
        assert_eq!(row[7], "control-plane, master");
    }

    #[test]
    fn machine_subnet_falls_back_to_network_device() {
        let vsphere = json!({
            "metadata": {"name": "m1"},
            "spec": {"providerSpec": {"value": {"network": {"devices": [{"networkName": "vlan-42"}]}}}}
        });
        let azure = json!({
            "metadata": {"name": "m2"},
            "spec": {"providerSpec": {"value": {"subnet": "sub-a"}}}
        });
        let table = render_table(&ResourceKind::Machines.columns(), &[vsphere, azure]);
        assert_eq!(table.rows[0][6], "vlan-42");
        assert_eq!(table.rows[1][6], "sub-a");
    }

    #[test]
    fn resource_kind_parses_case_insensitively() {
        assert_eq!("Nodes".parse::<ResourceKind>(), Ok(ResourceKind::Nodes));
        assert!("pods".parse::<ResourceKind>().is_err());
    }
}
