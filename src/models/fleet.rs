use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Cluster inventory records as served by the dashboard backend. Unknown keys
// are kept in `extra` so a record survives a load/read cycle unchanged.

pub type ClusterId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Green,
    Yellow,
    Red,
    Gray,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ClusterStatus {
    pub fn label(self) -> &'static str {
        match self {
            ClusterStatus::Green => "Healthy",
            ClusterStatus::Yellow => "Stale / Polling",
            ClusterStatus::Red => "Error / Degraded",
            ClusterStatus::Gray => "No Data",
            ClusterStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Dev,
    Uat,
    Prod,
}

impl Environment {
    pub fn classify(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEV" => Some(Environment::Dev),
            "UAT" => Some(Environment::Uat),
            "PROD" => Some(Environment::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Datacenter {
    Azure,
    Hci,
}

impl Datacenter {
    pub fn classify(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AZURE" => Some(Datacenter::Azure),
            "HCI" => Some(Datacenter::Hci),
            _ => None,
        }
    }
}

// --- Cluster ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub status: ClusterStatus,
    /// Absent until the backend has computed it; rendered as pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ClusterStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_info: Option<LicenseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensed_node_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensed_vcpu_count: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClusterRecord {
    pub fn new(id: ClusterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            environment: None,
            datacenter: None,
            status: ClusterStatus::Unknown,
            stats: None,
            license_info: None,
            licensed_node_count: None,
            licensed_vcpu_count: None,
            extra: Map::new(),
        }
    }

    pub fn node_count(&self) -> Option<u64> {
        self.stats.as_ref().and_then(|s| s.node_count)
    }

    pub fn vcpu_count(&self) -> Option<f64> {
        self.stats.as_ref().and_then(|s| s.vcpu_count)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClusterStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpu_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LicenseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Live refresh payload ---

/// Partial record returned by a per-cluster live refresh. Every present field
/// replaces the stored one; absent fields are left alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClusterPatch {
    /// Echoed by the backend but never applied: ids are immutable.
    #[serde(default, skip_serializing)]
    pub id: Option<ClusterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ClusterStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_info: Option<LicenseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensed_node_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensed_vcpu_count: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClusterPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.environment.is_none()
            && self.datacenter.is_none()
            && self.status.is_none()
            && self.stats.is_none()
            && self.license_info.is_none()
            && self.licensed_node_count.is_none()
            && self.licensed_vcpu_count.is_none()
            && self.extra.is_empty()
    }

    pub fn apply_to(self, record: &mut ClusterRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(environment) = self.environment {
            record.environment = Some(environment);
        }
        if let Some(datacenter) = self.datacenter {
            record.datacenter = Some(datacenter);
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(stats) = self.stats {
            record.stats = Some(stats);
        }
        if let Some(license_info) = self.license_info {
            record.license_info = Some(license_info);
        }
        if let Some(n) = self.licensed_node_count {
            record.licensed_node_count = Some(n);
        }
        if let Some(v) = self.licensed_vcpu_count {
            record.licensed_vcpu_count = Some(v);
        }
        for (k, v) in self.extra {
            record.extra.insert(k, v);
        }
    }
}

// --- Bulk fleet payload ---

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FleetPayload {
    Bare(Vec<ClusterRecord>),
    Envelope(FleetEnvelope),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FleetEnvelope {
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
    #[serde(default)]
    pub global_stats: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

/// A fully decoded bulk load, independent of the payload shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetLoad {
    pub clusters: Vec<ClusterRecord>,
    pub as_of: Option<String>,
    pub ttl_minutes: Option<i64>,
}

impl From<FleetPayload> for FleetLoad {
    fn from(payload: FleetPayload) -> Self {
        match payload {
            FleetPayload::Bare(clusters) => FleetLoad {
                clusters,
                ..Default::default()
            },
            FleetPayload::Envelope(env) => FleetLoad {
                clusters: env.clusters,
                as_of: env.timestamp,
                ttl_minutes: env.ttl_minutes,
            },
        }
    }
}
