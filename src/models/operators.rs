use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::fleet::ClusterId;

// --- Operator matrix ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OperatorMatrix {
    #[serde(default)]
    pub clusters: Vec<MatrixCluster>,
    #[serde(default)]
    pub operators: Vec<OperatorRecord>,
}

impl OperatorMatrix {
    pub fn cluster(&self, name: &str) -> Option<&MatrixCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Names of clusters whose operator data was not collected for this view.
    pub fn uncollected(&self) -> Vec<&str> {
        self.clusters
            .iter()
            .filter(|c| !c.data_collected)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixCluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ClusterId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// Permission denied on the operator API for this cluster.
    #[serde(default)]
    pub auth_error: bool,
    #[serde(default = "collected_by_default", alias = "has_data")]
    pub data_collected: bool,
}

fn collected_by_default() -> bool {
    true
}

impl MatrixCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            environment: None,
            datacenter: None,
            auth_error: false,
            data_collected: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub installations: Installations,
}

impl OperatorRecord {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            provider: String::new(),
            installations: Installations::default(),
        }
    }

    pub fn with_installation(mut self, cluster: &str, version: &str) -> Self {
        self.installations
            .insert(cluster.to_string(), InstallationRecord::with_version(version));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstallationRecord {
    #[serde(default = "unknown_version")]
    pub version: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "installPlanApproval")]
    pub approval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "crds")]
    pub custom_resources: Vec<CustomResourceDescriptor>,
}

fn unknown_version() -> String {
    "Unknown".to_string()
}

impl InstallationRecord {
    pub fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

// --- Installations ---

/// Cluster name -> installation, kept in the backend's document order. The
/// order is significant: consensus ties go to the first version seen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Installations(Vec<(String, InstallationRecord)>);

impl Installations {
    pub fn get(&self, cluster: &str) -> Option<&InstallationRecord> {
        self.0.iter().find(|(c, _)| c == cluster).map(|(_, i)| i)
    }

    /// Replaces an existing entry in place, otherwise appends.
    pub fn insert(&mut self, cluster: String, install: InstallationRecord) {
        match self.0.iter_mut().find(|(c, _)| *c == cluster) {
            Some(slot) => slot.1 = install,
            None => self.0.push((cluster, install)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstallationRecord)> {
        self.0.iter().map(|(c, i)| (c.as_str(), i))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, InstallationRecord)> for Installations {
    fn from_iter<I: IntoIterator<Item = (String, InstallationRecord)>>(iter: I) -> Self {
        let mut out = Installations::default();
        for (cluster, install) in iter {
            out.insert(cluster, install);
        }
        out
    }
}

impl Serialize for Installations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (cluster, install) in &self.0 {
            map.serialize_entry(cluster, install)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Installations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct InstallationsVisitor;

        impl<'de> Visitor<'de> for InstallationsVisitor {
            type Value = Installations;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of cluster name to installation")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Installations::default();
                while let Some((cluster, install)) =
                    access.next_entry::<String, InstallationRecord>()?
                {
                    out.insert(cluster, install);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(InstallationsVisitor)
    }
}
