use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::operators::{OperatorMatrix, OperatorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Drift {
    Match,
    Mismatch,
}

/// Most common installed version among collected clusters. Ties go to the
/// version seen first in installation order.
pub fn consensus(op: &OperatorRecord, excluded: &HashSet<&str>) -> Option<String> {
    // version -> (count, first position)
    let mut tally: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, (_, install)) in op
        .installations
        .iter()
        .filter(|(cluster, _)| !excluded.contains(cluster))
        .enumerate()
    {
        tally
            .entry(install.version.as_str())
            .and_modify(|(n, _)| *n += 1)
            .or_insert((1, pos));
    }

    tally
        .into_iter()
        .max_by(|(_, (n_a, first_a)), (_, (n_b, first_b))| {
            n_a.cmp(n_b).then(first_b.cmp(first_a))
        })
        .map(|(version, _)| version.to_string())
}

pub fn classify(version: &str, consensus: &str) -> Drift {
    if version == consensus {
        Drift::Match
    } else {
        Drift::Mismatch
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedInstallation {
    pub cluster: String,
    pub version: String,
    pub drift: Drift,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorDrift {
    pub name: String,
    pub display_name: String,
    pub consensus: Option<String>,
    pub installations: Vec<ClassifiedInstallation>,
    pub drifted: Vec<String>,
}

pub fn operator_drift(op: &OperatorRecord, excluded: &HashSet<&str>) -> OperatorDrift {
    let consensus = consensus(op, excluded);
    let installations: Vec<ClassifiedInstallation> = match consensus.as_deref() {
        Some(c) => op
            .installations
            .iter()
            .filter(|(cluster, _)| !excluded.contains(cluster))
            .map(|(cluster, install)| ClassifiedInstallation {
                cluster: cluster.to_string(),
                version: install.version.clone(),
                drift: classify(&install.version, c),
            })
            .collect(),
        None => Vec::new(),
    };
    let drifted = installations
        .iter()
        .filter(|i| i.drift == Drift::Mismatch)
        .map(|i| i.cluster.clone())
        .collect();

    OperatorDrift {
        name: op.name.clone(),
        display_name: op.display_name.clone(),
        consensus,
        installations,
        drifted,
    }
}

pub fn drift_report(matrix: &OperatorMatrix) -> Vec<OperatorDrift> {
    let excluded: HashSet<&str> = matrix.uncollected().into_iter().collect();
    matrix
        .operators
        .iter()
        .map(|op| operator_drift(op, &excluded))
        .collect()
}
