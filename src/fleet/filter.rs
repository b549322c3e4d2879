use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::models::fleet::{ClusterRecord, Datacenter, Environment};
use crate::models::operators::{MatrixCluster, OperatorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Env(Environment),
    Dc(Datacenter),
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(env) = Environment::classify(s) {
            return Ok(Tag::Env(env));
        }
        if let Some(dc) = Datacenter::classify(s) {
            return Ok(Tag::Dc(dc));
        }
        Err(format!("unknown filter tag {:?}", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub tags: HashSet<Tag>,
    pub search: String,
}

impl FilterState {
    /// Builds a filter from a comma separated tag list and a search term.
    /// Tokens that are not known tags are dropped.
    pub fn parse(tags: &str, search: &str) -> Self {
        let tags = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|t| match t.parse::<Tag>() {
                Ok(tag) => Some(tag),
                Err(e) => {
                    tracing::debug!("ignoring filter token: {}", e);
                    None
                }
            })
            .collect();
        Self {
            tags,
            search: search.to_string(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_search(mut self, search: &str) -> Self {
        self.search = search.to_string();
        self
    }

    fn environments(&self) -> HashSet<Environment> {
        self.tags
            .iter()
            .filter_map(|t| match t {
                Tag::Env(e) => Some(*e),
                Tag::Dc(_) => None,
            })
            .collect()
    }

    fn datacenters(&self) -> HashSet<Datacenter> {
        self.tags
            .iter()
            .filter_map(|t| match t {
                Tag::Dc(d) => Some(*d),
                Tag::Env(_) => None,
            })
            .collect()
    }
}

/// Anything that occupies a cluster column: inventory rows and matrix headers.
pub trait FleetMember {
    fn member_name(&self) -> &str;
    fn environment(&self) -> Option<&str>;
    fn datacenter(&self) -> Option<&str>;

    fn environment_tag(&self) -> Option<Environment> {
        self.environment().and_then(Environment::classify)
    }

    fn datacenter_tag(&self) -> Option<Datacenter> {
        self.datacenter().and_then(Datacenter::classify)
    }
}

impl FleetMember for ClusterRecord {
    fn member_name(&self) -> &str {
        &self.name
    }
    fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }
    fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }
}

impl FleetMember for MatrixCluster {
    fn member_name(&self) -> &str {
        &self.name
    }
    fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }
    fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// No search term; tags alone decide.
    Inactive,
    MatchedOperators,
    MatchedClusters,
    /// The term matched nothing. Operators are intentionally empty.
    NoMatch,
}

#[derive(Debug)]
pub struct Visible<'a, C> {
    pub clusters: Vec<&'a C>,
    pub operators: Vec<&'a OperatorRecord>,
    pub search: SearchOutcome,
}

fn tag_visible<C: FleetMember>(
    member: &C,
    envs: &HashSet<Environment>,
    dcs: &HashSet<Datacenter>,
) -> bool {
    let env_ok = envs.is_empty() || member.environment_tag().is_some_and(|e| envs.contains(&e));
    let dc_ok = dcs.is_empty() || member.datacenter_tag().is_some_and(|d| dcs.contains(&d));
    env_ok && dc_ok
}

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

fn operator_matches(op: &OperatorRecord, term: &str) -> bool {
    contains(Some(&op.display_name), term) || contains(Some(&op.name), term)
}

fn cluster_matches<C: FleetMember>(c: &C, term: &str) -> bool {
    contains(Some(c.member_name()), term)
        || contains(c.datacenter(), term)
        || contains(c.environment(), term)
}

/// Members left after the active tags, ignoring the search term.
pub fn tagged<'a, C: FleetMember>(clusters: &'a [C], filter: &FilterState) -> Vec<&'a C> {
    let envs = filter.environments();
    let dcs = filter.datacenters();
    clusters
        .iter()
        .filter(|c| tag_visible(*c, &envs, &dcs))
        .collect()
}

pub fn resolve<'a, C: FleetMember>(
    clusters: &'a [C],
    operators: &'a [OperatorRecord],
    filter: &FilterState,
) -> Visible<'a, C> {
    let tagged = tagged(clusters, filter);

    let term = filter.search.trim().to_lowercase();
    if term.is_empty() {
        return Visible {
            clusters: tagged,
            operators: operators.iter().collect(),
            search: SearchOutcome::Inactive,
        };
    }

    let op_hits: Vec<&OperatorRecord> = operators
        .iter()
        .filter(|op| operator_matches(op, &term))
        .collect();
    if !op_hits.is_empty() {
        return Visible {
            clusters: tagged,
            operators: op_hits,
            search: SearchOutcome::MatchedOperators,
        };
    }

    let cluster_hits: Vec<&C> = tagged
        .iter()
        .copied()
        .filter(|c| cluster_matches(*c, &term))
        .collect();
    if !cluster_hits.is_empty() {
        return Visible {
            clusters: cluster_hits,
            operators: operators.iter().collect(),
            search: SearchOutcome::MatchedClusters,
        };
    }

    Visible {
        clusters: tagged,
        operators: Vec::new(),
        search: SearchOutcome::NoMatch,
    }
}
