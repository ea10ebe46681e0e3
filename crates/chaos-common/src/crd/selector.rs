//! Selector specs embedded in experiment specs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Selector key used by kinds with a single selector
pub const DEFAULT_SELECTOR_KEY: &str = ".";

/// Selector key of NetworkChaos' optional target selector
pub const NETWORK_TARGET_SELECTOR_KEY: &str = "Target";

/// Label selector requirement (`key operator values`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    /// Label key
    pub key: String,
    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: String,
    /// Values for In and NotIn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Filters over pods
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSelectorSpec {
    /// Namespaces to scan; `!ns` excludes a namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Label equality requirements
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selectors: BTreeMap<String, String>,
    /// Label set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression_selectors: Vec<SelectorRequirement>,
    /// Annotation equality requirements
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotation_selectors: BTreeMap<String, String>,
    /// Field equality requirements (e.g. `metadata.name`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_selectors: BTreeMap<String, String>,
    /// Explicit pods, namespace to names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pods: BTreeMap<String, Vec<String>>,
    /// Node names the pods must be scheduled on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    /// Node labels the pods' nodes must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selectors: BTreeMap<String, String>,
    /// Pod phases; `!Phase` excludes a phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_phase_selectors: Vec<String>,
}

impl PodSelectorSpec {
    /// Whether the selector may match pods in any namespace
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespaces.is_empty() && self.pods.is_empty()
    }

    /// Namespaces the selector may touch, sorted, for authorization checks.
    ///
    /// Meaningless when [`is_cluster_scoped`](Self::is_cluster_scoped) is true.
    pub fn affected_namespaces(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .namespaces
            .iter()
            .filter(|ns| !ns.starts_with('!'))
            .chain(self.pods.keys())
            .collect();
        set.into_iter().cloned().collect()
    }
}

/// Pod filters plus a cardinality mode
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    /// Filters
    #[serde(default)]
    pub selector: PodSelectorSpec,
    /// one, all, fixed, fixed-percent or random-max-percent
    pub mode: String,
    /// Count or percentage for the fixed and percent modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Pod selector narrowed to named containers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSelector {
    /// Pods to target
    #[serde(flatten)]
    pub pod: PodSelector,
    /// Containers within each pod; empty means every container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,
}

/// `name -> values` filter evaluated by a cloud API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CloudFilter {
    /// Filter name (e.g. `tag:app`)
    pub name: String,
    /// Accepted values
    pub values: Vec<String>,
}

/// Cloud vendor a cloud selector talks to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon EC2
    Aws,
    /// Google Compute Engine
    Gcp,
}

/// Cloud instance selector, built from an AWS or GCP experiment spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudSelector {
    /// Vendor
    pub provider: CloudProvider,
    /// Region (AWS) or zone (GCP)
    pub region: String,
    /// Project (GCP only)
    pub project: Option<String>,
    /// Secret holding API credentials, in the experiment's namespace
    pub secret_name: Option<String>,
    /// Explicit instance ids
    pub instances: Vec<String>,
    /// Filters resolved by the cloud API
    pub filters: Vec<CloudFilter>,
    /// Cardinality mode
    pub mode: String,
    /// Mode value
    pub value: Option<String>,
}

/// Every shape of selector an experiment can carry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectorSpec {
    /// Whole pods, ids `ns/name`
    Pod(PodSelector),
    /// Containers, ids `ns/name/container`
    Container(ContainerSelector),
    /// Cloud instances, ids are JSON blobs
    Cloud(CloudSelector),
}

impl SelectorSpec {
    /// Mode string and value of whichever selector this is
    pub fn mode(&self) -> (&str, Option<&str>) {
        match self {
            Self::Pod(p) => (&p.mode, p.value.as_deref()),
            Self::Container(c) => (&c.pod.mode, c.pod.value.as_deref()),
            Self::Cloud(c) => (&c.mode, c.value.as_deref()),
        }
    }
}

/// Cardinality mode after validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorMode {
    /// Exactly one target
    One,
    /// Every candidate
    All,
    /// The first N candidates; fewer is an error
    Fixed(usize),
    /// The first floor(len * P / 100) candidates
    FixedPercent(u8),
    /// Each candidate independently with probability P / 100
    RandomMaxPercent(u8),
}

impl SelectorMode {
    /// Parse the `mode` / `value` pair of a selector
    pub fn parse(mode: &str, value: Option<&str>) -> Result<Self, Error> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match mode {
            "one" => Ok(Self::One),
            "all" => Ok(Self::All),
            "fixed" => {
                let raw = value.ok_or_else(|| Error::validation("mode fixed needs a value"))?;
                let n: usize = raw.parse().map_err(|_| {
                    Error::validation(format!("mode fixed needs a positive count, got {raw:?}"))
                })?;
                if n == 0 {
                    return Err(Error::validation("mode fixed needs a positive count, got 0"));
                }
                Ok(Self::Fixed(n))
            }
            "fixed-percent" => Ok(Self::FixedPercent(parse_percent(mode, value)?)),
            "random-max-percent" => Ok(Self::RandomMaxPercent(parse_percent(mode, value)?)),
            other => Err(Error::validation(format!("unknown selector mode {other:?}"))),
        }
    }

    /// Whether an empty candidate set is an error under this mode
    pub fn requires_candidates(&self) -> bool {
        !matches!(self, Self::RandomMaxPercent(_))
    }
}

fn parse_percent(mode: &str, value: Option<&str>) -> Result<u8, Error> {
    let raw = value.ok_or_else(|| Error::validation(format!("mode {mode} needs a value")))?;
    let pct: u8 = raw
        .parse()
        .map_err(|_| Error::validation(format!("mode {mode} needs a percentage, got {raw:?}")))?;
    if pct > 100 {
        return Err(Error::validation(format!(
            "mode {mode} needs a percentage between 0 and 100, got {pct}"
        )));
    }
    Ok(pct)
}

impl fmt::Display for SelectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "one"),
            Self::All => write!(f, "all"),
            Self::Fixed(n) => write!(f, "fixed:{n}"),
            Self::FixedPercent(p) => write!(f, "fixed-percent:{p}"),
            Self::RandomMaxPercent(p) => write!(f, "random-max-percent:{p}"),
        }
    }
}
