//! promtarget core: the scrape-job model and the pure half of reconciliation.
//!
//! Everything here is synchronous and side-effect free. Given a [`ScrapeConfig`] and
//! an already label-filtered candidate set, [`select::aggregate`] picks the jobs in
//! scope, [`render::render`] turns them into canonical bytes and [`plan::plan`] diffs
//! the result against stored state.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod plan;
pub mod prometheus;
pub mod render;
pub mod select;

pub use plan::{plan, ArtifactWrite, Plan, WriteMode};
pub use prometheus::{project, Job, StaticConfig};
pub use render::{render, RenderError};
pub use select::{aggregate, NamespaceSelector, Selection};

/// Label mapping. Ordered so that serialized output is byte-stable.
pub type Labels = BTreeMap<String, String>;

/// Namespaced object identity, displayed as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

/// Identity of a [`ScrapeConfig`]; the unit of reconciliation.
pub type ConfigId = ObjectRef;

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object reference {0:?} (expect namespace/name)")]
pub struct ParseRefError(pub String);

impl FromStr for ObjectRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ParseRefError(s.to_string())),
        }
    }
}

/// Where the rendered document is published: a key inside a shared Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub secret: ObjectRef,
    pub key: String,
}

/// A scrape configuration as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub id: ConfigId,
    pub artifact: ArtifactRef,
    /// Candidate jobs must carry all of these labels. Empty means no filter.
    pub label_filter: Labels,
    pub namespace_selector: NamespaceSelector,
    /// Observed state: `namespace/name` of every job last published.
    pub discovered: Vec<String>,
}

/// A declared scrape job (candidate for inclusion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: ObjectRef,
    /// Object labels; matched against [`ScrapeConfig::label_filter`] upstream.
    pub labels: Labels,
    pub job_name: String,
    pub static_configs: Vec<TargetGroup>,
}

/// One static-target block of a [`ScrapeJob`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: Labels,
}

/// Contents of a shared artifact. Keys other than the config's own are owned by
/// other writers and must round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub data: BTreeMap<String, Vec<u8>>,
    /// Opaque store revision used for optimistic concurrency on update.
    pub revision: Option<String>,
}

impl Artifact {
    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }
}

/// Returns true when `labels` carries every pair of `filter`. An empty filter
/// matches everything.
pub fn labels_match(filter: &Labels, labels: &Labels) -> bool {
    filter.iter().all(|(k, v)| labels.get(k) == Some(v))
}

pub mod prelude {
    pub use super::{
        aggregate, plan, render, Artifact, ArtifactRef, ArtifactWrite, ConfigId, Job, Labels,
        NamespaceSelector, ObjectRef, Plan, ScrapeConfig, ScrapeJob, Selection, StaticConfig,
        TargetGroup, WriteMode,
    };
}
