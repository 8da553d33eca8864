//! Namespace selection and aggregation of candidates into the published set.

use serde::{Deserialize, Serialize};

use crate::{prometheus, Job, ScrapeConfig, ScrapeJob};

/// Namespaces a config pulls jobs from.
///
/// `any` wins over `match_names`. With neither set, only the config's own
/// namespace is in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub any: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

impl NamespaceSelector {
    pub fn any() -> Self {
        Self { any: true, match_names: Vec::new() }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { any: false, match_names: names.into_iter().map(Into::into).collect() }
    }

    pub fn matches(&self, namespace: &str, own_namespace: &str) -> bool {
        if self.any {
            return true;
        }
        if self.match_names.is_empty() {
            return namespace == own_namespace;
        }
        self.match_names.iter().any(|n| n == namespace)
    }
}

/// Jobs selected for one config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Sorted `namespace/name` of every selected candidate.
    pub discovered: Vec<String>,
    /// Projected jobs in candidate order; the renderer canonicalizes.
    pub jobs: Vec<Job>,
}

/// Apply the config's namespace selector to `candidates`.
///
/// The label filter is not re-checked here: candidates arrive already filtered by
/// the candidate source.
pub fn aggregate(config: &ScrapeConfig, candidates: &[ScrapeJob]) -> Selection {
    let mut out = Selection::default();
    for candidate in candidates {
        if !config.namespace_selector.matches(&candidate.id.namespace, &config.id.namespace) {
            continue;
        }
        out.discovered.push(candidate.id.to_string());
        out.jobs.push(prometheus::project(candidate));
    }
    out.discovered.sort();
    out
}
