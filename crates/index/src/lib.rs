//! promtarget index: map object changes back to the configs that must re-run.
//!
//! Built from the current set of configs and swapped wholesale when that set
//! changes; lookups never block the watcher that publishes a new one.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use promtarget_core::{labels_match, ConfigId, Labels, NamespaceSelector, ObjectRef, ScrapeConfig};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

struct Entry {
    id: ConfigId,
    filter: Labels,
    selector: NamespaceSelector,
}

/// Immutable lookup tables over a set of configs.
#[derive(Default)]
pub struct Index {
    by_artifact: FxHashMap<ObjectRef, SmallVec<[ConfigId; 2]>>,
    entries: Vec<Entry>,
}

impl Index {
    pub fn build<'a, I>(configs: I) -> Self
    where
        I: IntoIterator<Item = &'a ScrapeConfig>,
    {
        let mut idx = Index::default();
        for cfg in configs {
            idx.by_artifact.entry(cfg.artifact.secret.clone()).or_default().push(cfg.id.clone());
            idx.entries.push(Entry {
                id: cfg.id.clone(),
                filter: cfg.label_filter.clone(),
                selector: cfg.namespace_selector.clone(),
            });
        }
        idx.entries.sort_by(|a, b| a.id.cmp(&b.id));
        for ids in idx.by_artifact.values_mut() {
            ids.sort();
            ids.dedup();
        }
        debug!(configs = idx.entries.len(), artifacts = idx.by_artifact.len(), "index built");
        idx
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Configs publishing into `secret`, sorted.
    pub fn configs_for_artifact(&self, secret: &ObjectRef) -> Vec<ConfigId> {
        self.by_artifact.get(secret).map(|ids| ids.to_vec()).unwrap_or_default()
    }

    /// Configs that would select a job living in `namespace` carrying `labels`,
    /// sorted. Every filter pair must match; an empty filter matches any job.
    pub fn configs_for_candidate(&self, namespace: &str, labels: &Labels) -> Vec<ConfigId> {
        self.entries
            .iter()
            .filter(|e| e.selector.matches(namespace, &e.id.namespace))
            .filter(|e| labels_match(&e.filter, labels))
            .map(|e| e.id.clone())
            .collect()
    }
}

/// Index handle shared between the watchers that read and the one that rebuilds.
pub struct SharedIndex {
    current: ArcSwap<Index>,
}

impl Default for SharedIndex {
    fn default() -> Self { Self::new() }
}

impl SharedIndex {
    pub fn new() -> Self {
        Self { current: ArcSwap::from_pointee(Index::default()) }
    }

    pub fn load(&self) -> Arc<Index> { self.current.load_full() }

    pub fn publish(&self, next: Index) {
        self.current.store(Arc::new(next));
    }
}
