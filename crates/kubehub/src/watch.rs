//! Watchers turning object changes into config ids for the reconcile queue.
//!
//! Configs trigger themselves and rebuild the shared [`Index`]; Secrets and
//! ScrapeJobs are mapped through it.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Client, ResourceExt,
};
use metrics::counter;
use promtarget_core::{ConfigId, Labels, ObjectRef, ScrapeConfig};
use promtarget_index::{Index, SharedIndex};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{scoped_api, AdditionalScrapeConfig, ScrapeJob};

/// Remembers the last labels seen per job so that a job moving out of a
/// config's filter still triggers that config.
#[derive(Default)]
pub struct JobTracker {
    seen: FxHashMap<ObjectRef, Labels>,
}

impl JobTracker {
    pub fn applied(&mut self, index: &Index, id: ObjectRef, labels: Labels) -> BTreeSet<ConfigId> {
        let mut affected: BTreeSet<ConfigId> = index.configs_for_candidate(&id.namespace, &labels).into_iter().collect();
        if let Some(old) = self.seen.get(&id) {
            if *old != labels {
                affected.extend(index.configs_for_candidate(&id.namespace, old));
            }
        }
        self.seen.insert(id, labels);
        affected
    }

    pub fn deleted(&mut self, index: &Index, id: &ObjectRef, labels: &Labels) -> BTreeSet<ConfigId> {
        let mut affected: BTreeSet<ConfigId> = index.configs_for_candidate(&id.namespace, labels).into_iter().collect();
        if let Some(old) = self.seen.remove(id) {
            affected.extend(index.configs_for_candidate(&id.namespace, &old));
        }
        affected
    }

    /// Full relist: everything listed plus everything that vanished.
    pub fn restarted(&mut self, index: &Index, jobs: Vec<(ObjectRef, Labels)>) -> BTreeSet<ConfigId> {
        let mut previous = std::mem::take(&mut self.seen);
        let mut affected = BTreeSet::new();
        for (id, labels) in jobs {
            if let Some(old) = previous.remove(&id) {
                if old != labels {
                    affected.extend(index.configs_for_candidate(&id.namespace, &old));
                }
            }
            affected.extend(index.configs_for_candidate(&id.namespace, &labels));
            self.seen.insert(id, labels);
        }
        for (id, old) in previous {
            affected.extend(index.configs_for_candidate(&id.namespace, &old));
        }
        affected
    }
}

fn object_ref<K: ResourceExt>(obj: &K) -> ObjectRef {
    ObjectRef::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

async fn send_all<I>(tx: &mpsc::Sender<ConfigId>, ids: I, source: &'static str) -> Result<()>
where
    I: IntoIterator<Item = ConfigId>,
{
    for id in ids {
        debug!(config = %id, source, "trigger");
        counter!("trigger_sent_total", 1u64);
        tx.send(id).await.map_err(|_| anyhow!("trigger channel closed"))?;
    }
    Ok(())
}

fn watch_stream<K>(client: Client, namespace: Option<&str>) -> impl Stream<Item = Result<watcher::Event<K>, watcher::Error>>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + Debug
        + serde::de::DeserializeOwned
        + Send
        + 'static,
    <K as kube::Resource>::DynamicType: Default,
{
    watcher::watcher(scoped_api::<K>(client, namespace), watcher::Config::default()).default_backoff()
}

async fn watch_configs(client: Client, namespace: Option<String>, index: Arc<SharedIndex>, tx: mpsc::Sender<ConfigId>) -> Result<()> {
    let mut cache: FxHashMap<ConfigId, ScrapeConfig> = FxHashMap::default();
    let stream = watch_stream::<AdditionalScrapeConfig>(client, namespace.as_deref());
    futures::pin_mut!(stream);
    info!(ns = ?namespace, "config watcher started");
    while let Some(ev) = stream.next().await {
        let ev = match ev {
            Ok(ev) => ev,
            Err(e) => { warn!(error = %e, "config watch error"); continue; }
        };
        let triggered: Vec<ConfigId> = match ev {
            watcher::Event::Applied(obj) => {
                let cfg = ScrapeConfig::from(&obj);
                let id = cfg.id.clone();
                cache.insert(id.clone(), cfg);
                vec![id]
            }
            watcher::Event::Deleted(obj) => {
                let id = object_ref(&obj);
                cache.remove(&id);
                debug!(config = %id, "config deleted");
                Vec::new()
            }
            watcher::Event::Restarted(list) => {
                cache = list.iter().map(|o| { let c = ScrapeConfig::from(o); (c.id.clone(), c) }).collect();
                debug!(count = cache.len(), "config watch restart");
                let mut ids: Vec<_> = cache.keys().cloned().collect();
                ids.sort();
                ids
            }
        };
        index.publish(Index::build(cache.values()));
        send_all(&tx, triggered, "config").await?;
    }
    warn!("config watcher stream ended");
    Ok(())
}

async fn watch_secrets(client: Client, namespace: Option<String>, index: Arc<SharedIndex>, tx: mpsc::Sender<ConfigId>) -> Result<()> {
    let stream = watch_stream::<Secret>(client, namespace.as_deref());
    futures::pin_mut!(stream);
    info!(ns = ?namespace, "secret watcher started");
    while let Some(ev) = stream.next().await {
        let ev = match ev {
            Ok(ev) => ev,
            Err(e) => { warn!(error = %e, "secret watch error"); continue; }
        };
        let idx = index.load();
        let affected: BTreeSet<ConfigId> = match ev {
            watcher::Event::Applied(s) | watcher::Event::Deleted(s) => idx.configs_for_artifact(&object_ref(&s)).into_iter().collect(),
            watcher::Event::Restarted(list) => list.iter().flat_map(|s| idx.configs_for_artifact(&object_ref(s))).collect(),
        };
        send_all(&tx, affected, "secret").await?;
    }
    warn!("secret watcher stream ended");
    Ok(())
}

async fn watch_jobs(client: Client, namespace: Option<String>, index: Arc<SharedIndex>, tx: mpsc::Sender<ConfigId>) -> Result<()> {
    let mut tracker = JobTracker::default();
    let stream = watch_stream::<ScrapeJob>(client, namespace.as_deref());
    futures::pin_mut!(stream);
    info!(ns = ?namespace, "scrape job watcher started");
    while let Some(ev) = stream.next().await {
        let ev = match ev {
            Ok(ev) => ev,
            Err(e) => { warn!(error = %e, "scrape job watch error"); continue; }
        };
        let idx = index.load();
        let affected = match ev {
            watcher::Event::Applied(job) => tracker.applied(&idx, object_ref(&job), job.labels().clone()),
            watcher::Event::Deleted(job) => tracker.deleted(&idx, &object_ref(&job), job.labels()),
            watcher::Event::Restarted(list) => {
                debug!(count = list.len(), "scrape job watch restart");
                tracker.restarted(&idx, list.iter().map(|j| (object_ref(j), j.labels().clone())).collect())
            }
        };
        send_all(&tx, affected, "scrape_job").await?;
    }
    warn!("scrape job watcher stream ended");
    Ok(())
}

/// Run all three watchers until one fails or the trigger channel closes.
pub async fn run_watchers(client: Client, namespace: Option<String>, tx: mpsc::Sender<ConfigId>) -> Result<()> {
    let index = Arc::new(SharedIndex::new());
    tokio::try_join!(
        watch_configs(client.clone(), namespace.clone(), Arc::clone(&index), tx.clone()),
        watch_secrets(client.clone(), namespace.clone(), Arc::clone(&index), tx.clone()),
        watch_jobs(client, namespace, index, tx),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use promtarget_core::{ArtifactRef, NamespaceSelector};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn index() -> Index {
        let cfg = |name: &str, value: &str| ScrapeConfig {
            id: ObjectRef::new("monitoring", name),
            artifact: ArtifactRef { secret: ObjectRef::new("monitoring", "scrape"), key: name.into() },
            label_filter: labels(&[("target", value)]),
            namespace_selector: NamespaceSelector::any(),
            discovered: vec![],
        };
        Index::build(&[cfg("blue", "blue"), cfg("green", "green")])
    }

    #[test]
    fn relabel_triggers_old_and_new_config() {
        let idx = index();
        let mut t = JobTracker::default();
        let job = ObjectRef::new("apps", "web");
        let first = t.applied(&idx, job.clone(), labels(&[("target", "blue")]));
        assert_eq!(first.into_iter().collect::<Vec<_>>(), vec![ObjectRef::new("monitoring", "blue")]);

        let moved = t.applied(&idx, job, labels(&[("target", "green")]));
        assert_eq!(
            moved.into_iter().collect::<Vec<_>>(),
            vec![ObjectRef::new("monitoring", "blue"), ObjectRef::new("monitoring", "green")]
        );
    }

    #[test]
    fn delete_uses_last_seen_labels() {
        let idx = index();
        let mut t = JobTracker::default();
        let job = ObjectRef::new("apps", "web");
        t.applied(&idx, job.clone(), labels(&[("target", "blue")]));
        let gone = t.deleted(&idx, &job, &Labels::new());
        assert_eq!(gone.into_iter().collect::<Vec<_>>(), vec![ObjectRef::new("monitoring", "blue")]);
    }

    #[test]
    fn restart_reports_vanished_jobs() {
        let idx = index();
        let mut t = JobTracker::default();
        t.applied(&idx, ObjectRef::new("apps", "a"), labels(&[("target", "blue")]));
        t.applied(&idx, ObjectRef::new("apps", "b"), labels(&[("target", "green")]));
        // b disappeared while the watch was down
        let affected = t.restarted(&idx, vec![(ObjectRef::new("apps", "a"), labels(&[("target", "blue")]))]);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            vec![ObjectRef::new("monitoring", "blue"), ObjectRef::new("monitoring", "green")]
        );
    }

    #[test]
    fn unrelated_labels_trigger_nothing() {
        let idx = index();
        let mut t = JobTracker::default();
        assert!(t.applied(&idx, ObjectRef::new("apps", "x"), labels(&[("target", "red")])).is_empty());
    }
}
