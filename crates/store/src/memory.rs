//! In-RAM backend with apiserver-like revisions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use promtarget_core::{labels_match, Artifact, ConfigId, Labels, ObjectRef, ScrapeConfig, ScrapeJob};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ArtifactStore, CandidateSource, ConfigStore, StoreError, StoreOp, StoreResult};

/// Writes observed by a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounters {
    pub status: u64,
    pub creates: u64,
    pub updates: u64,
}

#[derive(Default)]
struct State {
    configs: FxHashMap<ConfigId, ScrapeConfig>,
    // ordered so listings are deterministic
    jobs: BTreeMap<ObjectRef, ScrapeJob>,
    artifacts: FxHashMap<ObjectRef, Artifact>,
    revision: u64,
    writes: WriteCounters,
    faults: FxHashSet<StoreOp>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn take_fault(&mut self, op: StoreOp) -> StoreResult<()> {
        if self.faults.remove(&op) {
            return Err(StoreError::Backend(format!("injected failure on {}", op)));
        }
        Ok(())
    }
}

/// Config, job and artifact store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_config(&self, config: ScrapeConfig) {
        let mut st = self.state.lock().await;
        st.configs.insert(config.id.clone(), config);
    }

    pub async fn remove_config(&self, id: &ConfigId) -> Option<ScrapeConfig> {
        self.state.lock().await.configs.remove(id)
    }

    pub async fn config(&self, id: &ConfigId) -> Option<ScrapeConfig> {
        self.state.lock().await.configs.get(id).cloned()
    }

    pub async fn put_job(&self, job: ScrapeJob) {
        let mut st = self.state.lock().await;
        st.jobs.insert(job.id.clone(), job);
    }

    pub async fn remove_job(&self, id: &ObjectRef) -> Option<ScrapeJob> {
        self.state.lock().await.jobs.remove(id)
    }

    /// Seed or overwrite an artifact out of band; assigns a fresh revision.
    pub async fn put_artifact(&self, secret: ObjectRef, mut artifact: Artifact) {
        let mut st = self.state.lock().await;
        artifact.revision = Some(st.next_revision());
        st.artifacts.insert(secret, artifact);
    }

    pub async fn artifact(&self, secret: &ObjectRef) -> Option<Artifact> {
        self.state.lock().await.artifacts.get(secret).cloned()
    }

    pub async fn writes(&self) -> WriteCounters {
        self.state.lock().await.writes
    }

    /// Make the next call of `op` fail with a backend error.
    pub async fn fail_next(&self, op: StoreOp) {
        self.state.lock().await.faults.insert(op);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config(&self, id: &ConfigId) -> StoreResult<Option<ScrapeConfig>> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::GetConfig)?;
        Ok(st.configs.get(id).cloned())
    }

    async fn update_status(&self, id: &ConfigId, discovered: &[String]) -> StoreResult<()> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::UpdateStatus)?;
        let cfg = st.configs.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        cfg.discovered = discovered.to_vec();
        st.writes.status += 1;
        debug!(config = %id, count = discovered.len(), "status stored");
        Ok(())
    }
}

#[async_trait]
impl CandidateSource for MemoryStore {
    async fn list_candidates(&self, filter: &Labels) -> StoreResult<Vec<ScrapeJob>> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::ListCandidates)?;
        Ok(st.jobs.values().filter(|j| labels_match(filter, &j.labels)).cloned().collect())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get_artifact(&self, secret: &ObjectRef) -> StoreResult<Option<Artifact>> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::GetArtifact)?;
        Ok(st.artifacts.get(secret).cloned())
    }

    async fn create_artifact(&self, secret: &ObjectRef, artifact: &Artifact) -> StoreResult<()> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::CreateArtifact)?;
        if st.artifacts.contains_key(secret) {
            return Err(StoreError::Conflict(format!("{} already exists", secret)));
        }
        let mut stored = artifact.clone();
        stored.revision = Some(st.next_revision());
        st.artifacts.insert(secret.clone(), stored);
        st.writes.creates += 1;
        Ok(())
    }

    async fn update_artifact(&self, secret: &ObjectRef, artifact: &Artifact) -> StoreResult<()> {
        let mut st = self.state.lock().await;
        st.take_fault(StoreOp::UpdateArtifact)?;
        let current = st.artifacts.get(secret).ok_or_else(|| StoreError::NotFound(secret.to_string()))?;
        if let Some(rv) = artifact.revision.as_deref() {
            if current.revision.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{} changed (revision {} -> {})",
                    secret,
                    rv,
                    current.revision.as_deref().unwrap_or("-")
                )));
            }
        }
        let mut stored = artifact.clone();
        stored.revision = Some(st.next_revision());
        st.artifacts.insert(secret.clone(), stored);
        st.writes.updates += 1;
        Ok(())
    }
}
