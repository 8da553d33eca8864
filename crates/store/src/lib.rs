//! promtarget store: the read/write surface the reconciler talks to.
//!
//! Three narrow traits cover configs, candidate jobs and artifacts. A Kubernetes
//! implementation lives in `promtarget-kubehub`; [`MemoryStore`] here backs tests
//! and the offline `render` command.

#![forbid(unsafe_code)]

use std::fmt;

use async_trait::async_trait;
use promtarget_core::{Artifact, ConfigId, Labels, ObjectRef, ScrapeConfig, ScrapeJob};

mod memory;

pub use memory::{MemoryStore, WriteCounters};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(e: impl fmt::Display) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store operations, used to label errors and inject faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetConfig,
    UpdateStatus,
    ListCandidates,
    GetArtifact,
    CreateArtifact,
    UpdateArtifact,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreOp::GetConfig => "get_config",
            StoreOp::UpdateStatus => "update_status",
            StoreOp::ListCandidates => "list_candidates",
            StoreOp::GetArtifact => "get_artifact",
            StoreOp::CreateArtifact => "create_artifact",
            StoreOp::UpdateArtifact => "update_artifact",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when the config does not exist.
    async fn get_config(&self, id: &ConfigId) -> StoreResult<Option<ScrapeConfig>>;

    /// Replace the config's observed discovered list.
    async fn update_status(&self, id: &ConfigId, discovered: &[String]) -> StoreResult<()>;
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Jobs carrying every pair of `filter` (all jobs for an empty filter), from
    /// every namespace.
    async fn list_candidates(&self, filter: &Labels) -> StoreResult<Vec<ScrapeJob>>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// `Ok(None)` when the artifact does not exist; that is not an error.
    async fn get_artifact(&self, secret: &ObjectRef) -> StoreResult<Option<Artifact>>;

    async fn create_artifact(&self, secret: &ObjectRef, artifact: &Artifact) -> StoreResult<()>;

    /// Replace the whole mapping. A `Some` revision must match the stored one.
    async fn update_artifact(&self, secret: &ObjectRef, artifact: &Artifact) -> StoreResult<()>;
}

/// Everything a reconciler needs from one place.
pub trait Backend: ConfigStore + CandidateSource + ArtifactStore {}

impl<T: ConfigStore + CandidateSource + ArtifactStore> Backend for T {}
