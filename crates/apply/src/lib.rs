//! promtarget apply: reconcile one config against its stores.
//!
//! A [`Reconciler`] keeps no state between calls. Every invocation re-reads the
//! config, its candidate jobs and the artifact, re-derives the desired output and
//! writes only what differs, so duplicate or reordered triggers are harmless.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use promtarget_core::{aggregate, plan, render, ConfigId, RenderError, Selection, WriteMode};
use promtarget_store::{Backend, StoreError, StoreOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

pub mod queue;

pub use queue::{spawn_worker, Coalescer};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("config {0} not found")]
    ConfigNotFound(ConfigId),
    #[error("{op} failed: {source}")]
    Store { op: StoreOp, source: StoreError },
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ReconcileError {
    /// The config is gone; nothing to retry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::ConfigNotFound(_))
    }
}

fn store_err(op: StoreOp) -> impl FnOnce(StoreError) -> ReconcileError {
    move |source| ReconcileError::Store { op, source }
}

/// What one reconcile did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub config: ConfigId,
    pub discovered: Vec<String>,
    pub status_written: bool,
    pub artifact_write: Option<WriteMode>,
    pub payload_bytes: usize,
}

impl Outcome {
    pub fn wrote_anything(&self) -> bool {
        self.status_written || self.artifact_write.is_some()
    }
}

/// Drives configs toward their desired state.
///
/// Callers must not run two reconciles for the same config at once; the single
/// worker in [`queue`] guarantees that. Status is written before the artifact and
/// the first failing write aborts the run without undoing earlier ones.
pub struct Reconciler<B> {
    backend: Arc<B>,
}

impl<B> Clone for Reconciler<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: Backend> Reconciler<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub async fn reconcile(&self, id: &ConfigId) -> Result<Outcome, ReconcileError> {
        let t0 = Instant::now();
        counter!("reconcile_total", 1u64);
        let run = Uuid::new_v4();
        let span = info_span!("reconcile", config = %id, run = %run);
        let res = self.run(id).instrument(span).await;
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        if res.is_err() {
            counter!("reconcile_errors_total", 1u64);
        }
        res
    }

    async fn run(&self, id: &ConfigId) -> Result<Outcome, ReconcileError> {
        info!("reconciling");
        let config = self
            .backend
            .get_config(id)
            .await
            .map_err(store_err(StoreOp::GetConfig))?
            .ok_or_else(|| ReconcileError::ConfigNotFound(id.clone()))?;

        let candidates = self
            .backend
            .list_candidates(&config.label_filter)
            .await
            .map_err(store_err(StoreOp::ListCandidates))?;
        info!(candidates = candidates.len(), "loaded scrape jobs matching the labels");

        let Selection { discovered, jobs } = aggregate(&config, &candidates);
        let payload = render(jobs).map_err(|e| {
            error!(error = %e, "rendering scrape jobs failed");
            e
        })?;
        let payload_bytes = payload.len();

        let current = self
            .backend
            .get_artifact(&config.artifact.secret)
            .await
            .map_err(store_err(StoreOp::GetArtifact))?;

        let plan = plan(discovered.clone(), payload, &config.artifact.key, &config.discovered, current);
        let mut outcome = Outcome {
            config: id.clone(),
            discovered,
            status_written: false,
            artifact_write: None,
            payload_bytes,
        };

        match &plan.status {
            Some(names) => {
                self.backend.update_status(id, names).await.map_err(store_err(StoreOp::UpdateStatus))?;
                counter!("status_writes_total", 1u64);
                info!(discovered = names.len(), "status updated");
                outcome.status_written = true;
            }
            None => debug!("status up to date"),
        }

        match plan.artifact {
            Some(write) => {
                let secret = &config.artifact.secret;
                match write.mode {
                    WriteMode::Create => {
                        self.backend
                            .create_artifact(secret, &write.artifact)
                            .await
                            .map_err(store_err(StoreOp::CreateArtifact))?;
                        counter!("artifact_creates_total", 1u64);
                    }
                    WriteMode::Update => {
                        self.backend
                            .update_artifact(secret, &write.artifact)
                            .await
                            .map_err(store_err(StoreOp::UpdateArtifact))?;
                        counter!("artifact_updates_total", 1u64);
                    }
                }
                info!(secret = %secret, key = %config.artifact.key, mode = ?write.mode, bytes = payload_bytes, "artifact written");
                outcome.artifact_write = Some(write.mode);
            }
            None => debug!("artifact up to date"),
        }

        Ok(outcome)
    }
}
