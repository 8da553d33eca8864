//! promtarget kubehub: Kubernetes-backed stores and watcher wiring.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
use promtarget_core as model;
use promtarget_store::{ArtifactStore, CandidateSource, ConfigStore, StoreError, StoreResult};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

pub mod crd;
pub mod manifest;
pub mod watch;

pub use crd::{AdditionalScrapeConfig, ScrapeJob};
pub use watch::run_watchers;

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared client from kubeconfig or the in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .context("building kube client")?;
    Ok(client.clone())
}

/// `Api` over all namespaces, or one when `namespace` is set.
pub(crate) fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub(crate) fn map_kube_err(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message),
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message),
        other => StoreError::backend(other),
    }
}

/// Label selector string for a filter: `k=v` pairs in key order.
pub fn label_selector(filter: &model::Labels) -> String {
    filter.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

/// Stores backed by the apiserver: configs and jobs as custom resources,
/// artifacts as Secrets.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    /// Restricts candidate listing to one namespace.
    namespace: Option<String>,
}

impl KubeBackend {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    pub async fn try_default(namespace: Option<String>) -> Result<Self> {
        Ok(Self::new(get_kube_client().await?, namespace))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn configs(&self, namespace: &str) -> Api<AdditionalScrapeConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConfigStore for KubeBackend {
    async fn get_config(&self, id: &model::ConfigId) -> StoreResult<Option<model::ScrapeConfig>> {
        let found = self.configs(&id.namespace).get_opt(&id.name).await.map_err(map_kube_err)?;
        Ok(found.as_ref().map(model::ScrapeConfig::from))
    }

    async fn update_status(&self, id: &model::ConfigId, discovered: &[String]) -> StoreResult<()> {
        let patch = json!({ "status": { "discoveredScrapeJobs": discovered } });
        self.configs(&id.namespace)
            .patch_status(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_err)?;
        Ok(())
    }
}

#[async_trait]
impl CandidateSource for KubeBackend {
    async fn list_candidates(&self, filter: &model::Labels) -> StoreResult<Vec<model::ScrapeJob>> {
        let api: Api<ScrapeJob> = scoped_api(self.client.clone(), self.namespace.as_deref());
        let mut lp = ListParams::default();
        if !filter.is_empty() {
            lp = lp.labels(&label_selector(filter));
        }
        let list = api.list(&lp).await.map_err(map_kube_err)?;
        debug!(count = list.items.len(), selector = ?lp.label_selector, "listed scrape jobs");
        Ok(list.items.iter().map(model::ScrapeJob::from).collect())
    }
}

#[async_trait]
impl ArtifactStore for KubeBackend {
    async fn get_artifact(&self, secret: &model::ObjectRef) -> StoreResult<Option<model::Artifact>> {
        let found = self.secrets(&secret.namespace).get_opt(&secret.name).await.map_err(map_kube_err)?;
        Ok(found.as_ref().map(crd::artifact_from_secret))
    }

    async fn create_artifact(&self, secret: &model::ObjectRef, artifact: &model::Artifact) -> StoreResult<()> {
        let obj = crd::secret_from_artifact(secret, artifact);
        self.secrets(&secret.namespace).create(&PostParams::default(), &obj).await.map_err(map_kube_err)?;
        Ok(())
    }

    /// Merge-patches `data`; the apiserver rejects the patch with 409 when the
    /// revision is stale. Labels, annotations and type of the Secret are untouched.
    async fn update_artifact(&self, secret: &model::ObjectRef, artifact: &model::Artifact) -> StoreResult<()> {
        let patch = update_patch(artifact).map_err(StoreError::backend)?;
        self.secrets(&secret.namespace)
            .patch(&secret.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_err)?;
        Ok(())
    }
}

/// A key that fails to encode is an error, never `null`: in a merge patch that
/// would delete the key.
fn update_patch(artifact: &model::Artifact) -> serde_json::Result<serde_json::Value> {
    let mut data = serde_json::Map::new();
    for (k, v) in &artifact.data {
        data.insert(k.clone(), serde_json::to_value(k8s_openapi::ByteString(v.clone()))?);
    }
    let mut patch = json!({ "data": data });
    if let Some(rv) = &artifact.revision {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    Ok(patch)
}
