//! Custom resources: `AdditionalScrapeConfig` and `ScrapeJob`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{CustomResource, ResourceExt};
use promtarget_core as model;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "prometheus-static-target.kube-stager.io";

/// Namespace assumed for manifests that omit one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "prometheus-static-target.kube-stager.io",
    version = "v1",
    kind = "AdditionalScrapeConfig",
    namespaced,
    status = "AdditionalScrapeConfigStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalScrapeConfigSpec {
    pub secret_name: String,
    pub secret_namespace: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scrape_job_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub scrape_job_namespace_selector: model::NamespaceSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalScrapeConfigStatus {
    /// `null` and missing both read as empty.
    #[serde(default)]
    pub discovered_scrape_jobs: Option<Vec<String>>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "prometheus-static-target.kube-stager.io",
    version = "v1",
    kind = "ScrapeJob",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJobSpec {
    pub job_name: String,
    #[serde(default)]
    pub static_configs: Vec<ScrapeJobStaticConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJobStaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn namespace_of<K: ResourceExt>(obj: &K) -> String {
    obj.namespace().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

impl From<&AdditionalScrapeConfig> for model::ScrapeConfig {
    fn from(cfg: &AdditionalScrapeConfig) -> Self {
        let spec = &cfg.spec;
        model::ScrapeConfig {
            id: model::ObjectRef::new(namespace_of(cfg), cfg.name_any()),
            artifact: model::ArtifactRef {
                secret: model::ObjectRef::new(spec.secret_namespace.clone(), spec.secret_name.clone()),
                key: spec.secret_key.clone(),
            },
            label_filter: spec.scrape_job_labels.clone(),
            namespace_selector: spec.scrape_job_namespace_selector.clone(),
            discovered: cfg
                .status
                .as_ref()
                .and_then(|s| s.discovered_scrape_jobs.clone())
                .unwrap_or_default(),
        }
    }
}

impl From<&ScrapeJob> for model::ScrapeJob {
    fn from(job: &ScrapeJob) -> Self {
        model::ScrapeJob {
            id: model::ObjectRef::new(namespace_of(job), job.name_any()),
            labels: job.labels().clone(),
            job_name: job.spec.job_name.clone(),
            static_configs: job
                .spec
                .static_configs
                .iter()
                .map(|s| model::TargetGroup { targets: s.targets.clone(), labels: s.labels.clone() })
                .collect(),
        }
    }
}

pub fn artifact_from_secret(secret: &Secret) -> model::Artifact {
    model::Artifact {
        data: secret
            .data
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.0.clone()))
            .collect(),
        revision: secret.metadata.resource_version.clone(),
    }
}

/// A new `Opaque` Secret holding `artifact`.
pub fn secret_from_artifact(target: &model::ObjectRef, artifact: &model::Artifact) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            ..Default::default()
        },
        data: Some(artifact.data.iter().map(|(k, v)| (k.clone(), ByteString(v.clone()))).collect()),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}
