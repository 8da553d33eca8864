//! Load `AdditionalScrapeConfig` / `ScrapeJob` objects from YAML manifests.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::crd::GROUP;
use crate::{AdditionalScrapeConfig, ScrapeJob};

#[derive(Debug, Default)]
pub struct Manifests {
    pub configs: Vec<AdditionalScrapeConfig>,
    pub jobs: Vec<ScrapeJob>,
}

impl Manifests {
    /// Parse every document of a (possibly multi-document) YAML stream. Kinds
    /// outside the promtarget group are skipped; empty documents are ignored.
    pub fn parse(yaml: &str) -> Result<Self> {
        let mut out = Manifests::default();
        for (i, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document {}", i))?;
            if val.is_null() {
                continue;
            }
            let api_version = val.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document {} missing apiVersion", i))?;
            let kind = val.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document {} missing kind", i))?
                .to_string();
            if api_version.split_once('/').map(|(g, _)| g) != Some(GROUP) {
                continue;
            }
            match kind.as_str() {
                "AdditionalScrapeConfig" => out.configs.push(serde_yaml::from_value(val).with_context(|| format!("document {}: invalid AdditionalScrapeConfig", i))?),
                "ScrapeJob" => out.jobs.push(serde_yaml::from_value(val).with_context(|| format!("document {}: invalid ScrapeJob", i))?),
                _ => {}
            }
        }
        Ok(out)
    }

    pub fn extend(&mut self, other: Manifests) {
        self.configs.extend(other.configs);
        self.jobs.extend(other.jobs);
    }
}
