//! Prometheus `scrape_configs` entries as written into the artifact.

use serde::{Deserialize, Serialize};

use crate::{Labels, ScrapeJob};

/// A scrape job entry. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_name: String,
    pub static_configs: Vec<StaticConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
    pub labels: Labels,
}

/// Verbatim copy of a candidate into the output shape.
pub fn project(job: &ScrapeJob) -> Job {
    Job {
        job_name: job.job_name.clone(),
        static_configs: job
            .static_configs
            .iter()
            .map(|g| StaticConfig { targets: g.targets.clone(), labels: g.labels.clone() })
            .collect(),
    }
}

impl From<&ScrapeJob> for Job {
    fn from(job: &ScrapeJob) -> Self {
        project(job)
    }
}
