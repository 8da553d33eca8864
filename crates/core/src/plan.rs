//! Convergence planning: diff desired state against what is stored.

use serde::{Deserialize, Serialize};

use crate::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Create,
    Update,
}

/// Artifact write intent. `artifact` is the complete mapping to store: the
/// config's key set to the new payload, every other key carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactWrite {
    pub mode: WriteMode,
    pub artifact: Artifact,
}

/// Minimal set of writes that converges stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// New discovered list, when it differs from the stored status.
    pub status: Option<Vec<String>>,
    pub artifact: Option<ArtifactWrite>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.status.is_none() && self.artifact.is_none()
    }
}

/// Compute writes for one config.
///
/// `current` is `None` when the artifact does not exist; it is then created even if
/// `payload` encodes zero jobs. When it exists, only a byte difference under `key`
/// (absence counts as different) produces an update.
pub fn plan(
    discovered: Vec<String>,
    payload: Vec<u8>,
    key: &str,
    current_status: &[String],
    current: Option<Artifact>,
) -> Plan {
    let status = if discovered.as_slice() != current_status { Some(discovered) } else { None };

    let artifact = match current {
        None => {
            let mut artifact = Artifact::default();
            artifact.data.insert(key.to_string(), payload);
            Some(ArtifactWrite { mode: WriteMode::Create, artifact })
        }
        Some(existing) if existing.value(key) == Some(payload.as_slice()) => None,
        Some(mut existing) => {
            existing.data.insert(key.to_string(), payload);
            Some(ArtifactWrite { mode: WriteMode::Update, artifact: existing })
        }
    };

    Plan { status, artifact }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_artifact_is_created_even_when_empty() {
        let p = plan(Vec::new(), b"[]\n".to_vec(), "test", &[], None);
        assert!(p.status.is_none());
        let w = p.artifact.unwrap();
        assert_eq!(w.mode, WriteMode::Create);
        assert_eq!(w.artifact.value("test"), Some(&b"[]\n"[..]));
        assert_eq!(w.artifact.data.len(), 1);
    }

    #[test]
    fn update_preserves_unrelated_keys() {
        let mut current = Artifact { revision: Some("7".into()), ..Default::default() };
        current.data.insert("otherKey".into(), b"test".to_vec());
        current.data.insert("test".into(), b"test2".to_vec());

        let p = plan(names(&["test1/valid-1"]), b"- job_name: test1\n".to_vec(), "test", &[], Some(current));
        assert_eq!(p.status, Some(names(&["test1/valid-1"])));
        let w = p.artifact.unwrap();
        assert_eq!(w.mode, WriteMode::Update);
        assert_eq!(w.artifact.value("otherKey"), Some(&b"test"[..]));
        assert_eq!(w.artifact.value("test"), Some(&b"- job_name: test1\n"[..]));
        assert_eq!(w.artifact.revision.as_deref(), Some("7"));
    }

    #[test]
    fn absent_key_in_existing_artifact_is_an_update() {
        let mut current = Artifact::default();
        current.data.insert("otherKey".into(), b"test".to_vec());
        let p = plan(Vec::new(), b"[]\n".to_vec(), "test", &[], Some(current));
        let w = p.artifact.unwrap();
        assert_eq!(w.mode, WriteMode::Update);
        assert_eq!(w.artifact.data.len(), 2);
    }

    #[test]
    fn converged_state_plans_nothing() {
        let mut current = Artifact::default();
        current.data.insert("test".into(), b"payload".to_vec());
        let status = names(&["a/b", "c/d"]);
        let p = plan(status.clone(), b"payload".to_vec(), "test", &status, Some(current));
        assert!(p.is_noop());
    }

    #[test]
    fn status_compares_order_and_length() {
        let current = names(&["c/d", "a/b"]);
        let p = plan(names(&["a/b", "c/d"]), Vec::new(), "k", &current, None);
        assert!(p.status.is_some());
        let p = plan(names(&["a/b"]), Vec::new(), "k", &names(&["a/b", "c/d"]), None);
        assert!(p.status.is_some());
    }
}
