#![forbid(unsafe_code)]

use promtarget_core::{Artifact, ArtifactRef, Labels, NamespaceSelector, ObjectRef, ScrapeConfig, ScrapeJob};
use promtarget_store::{ArtifactStore, CandidateSource, ConfigStore, MemoryStore, StoreError, StoreOp};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn job(ns: &str, name: &str, l: Labels) -> ScrapeJob {
    ScrapeJob { id: ObjectRef::new(ns, name), labels: l, job_name: name.into(), static_configs: vec![] }
}

#[tokio::test]
async fn list_candidates_applies_every_label_pair() {
    let store = MemoryStore::new();
    store.put_job(job("test1", "valid-1", labels(&[("target", "test"), ("team", "a")]))).await;
    store.put_job(job("test1", "invalid", labels(&[("target", "invalid")]))).await;
    store.put_job(job("test2", "partial", labels(&[("team", "a")]))).await;

    let filter = labels(&[("target", "test"), ("team", "a")]);
    let got = store.list_candidates(&filter).await.unwrap();
    let ids: Vec<_> = got.iter().map(|j| j.id.to_string()).collect();
    assert_eq!(ids, vec!["test1/valid-1"]);

    let all = store.list_candidates(&Labels::new()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn update_with_stale_revision_conflicts() {
    let store = MemoryStore::new();
    let secret = ObjectRef::new("default", "test-secret");
    store.put_artifact(secret.clone(), Artifact::default()).await;
    let seen = store.get_artifact(&secret).await.unwrap().unwrap();

    // someone else writes in between
    store.put_artifact(secret.clone(), Artifact::default()).await;

    let err = store.update_artifact(&secret, &seen).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "err={}", err);
    assert_eq!(store.writes().await.updates, 0);
}

#[tokio::test]
async fn create_existing_conflicts_and_missing_update_is_not_found() {
    let store = MemoryStore::new();
    let secret = ObjectRef::new("default", "s");
    store.create_artifact(&secret, &Artifact::default()).await.unwrap();
    assert!(matches!(store.create_artifact(&secret, &Artifact::default()).await, Err(StoreError::Conflict(_))));

    let other = ObjectRef::new("default", "missing");
    assert!(matches!(store.update_artifact(&other, &Artifact::default()).await, Err(StoreError::NotFound(_))));
    assert!(store.get_artifact(&other).await.unwrap().is_none());
}

#[tokio::test]
async fn injected_fault_fires_once() {
    let store = MemoryStore::new();
    let id = ObjectRef::new("default", "cfg");
    store
        .put_config(ScrapeConfig {
            id: id.clone(),
            artifact: ArtifactRef { secret: ObjectRef::new("default", "s"), key: "k".into() },
            label_filter: Labels::new(),
            namespace_selector: NamespaceSelector::default(),
            discovered: vec![],
        })
        .await;
    store.fail_next(StoreOp::UpdateStatus).await;
    assert!(store.update_status(&id, &["a/b".to_string()]).await.is_err());
    store.update_status(&id, &["a/b".to_string()]).await.unwrap();
    assert_eq!(store.config(&id).await.unwrap().discovered, vec!["a/b"]);
    assert_eq!(store.writes().await.status, 1);
}
