use promtarget_core::{ArtifactRef, Labels, NamespaceSelector, ObjectRef, ScrapeConfig};
use promtarget_index::{Index, SharedIndex};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn cfg(ns: &str, name: &str, secret: (&str, &str), filter: Labels, selector: NamespaceSelector) -> ScrapeConfig {
    ScrapeConfig {
        id: ObjectRef::new(ns, name),
        artifact: ArtifactRef { secret: ObjectRef::new(secret.0, secret.1), key: name.into() },
        label_filter: filter,
        namespace_selector: selector,
        discovered: vec![],
    }
}

fn fixture() -> Vec<ScrapeConfig> {
    vec![
        cfg("monitoring", "team-a", ("monitoring", "additional"), labels(&[("team", "a")]), NamespaceSelector::any()),
        cfg("monitoring", "team-b", ("monitoring", "additional"), labels(&[("team", "b"), ("tier", "web")]), NamespaceSelector::names(["web"])),
        cfg("apps", "local", ("apps", "scrape"), Labels::new(), NamespaceSelector::default()),
    ]
}

#[test]
fn artifact_lookup_is_exact_and_sorted() {
    let idx = Index::build(&fixture());
    assert_eq!(
        idx.configs_for_artifact(&ObjectRef::new("monitoring", "additional")),
        vec![ObjectRef::new("monitoring", "team-a"), ObjectRef::new("monitoring", "team-b")]
    );
    // same name in another namespace is a different artifact
    assert!(idx.configs_for_artifact(&ObjectRef::new("apps", "additional")).is_empty());
    assert_eq!(idx.configs_for_artifact(&ObjectRef::new("apps", "scrape")), vec![ObjectRef::new("apps", "local")]);
}

#[test]
fn candidate_lookup_requires_all_label_pairs() {
    let idx = Index::build(&fixture());
    // tier mismatch excludes team-b even though team matches
    let hits = idx.configs_for_candidate("web", &labels(&[("team", "b"), ("tier", "db")]));
    assert!(hits.is_empty(), "hits={:?}", hits);

    let hits = idx.configs_for_candidate("web", &labels(&[("team", "b"), ("tier", "web")]));
    assert_eq!(hits, vec![ObjectRef::new("monitoring", "team-b")]);
}

#[test]
fn candidate_lookup_uses_config_namespace_as_owner() {
    let idx = Index::build(&fixture());
    // empty filter + default selector: any job in the config's own namespace
    assert_eq!(idx.configs_for_candidate("apps", &Labels::new()), vec![ObjectRef::new("apps", "local")]);
    assert!(idx.configs_for_candidate("local", &Labels::new()).is_empty());
    // any-namespace selector
    assert_eq!(
        idx.configs_for_candidate("elsewhere", &labels(&[("team", "a")])),
        vec![ObjectRef::new("monitoring", "team-a")]
    );
}

#[test]
fn shared_index_swaps() {
    let shared = SharedIndex::new();
    assert!(shared.load().is_empty());
    let before = shared.load();
    shared.publish(Index::build(&fixture()));
    assert_eq!(shared.load().len(), 3);
    // readers holding the old snapshot are unaffected
    assert!(before.is_empty());
}
