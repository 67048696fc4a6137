use crate::{writeback::last_sync_patch, Index, PolicyCache, SharedIndex, Update};
use chrono::{DateTime, Utc};
use futures::prelude::*;
use kube::runtime::watcher;
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use maplit::btreemap;
use policy_transport_core::{PolicyId, PolicyLister, Scope};
use policy_transport_k8s_api::{
    labels::Selector, ClusterOverridePolicy, ClusterOverridePolicySpec, ObjectMeta, Operation,
    Operator, OverridePolicy, OverridePolicySpec, Overriders, PlaintextOverrider,
    ResourceSelector, RuleWithOperation,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;


fn spec(value: &str) -> OverridePolicySpec {
    OverridePolicySpec {
        resource_selectors: vec![ResourceSelector {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            name: None,
            label_selector: None,
        }],
        override_rules: vec![RuleWithOperation {
            target_operations: vec![Operation::Create],
            overriders: Overriders {
                plaintext: vec![PlaintextOverrider {
                    path: "/metadata/annotations".to_string(),
                    operator: Operator::Add,
                    value: Some(serde_json::json!({ "foo": value })),
                }],
                ..Default::default()
            },
        }],
    }
}

fn policy(ns: &str, name: &str, spec: OverridePolicySpec) -> OverridePolicy {
    OverridePolicy {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec,
    }
}

fn cluster_policy(name: &str, spec: OverridePolicySpec) -> ClusterOverridePolicy {
    ClusterOverridePolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ClusterOverridePolicySpec { policy: spec },
    }
}

fn index() -> (SharedIndex, mpsc::UnboundedReceiver<Update>) {
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    (Index::shared(updates_tx), updates_rx)
}

fn apply(index: &SharedIndex, policy: OverridePolicy) {
    IndexNamespacedResource::apply(&mut *index.write(), policy);
}

fn apply_cluster(index: &SharedIndex, policy: ClusterOverridePolicy) {
    IndexClusterResource::apply(&mut *index.write(), policy);
}

fn names(index: &SharedIndex, scope: Scope<'_>) -> Vec<String> {
    index
        .read()
        .list(scope, &Selector::default())
        .iter()
        .map(|p| p.name.clone())
        .collect()
}

#[test]
fn indexes_namespaced_policies() {
    let (index, mut updates_rx) = index();

    apply(&index, policy("ns-0", "b", spec("bar")));
    apply(&index, policy("ns-0", "a", spec("bar")));
    apply(&index, policy("ns-1", "c", spec("bar")));

    assert_eq!(names(&index, Scope::Namespace("ns-0")), vec!["a", "b"]);
    assert_eq!(names(&index, Scope::Namespace("ns-1")), vec!["c"]);
    assert!(names(&index, Scope::Cluster).is_empty());

    let cached = index.read().get(Scope::Namespace("ns-0"), "a").unwrap();
    assert_eq!(cached.spec, spec("bar"));
    assert_eq!(cached.namespace.as_deref(), Some("ns-0"));

    // Newly added policies are not written back.
    assert!(updates_rx.try_recv().is_err());

    IndexNamespacedResource::<OverridePolicy>::delete(
        &mut *index.write(),
        "ns-0".to_string(),
        "a".to_string(),
    );
    assert_eq!(names(&index, Scope::Namespace("ns-0")), vec!["b"]);
}

#[test]
fn spec_changes_are_written_back() {
    let (index, mut updates_rx) = index();

    apply(&index, policy("ns-0", "p", spec("bar")));
    // A relist delivers the same spec again.
    apply(&index, policy("ns-0", "p", spec("bar")));
    assert!(updates_rx.try_recv().is_err());

    apply(&index, policy("ns-0", "p", spec("baz")));
    let update = updates_rx.try_recv().expect("update must be sent");
    assert_eq!(update.id, PolicyId::namespaced("ns-0", "p"));
    assert_eq!(update.patch, last_sync_patch(DateTime::<Utc>::UNIX_EPOCH));
    assert!(updates_rx.try_recv().is_err());

    assert_eq!(
        index.read().get(Scope::Namespace("ns-0"), "p").unwrap().spec,
        spec("baz")
    );
}

#[test]
fn metadata_changes_are_not_written_back() {
    let (index, mut updates_rx) = index();

    apply(&index, policy("ns-0", "p", spec("bar")));
    let mut relabeled = policy("ns-0", "p", spec("bar"));
    relabeled.metadata.labels = Some(btreemap! { "tier".to_string() => "gold".to_string() });
    apply(&index, relabeled);
    assert!(updates_rx.try_recv().is_err());

    let gold = Selector::from_iter(Some(("tier", "gold")));
    assert_eq!(index.read().list(Scope::Namespace("ns-0"), &gold).len(), 1);
}

#[test]
fn indexes_cluster_policies() {
    let (index, mut updates_rx) = index();

    apply_cluster(&index, cluster_policy("p", spec("bar")));
    assert_eq!(names(&index, Scope::Cluster), vec!["p"]);

    apply_cluster(&index, cluster_policy("p", spec("baz")));
    let update = updates_rx.try_recv().expect("update must be sent");
    assert_eq!(update.id, PolicyId::cluster("p"));

    IndexClusterResource::<ClusterOverridePolicy>::delete(&mut *index.write(), "p".to_string());
    assert!(names(&index, Scope::Cluster).is_empty());
}

#[test]
fn ignores_policies_without_namespace() {
    let (index, _updates_rx) = index();
    let mut orphan = policy("ns-0", "p", spec("bar"));
    orphan.metadata.namespace = None;
    apply(&index, orphan);
    assert!(names(&index, Scope::Cluster).is_empty());
}

#[test]
fn last_sync_patch_records_nanoseconds() {
    let timestamp = DateTime::<Utc>::from_timestamp(1, 5).unwrap();
    assert_eq!(
        last_sync_patch(timestamp),
        kube::api::Patch::Merge(serde_json::json!({
            "metadata": {
                "annotations": {
                    "policy.kcloudlabs.io/last-sync-time": "1000000005",
                },
            },
        }))
    );
}

#[tokio::test]
async fn marks_sync_after_initial_listing_is_indexed() {
    let (index, _updates_rx) = index();
    let mut synced = index.read().namespaced_synced();

    // The listing is buffered until it completes.
    let listing = stream::iter(vec![
        watcher::Event::Init,
        watcher::Event::InitApply(policy("ns-0", "p", spec("bar"))),
    ]);
    kubert::index::namespaced(index.clone(), listing).await;
    assert!(!*synced.borrow_and_update());
    assert!(names(&index, Scope::Namespace("ns-0")).is_empty());

    let listing = stream::iter(vec![
        watcher::Event::Init,
        watcher::Event::InitApply(policy("ns-0", "p", spec("bar"))),
        watcher::Event::InitDone,
    ]);
    kubert::index::namespaced(index.clone(), listing).await;
    assert!(*synced.borrow_and_update());
    assert_eq!(names(&index, Scope::Namespace("ns-0")), vec!["p"]);
    assert!(!*index.read().cluster_synced().borrow());
}

#[test]
fn relists_remove_missing_cluster_policies() {
    let (index, _updates_rx) = index();
    apply_cluster(&index, cluster_policy("stale", spec("bar")));

    let mut removed = ClusterRemoved::default();
    removed.insert("stale".to_string());
    IndexClusterResource::reset(
        &mut *index.write(),
        vec![cluster_policy("fresh", spec("bar"))],
        removed,
    );

    assert_eq!(names(&index, Scope::Cluster), vec!["fresh"]);
    assert!(*index.read().cluster_synced().borrow());
}

#[tokio::test]
async fn waits_for_both_policy_kinds() {
    let (index, _updates_rx) = index();
    let cache = PolicyCache::new(index.clone());

    let policies = stream::iter(vec![
        watcher::Event::Init,
        watcher::Event::InitApply(policy("ns-0", "p", spec("bar"))),
        watcher::Event::InitDone,
    ]);
    let cluster_policies = stream::iter(vec![
        watcher::Event::Init,
        watcher::Event::InitApply(cluster_policy("c", spec("bar"))),
        watcher::Event::InitDone,
    ]);
    tokio::spawn(kubert::index::namespaced(index.clone(), policies));
    tokio::spawn(kubert::index::cluster(index, cluster_policies));

    cache
        .wait_for_sync(tokio::time::Duration::from_secs(10))
        .await
        .expect("caches must sync");
    assert_eq!(cache.list(Scope::Namespace("ns-0"), &Selector::default()).len(), 1);
    assert_eq!(cache.list(Scope::Cluster, &Selector::default()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn wait_for_sync_times_out() {
    let (index, _updates_rx) = index();
    let cache = PolicyCache::new(index.clone());
    IndexClusterResource::<ClusterOverridePolicy>::reset(
        &mut *index.write(),
        vec![],
        ClusterRemoved::default(),
    );

    let error = cache
        .wait_for_sync(tokio::time::Duration::from_secs(60))
        .await
        .expect_err("namespaced policies never sync");
    assert_eq!(error.to_string(), "timed out waiting for overridepolicies to sync");
}

#[tokio::test(start_paused = true)]
async fn wait_for_sync_completes() {
    let (index, _updates_rx) = index();
    let cache = PolicyCache::new(index.clone());

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        let mut guard = index.write();
        IndexNamespacedResource::<OverridePolicy>::reset(
            &mut *guard,
            vec![],
            NamespacedRemoved::default(),
        );
        IndexClusterResource::<ClusterOverridePolicy>::reset(
            &mut *guard,
            vec![],
            ClusterRemoved::default(),
        );
    });

    cache
        .wait_for_sync(tokio::time::Duration::from_secs(10))
        .await
        .expect("caches must sync");
}
