use super::*;
use crate::{
    dynamic::{DynamicResourceLister, NoReferences},
    patch,
    policy::{Policy, PolicySet},
    token::{HmacTokens, TokenManager},
};
use maplit::hashmap;
use policy_transport_k8s_api::{annotations, Labels};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::{collections::HashMap as StdHashMap, sync::Arc};

const SECRET: &str = "test-secret";

/// Serves objects keyed by name, ignoring kind and namespace.
struct References(StdHashMap<&'static str, Arc<Value>>);

impl DynamicResourceLister for References {
    fn get(&self, _: &GroupVersionKind, _: Option<&str>, name: &str) -> Option<Arc<Value>> {
        self.0.get(name).cloned()
    }
}

fn chain_with(lister: PolicySet, references: Arc<dyn DynamicResourceLister>) -> InterrupterChain {
    let tokens = Arc::new(HmacTokens::new(SECRET).unwrap());
    InterrupterChain::new(
        PolicyInterrupter::new(tokens, Arc::new(lister)),
        BaseInterrupter::new(references).expect("templates must compile"),
    )
}

fn chain() -> InterrupterChain {
    chain_with(PolicySet::default(), Arc::new(NoReferences))
}

fn token(id: &PolicyId) -> String {
    HmacTokens::new(SECRET).unwrap().issue(id).unwrap()
}

fn plaintext_policy() -> Value {
    json!({
        "apiVersion": "policy.kcloudlabs.io/v1alpha1",
        "kind": "OverridePolicy",
        "metadata": { "name": "overridePolicy1", "namespace": "default" },
        "spec": {
            "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod" }],
            "overrideRules": [{
                "targetOperations": ["CREATE"],
                "overriders": {
                    "plaintext": [{ "path": "/metadata/annotations", "op": "add", "value": { "foo": "bar" } }]
                }
            }]
        }
    })
}

fn template_policy() -> Value {
    json!({
        "apiVersion": "policy.kcloudlabs.io/v1alpha1",
        "kind": "OverridePolicy",
        "metadata": { "name": "templated", "namespace": "default" },
        "spec": {
            "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod" }],
            "overrideRules": [{
                "targetOperations": ["CREATE", "UPDATE"],
                "overriders": {
                    "template": [{
                        "path": "/metadata/labels/owner",
                        "op": "add",
                        "value": "{{ policy.metadata.name }}"
                    }]
                }
            }]
        }
    })
}

fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

fn apply(value: Value, patch: &Patch) -> Document {
    let mut doc = doc(value);
    patch::apply(&mut doc, patch).expect("patch must apply");
    doc
}

#[test]
fn other_kinds_get_empty_patch() {
    let pod = doc(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "web-1", "namespace": "default" },
    }));
    let patch = chain().on_mutating(&pod, None, Operation::Create).unwrap();
    assert!(patch.0.is_empty());
    assert!(chain().on_validating(&pod, None, Operation::Create).is_ok());
}

#[test]
fn create_issues_token() {
    let patch = chain()
        .on_mutating(&doc(plaintext_policy()), None, Operation::Create)
        .unwrap();
    let patched = apply(plaintext_policy(), &patch);

    let id = PolicyId::namespaced("default", "overridePolicy1");
    assert_eq!(patched.annotation(annotations::TOKEN), Some(token(&id).as_str()));
    // Plaintext-only policies need no rendering.
    assert_eq!(patch.0.len(), 2);
}

#[test]
fn create_replaces_existing_token() {
    let mut policy = plaintext_policy();
    policy["metadata"]["annotations"] = json!({ (annotations::TOKEN): "forged" });
    let patch = chain()
        .on_mutating(&doc(policy.clone()), None, Operation::Create)
        .unwrap();
    let patched = apply(policy, &patch);
    let id = PolicyId::namespaced("default", "overridePolicy1");
    assert_eq!(patched.annotation(annotations::TOKEN), Some(token(&id).as_str()));
}

#[test]
fn update_validates_token() {
    let id = PolicyId::namespaced("default", "overridePolicy1");
    let mut policy = plaintext_policy();
    policy["metadata"]["annotations"] = json!({ (annotations::TOKEN): token(&id) });
    assert!(chain()
        .on_mutating(&doc(policy.clone()), None, Operation::Update)
        .is_ok());

    policy["metadata"]["annotations"] = json!({ (annotations::TOKEN): "forged" });
    assert!(matches!(
        chain().on_mutating(&doc(policy.clone()), None, Operation::Update),
        Err(Error::Token(_))
    ));
    assert!(matches!(
        chain().on_validating(&doc(policy), None, Operation::Update),
        Err(Error::Token(_))
    ));
}

#[test]
fn update_without_token_reissues() {
    let patch = chain()
        .on_mutating(&doc(plaintext_policy()), None, Operation::Update)
        .unwrap();
    let patched = apply(plaintext_policy(), &patch);
    assert!(patched.annotation(annotations::TOKEN).is_some());
}

#[test]
fn renders_templates() {
    let patch = chain()
        .on_mutating(&doc(template_policy()), None, Operation::Create)
        .unwrap();
    let patched = apply(template_policy(), &patch);
    assert_eq!(
        patched.as_value()["spec"]["overrideRules"][0]["overriders"]["rendered"],
        json!([{ "path": "/metadata/labels/owner", "op": "add", "value": "templated" }]),
    );
}

#[test]
fn unchanged_rendered_policy_stops_walk() {
    let id = PolicyId::namespaced("default", "templated");
    let mut policy = template_policy();
    policy["metadata"]["annotations"] = json!({ (annotations::TOKEN): token(&id) });
    policy["spec"]["overrideRules"][0]["overriders"]["rendered"] =
        json!([{ "path": "/metadata/labels/owner", "op": "add", "value": "stale" }]);

    // The previous object is identical, so the stale rendering is kept.
    let object = doc(policy.clone());
    let patch = chain()
        .on_mutating(&object, Some(&object), Operation::Update)
        .unwrap();
    assert!(patch.0.is_empty());

    // Without a previous object or a cached copy, the policy is re-rendered.
    let patch = chain().on_mutating(&object, None, Operation::Update).unwrap();
    let patched = apply(policy, &patch);
    assert_eq!(
        patched.as_value()["spec"]["overrideRules"][0]["overriders"]["rendered"][0]["value"],
        json!("templated"),
    );
}

#[test]
fn cached_copy_stands_in_for_previous() {
    let id = PolicyId::namespaced("default", "templated");
    let mut policy = template_policy();
    policy["metadata"]["annotations"] = json!({ (annotations::TOKEN): token(&id) });
    policy["spec"]["overrideRules"][0]["overriders"]["rendered"] =
        json!([{ "path": "/metadata/labels/owner", "op": "add", "value": "templated" }]);

    let object = doc(policy.clone());
    let cached = Policy {
        name: "templated".to_string(),
        namespace: Some("default".to_string()),
        labels: Labels::default(),
        spec: serde_json::from_value(policy["spec"].clone()).unwrap(),
    };
    let chain = chain_with(Some(cached).into_iter().collect(), Arc::new(NoReferences));
    let patch = chain.on_mutating(&object, None, Operation::Update).unwrap();
    assert!(patch.0.is_empty());
}

#[test]
fn stale_rendered_entries_are_removed() {
    let mut policy = plaintext_policy();
    policy["spec"]["overrideRules"][0]["overriders"]["rendered"] =
        json!([{ "path": "/metadata/labels/owner", "op": "add", "value": "old" }]);
    let patch = chain()
        .on_mutating(&doc(policy.clone()), None, Operation::Create)
        .unwrap();
    let patched = apply(policy, &patch);
    assert_eq!(
        patched.as_value()["spec"]["overrideRules"][0]["overriders"].get("rendered"),
        None
    );
}

#[test]
fn value_ref_binds_referenced_object() {
    let mut policy = template_policy();
    policy["spec"]["overrideRules"][0]["overriders"]["template"][0] = json!({
        "path": "/metadata/labels/region",
        "op": "add",
        "value": "{{ ref.data.region }}",
        "valueRef": { "apiVersion": "v1", "kind": "ConfigMap", "name": "cluster-info" }
    });

    let references = References(hashmap! {
        "cluster-info" => Arc::new(json!({ "data": { "region": "eu-west-1" } })),
    });
    let with_refs = chain_with(PolicySet::default(), Arc::new(references));
    let patch = with_refs
        .on_mutating(&doc(policy.clone()), None, Operation::Create)
        .unwrap();
    let patched = apply(policy.clone(), &patch);
    assert_eq!(
        patched.as_value()["spec"]["overrideRules"][0]["overriders"]["rendered"][0]["value"],
        json!("eu-west-1"),
    );

    // Missing references fail the write.
    assert!(matches!(
        chain().on_mutating(&doc(policy), None, Operation::Create),
        Err(Error::TemplateRender { .. })
    ));
}

#[test]
fn templates_render_json_values() {
    let mut policy = template_policy();
    policy["spec"]["overrideRules"][0]["overriders"]["template"][0]["value"] =
        json!(r#"{"owner": "{{ policy.metadata.name }}"}"#);
    let patch = chain()
        .on_mutating(&doc(policy.clone()), None, Operation::Create)
        .unwrap();
    let patched = apply(policy, &patch);
    assert_eq!(
        patched.as_value()["spec"]["overrideRules"][0]["overriders"]["rendered"][0]["value"],
        json!({ "owner": "templated" }),
    );
}

#[test]
fn cluster_policy_must_not_be_namespaced() {
    let policy = json!({
        "apiVersion": "policy.kcloudlabs.io/v1alpha1",
        "kind": "ClusterOverridePolicy",
        "metadata": { "name": "overridePolicy2", "namespace": "default" },
        "spec": { "resourceSelectors": [], "overrideRules": [] }
    });
    assert!(matches!(
        chain().on_mutating(&doc(policy), None, Operation::Create),
        Err(Error::Validation { .. })
    ));

    let policy = json!({
        "apiVersion": "policy.kcloudlabs.io/v1alpha1",
        "kind": "ClusterOverridePolicy",
        "metadata": { "name": "overridePolicy2" },
        "spec": { "resourceSelectors": [], "overrideRules": [] }
    });
    let patch = chain()
        .on_mutating(&doc(policy.clone()), None, Operation::Create)
        .unwrap();
    let patched = apply(policy, &patch);
    assert_eq!(
        patched.annotation(annotations::TOKEN),
        Some(token(&PolicyId::cluster("overridePolicy2")).as_str())
    );
}

#[test]
fn validation_lists_problems() {
    let policy = json!({
        "apiVersion": "policy.kcloudlabs.io/v1alpha1",
        "kind": "OverridePolicy",
        "metadata": { "name": "broken", "namespace": "default" },
        "spec": {
            "resourceSelectors": [{ "apiVersion": "v1" }],
            "overrideRules": [{
                "targetOperations": [],
                "overriders": {
                    "plaintext": [
                        { "path": "metadata", "op": "move", "value": 1 },
                        { "path": "/metadata/labels", "op": "add" }
                    ],
                    "template": [{ "path": "/metadata/labels", "op": "add", "value": "{{ oops" }]
                }
            }]
        }
    });

    let Err(Error::Validation { problems, .. }) =
        chain().on_validating(&doc(policy), None, Operation::Create)
    else {
        panic!("policy must be invalid");
    };
    assert_eq!(problems.len(), 6, "{problems:#?}");
    assert!(problems[0].contains("resourceSelectors[0].kind"));
    assert!(problems[1].contains("targetOperations must not be empty"));
    assert!(problems[2].contains("unsupported op move"));
    assert!(problems[3].contains("path must be a JSON pointer"));
    assert!(problems[4].contains("plaintext[1].value must be set"));
    assert!(problems[5].contains("template[0].value"));
}

#[test]
fn valid_policies_pass_validation() {
    assert!(chain()
        .on_validating(&doc(plaintext_policy()), None, Operation::Create)
        .is_ok());
    assert!(chain()
        .on_validating(&doc(template_policy()), None, Operation::Create)
        .is_ok());
}
