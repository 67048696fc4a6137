use super::labels;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Overrides applied to objects written within the policy's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "policy.kcloudlabs.io",
    version = "v1alpha1",
    kind = "OverridePolicy",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OverridePolicySpec {
    /// Selects the objects this policy applies to. An empty list selects nothing.
    #[serde(default)]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub override_rules: Vec<RuleWithOperation>,
}

/// Overrides applied to objects written in any namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "policy.kcloudlabs.io",
    version = "v1alpha1",
    kind = "ClusterOverridePolicy",
    schema = "disabled"
)]
pub struct ClusterOverridePolicySpec {
    #[serde(flatten)]
    pub policy: OverridePolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<labels::Selector>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleWithOperation {
    #[serde(default)]
    pub target_operations: Vec<Operation>,
    #[serde(default)]
    pub overriders: Overriders,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Overriders {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plaintext: Vec<PlaintextOverrider>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template: Vec<TemplateOverrider>,
    /// Plaintext produced from `template` when the policy was written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rendered: Vec<PlaintextOverrider>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlaintextOverrider {
    pub path: String,
    #[serde(rename = "op")]
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A JSON patch operator. Values outside the supported set are kept so that
/// they can be reported when the overrider is applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Add,
    Remove,
    Replace,
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOverrider {
    pub path: String,
    #[serde(rename = "op")]
    pub operator: Operator,
    /// Template text producing the overrider's value.
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_ref: Option<ObjectReference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

// === impl OverridePolicySpec ===

impl OverridePolicySpec {
    /// Indicates whether every template overrider has a rendered counterpart.
    pub fn is_rendered(&self) -> bool {
        self.override_rules
            .iter()
            .all(|rule| rule.overriders.rendered.len() == rule.overriders.template.len())
    }
}

// === impl ResourceSelector ===

impl ResourceSelector {
    /// Returns the selected object name, treating an empty name as unset.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

// === impl RuleWithOperation ===

impl RuleWithOperation {
    pub fn targets(&self, op: Operation) -> bool {
        self.target_operations.contains(&op)
    }
}

// === impl Operation ===

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("CREATE"),
            Self::Update => f.write_str("UPDATE"),
            Self::Delete => f.write_str("DELETE"),
            Self::Connect => f.write_str("CONNECT"),
        }
    }
}

// === impl Operator ===

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Unknown(op) => op,
        }
    }
}

impl From<String> for Operator {
    fn from(op: String) -> Self {
        match op.as_str() {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "replace" => Self::Replace,
            _ => Self::Unknown(op),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Unknown(op) => op,
            op => op.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
