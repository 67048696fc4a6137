use crate::{
    patch,
    policy::{Policy, PolicyLister, Scope},
    Document, Error, Result,
};
use policy_transport_k8s_api::{
    annotations, labels::Selector, Labels, Operation, Overriders, ResourceSelector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The ordered record of the policy rules applied to an object within one scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedOverrides(pub Vec<OverridePolicyItem>);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverridePolicyItem {
    pub policy_name: String,
    pub overriders: Overriders,
}

/// The provenance records produced by a single resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub cluster: AppliedOverrides,
    pub namespaced: AppliedOverrides,
}

/// Matches policies to an object and applies their overriders.
#[derive(Clone, Debug)]
pub struct OverrideResolver<L> {
    lister: L,
}

// === impl AppliedOverrides ===

impl AppliedOverrides {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes the record as compact JSON, or `None` when nothing was applied.
    pub fn to_json(&self) -> Result<Option<String>> {
        if self.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(self).map(Some).map_err(Error::Encode)
    }
}

// === impl OverrideResolver ===

impl<L: PolicyLister> OverrideResolver<L> {
    pub fn new(lister: L) -> Self {
        Self { lister }
    }

    /// Applies every matching policy rule to `doc` and records provenance in its
    /// annotations.
    ///
    /// Cluster-scoped policies are applied before namespace-scoped ones, each
    /// in name order. `doc` is only modified if every rule applies cleanly.
    pub fn apply(&self, doc: &mut Document, operation: Operation) -> Result<Resolution> {
        let labels = doc.labels();
        let namespace = doc.namespace().map(str::to_string);

        let cluster = self.matching(Scope::Cluster, doc, &labels)?;
        let namespaced = match namespace.as_deref() {
            Some(ns) => self.matching(Scope::Namespace(ns), doc, &labels)?,
            None => Vec::new(),
        };

        let mut working = doc.clone();
        let resolution = Resolution {
            cluster: Self::apply_scope(&mut working, &cluster, operation)?,
            namespaced: Self::apply_scope(&mut working, &namespaced, operation)?,
        };

        if let Some(json) = resolution.cluster.to_json()? {
            working.set_annotation(annotations::APPLIED_CLUSTER_OVERRIDES, json)?;
        }
        if let Some(json) = resolution.namespaced.to_json()? {
            working.set_annotation(annotations::APPLIED_OVERRIDES, json)?;
        }

        if resolution.cluster.is_empty() && resolution.namespaced.is_empty() {
            tracing::trace!(kind = %doc.kind(), name = ?doc.name(), "No overrides apply");
        } else {
            tracing::debug!(
                kind = %doc.kind(),
                name = ?doc.name(),
                namespace = ?namespace,
                cluster = resolution.cluster.0.len(),
                namespaced = resolution.namespaced.0.len(),
                "Applied overrides"
            );
        }

        *doc = working;
        Ok(resolution)
    }

    fn matching(
        &self,
        scope: Scope<'_>,
        doc: &Document,
        labels: &Labels,
    ) -> Result<Vec<Arc<Policy>>> {
        let mut matched = Vec::new();
        for policy in self.lister.list(scope, &Selector::default()) {
            if selects_any(&policy.spec.resource_selectors, doc, labels)? {
                matched.push(policy);
            }
        }
        // Listers are not required to order their results.
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    fn apply_scope(
        doc: &mut Document,
        policies: &[Arc<Policy>],
        operation: Operation,
    ) -> Result<AppliedOverrides> {
        let mut applied = AppliedOverrides::default();
        for policy in policies {
            for rule in policy.spec.override_rules.iter() {
                if !rule.targets(operation) {
                    continue;
                }
                patch::apply(doc, &patch::overriders(&rule.overriders)?)?;
                applied.0.push(OverridePolicyItem {
                    policy_name: policy.name.clone(),
                    overriders: rule.overriders.clone(),
                });
            }
        }
        Ok(applied)
    }
}

/// An empty selector list selects nothing.
fn selects_any(selectors: &[ResourceSelector], doc: &Document, labels: &Labels) -> Result<bool> {
    for selector in selectors {
        if selects(selector, doc, labels)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn selects(selector: &ResourceSelector, doc: &Document, labels: &Labels) -> Result<bool> {
    if selector.api_version != doc.api_version() || selector.kind != doc.kind() {
        return Ok(false);
    }

    if let Some(name) = selector.name() {
        return Ok(doc.name() == Some(name));
    }

    match selector.label_selector.as_ref() {
        None => Ok(true),
        Some(label_selector) => {
            label_selector.validate()?;
            Ok(label_selector.matches(labels))
        }
    }
}
