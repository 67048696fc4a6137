//! Keeps an in-memory copy of the cluster's override policies.
//!
//! The index is updated by `kubert::index` watch tasks and read by the request
//! path through [`crate::PolicyCache`]. When a known policy's rules change, a
//! write-back [`Update`] is sent to the [`crate::Controller`].
//!
//! Each policy kind is marked synced only after its initial listing has been
//! applied, so readers waiting on the flag never observe a partial index.

use crate::writeback::Update;
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use policy_transport_core::{Policy, PolicyLister, PolicySet, Scope};
use policy_transport_k8s_api::{
    labels::Selector, ClusterOverridePolicy, Labels, OverridePolicy, ResourceExt,
};
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, watch};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug)]
pub struct Index {
    policies: PolicySet,
    updates: UnboundedSender<Update>,
    namespaced_synced: watch::Sender<bool>,
    cluster_synced: watch::Sender<bool>,
}

impl Index {
    pub fn shared(updates: UnboundedSender<Update>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            policies: PolicySet::default(),
            updates,
            namespaced_synced: watch::Sender::new(false),
            cluster_synced: watch::Sender::new(false),
        }))
    }

    /// Becomes `true` once the initial `OverridePolicy` listing is indexed.
    pub(crate) fn namespaced_synced(&self) -> watch::Receiver<bool> {
        self.namespaced_synced.subscribe()
    }

    /// Becomes `true` once the initial `ClusterOverridePolicy` listing is indexed.
    pub(crate) fn cluster_synced(&self) -> watch::Receiver<bool> {
        self.cluster_synced.subscribe()
    }

    fn apply_policy(&mut self, policy: Policy) {
        let id = policy.id();
        let changed = self
            .policies
            .get(policy.scope(), &policy.name)
            .map(|cached| cached.spec != policy.spec);
        self.policies.insert(policy);

        match changed {
            None => tracing::debug!(policy = %id, "Added policy"),
            Some(false) => tracing::trace!(policy = %id, "Policy rules unchanged"),
            Some(true) => {
                tracing::debug!(policy = %id, "Policy rules changed");
                if self.updates.send(Update::last_sync(id)).is_err() {
                    tracing::debug!("Write-back controller is not running");
                }
            }
        }
    }

    fn delete_policy(&mut self, scope: Scope<'_>, name: &str) {
        if self.policies.remove(scope, name).is_some() {
            tracing::debug!(?scope, %name, "Deleted policy");
        }
    }
}

impl PolicyLister for Index {
    fn list(&self, scope: Scope<'_>, selector: &Selector) -> Vec<Arc<Policy>> {
        self.policies.list(scope, selector)
    }

    fn get(&self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(scope, name)
    }
}

impl IndexNamespacedResource<OverridePolicy> for Index {
    fn apply(&mut self, policy: OverridePolicy) {
        let Some(namespace) = policy.namespace() else {
            tracing::warn!(name = %policy.name_any(), "OverridePolicy has no namespace");
            return;
        };
        let name = policy.name_unchecked();
        let labels = Labels::from(policy.metadata.labels);
        self.apply_policy(Policy {
            name,
            namespace: Some(namespace),
            labels,
            spec: policy.spec,
        });
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy(Scope::Namespace(&namespace), &name);
    }

    fn reset(&mut self, policies: Vec<OverridePolicy>, removed: NamespacedRemoved) {
        for policy in policies {
            IndexNamespacedResource::apply(self, policy);
        }
        for (namespace, names) in removed {
            for name in names {
                self.delete_policy(Scope::Namespace(&namespace), &name);
            }
        }

        if !self.namespaced_synced.send_replace(true) {
            tracing::debug!("Initial OverridePolicy sync complete");
        }
    }
}

impl IndexClusterResource<ClusterOverridePolicy> for Index {
    fn apply(&mut self, policy: ClusterOverridePolicy) {
        let name = policy.name_unchecked();
        let labels = Labels::from(policy.metadata.labels);
        self.apply_policy(Policy {
            name,
            namespace: None,
            labels,
            spec: policy.spec.policy,
        });
    }

    fn delete(&mut self, name: String) {
        self.delete_policy(Scope::Cluster, &name);
    }

    fn reset(&mut self, policies: Vec<ClusterOverridePolicy>, removed: ClusterRemoved) {
        for policy in policies {
            IndexClusterResource::apply(self, policy);
        }
        for name in removed {
            self.delete_policy(Scope::Cluster, &name);
        }

        if !self.cluster_synced.send_replace(true) {
            tracing::debug!("Initial ClusterOverridePolicy sync complete");
        }
    }
}
