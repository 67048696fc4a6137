use policy_transport_k8s_api::GroupVersionKind;
use serde_json::Value;
use std::sync::Arc;

/// Read access to arbitrary cached objects, used to resolve template references.
pub trait DynamicResourceLister: Send + Sync {
    fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str)
        -> Option<Arc<Value>>;
}

/// Resolves no references.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoReferences;

impl DynamicResourceLister for NoReferences {
    fn get(&self, _: &GroupVersionKind, _: Option<&str>, _: &str) -> Option<Arc<Value>> {
        None
    }
}

impl<L: DynamicResourceLister + ?Sized> DynamicResourceLister for Arc<L> {
    fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<Arc<Value>> {
        (**self).get(gvk, namespace, name)
    }
}
