use ahash::AHashMap as HashMap;
use futures::prelude::*;
use kube::runtime::{watcher, WatchStreamExt};
use parking_lot::RwLock;
use policy_transport_core::DynamicResourceLister;
use policy_transport_k8s_api::{
    Api, ApiResource, Client, DynamicObject, GroupVersionKind, ResourceExt,
};
use serde_json::Value;
use std::sync::Arc;

pub type SharedDynamicIndex = Arc<RwLock<DynamicIndex>>;

type Objects = HashMap<(Option<String>, String), Arc<Value>>;

/// Caches arbitrary objects so that templates can reference them.
#[derive(Debug, Default)]
pub struct DynamicIndex {
    objects: HashMap<GroupVersionKind, Objects>,
    /// Objects received during a (re)list, swapped in once it completes.
    pending: HashMap<GroupVersionKind, Objects>,
}

/// Read access to a [`DynamicIndex`].
#[derive(Clone, Debug, Default)]
pub struct DynamicCache(SharedDynamicIndex);

impl DynamicIndex {
    pub fn shared() -> SharedDynamicIndex {
        Default::default()
    }

    pub(crate) fn handle(&mut self, gvk: &GroupVersionKind, event: watcher::Event<DynamicObject>) {
        match event {
            watcher::Event::Init => {
                self.pending.insert(gvk.clone(), Objects::default());
            }
            watcher::Event::InitApply(obj) => {
                if let Some((key, value)) = entry(obj) {
                    self.pending.entry(gvk.clone()).or_default().insert(key, value);
                }
            }
            watcher::Event::InitDone => {
                let objects = self.pending.remove(gvk).unwrap_or_default();
                tracing::debug!(kind = %gvk.kind, objects = objects.len(), "Synced");
                self.objects.insert(gvk.clone(), objects);
            }
            watcher::Event::Apply(obj) => {
                if let Some((key, value)) = entry(obj) {
                    self.objects.entry(gvk.clone()).or_default().insert(key, value);
                }
            }
            watcher::Event::Delete(obj) => {
                let key = (obj.namespace(), obj.name_any());
                if let Some(objects) = self.objects.get_mut(gvk) {
                    objects.remove(&key);
                }
            }
        }
    }

    fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<Arc<Value>> {
        let objects = self.objects.get(gvk)?;
        objects
            .get(&(namespace.map(str::to_string), name.to_string()))
            // Cluster-scoped objects are found regardless of the namespace hint.
            .or_else(|| objects.get(&(None, name.to_string())))
            .cloned()
    }
}

fn entry(obj: DynamicObject) -> Option<((Option<String>, String), Arc<Value>)> {
    let key = (obj.namespace(), obj.name_any());
    match serde_json::to_value(&obj) {
        Ok(value) => Some((key, Arc::new(value))),
        Err(error) => {
            tracing::warn!(%error, name = %key.1, "Failed to encode object");
            None
        }
    }
}

/// Watches every object of `resource`'s kind into `index`.
pub async fn index(index: SharedDynamicIndex, client: Client, resource: ApiResource) {
    let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
    let api = Api::<DynamicObject>::all_with(client, &resource);
    let events = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => index.write().handle(&gvk, event),
            Err(error) => tracing::info!(%error, "Watch failed"),
        }
    }
}

// === impl DynamicCache ===

impl DynamicCache {
    pub fn new(index: SharedDynamicIndex) -> Self {
        Self(index)
    }
}

impl DynamicResourceLister for DynamicCache {
    fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<Arc<Value>> {
        self.0.read().get(gvk, namespace, name)
    }
}
