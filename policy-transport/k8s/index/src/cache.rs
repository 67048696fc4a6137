use crate::index::SharedIndex;
use futures::prelude::*;
use kube::runtime::{watcher, WatchStreamExt};
use policy_transport_core::{Error, Policy, PolicyLister, Scope};
use policy_transport_k8s_api::{
    labels::Selector, Api, Client, ClusterOverridePolicy, OverridePolicy, Resource,
};
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};
use tokio::{sync::watch, time};
use tracing::{info_span, Instrument};

/// A watch-backed, read-only view of the cluster's override policies.
#[derive(Clone)]
pub struct PolicyCache {
    index: SharedIndex,
    cluster_synced: watch::Receiver<bool>,
    namespaced_synced: watch::Receiver<bool>,
}

impl PolicyCache {
    /// Spawns watches on both policy kinds that feed `index`.
    pub fn spawn(client: Client, index: SharedIndex) -> Self {
        let policies = watch_all(Api::<OverridePolicy>::all(client.clone()));
        tokio::spawn(
            kubert::index::namespaced(index.clone(), policies)
                .instrument(info_span!("overridepolicies")),
        );

        let cluster_policies = watch_all(Api::<ClusterOverridePolicy>::all(client));
        tokio::spawn(
            kubert::index::cluster(index.clone(), cluster_policies)
                .instrument(info_span!("clusteroverridepolicies")),
        );

        Self::new(index)
    }

    pub(crate) fn new(index: SharedIndex) -> Self {
        let (cluster_synced, namespaced_synced) = {
            let index = index.read();
            (index.cluster_synced(), index.namespaced_synced())
        };
        Self {
            index,
            cluster_synced,
            namespaced_synced,
        }
    }

    /// Waits until both watches have listed every existing policy.
    pub async fn wait_for_sync(&self, timeout: time::Duration) -> Result<(), Error> {
        let mut cluster = self.cluster_synced.clone();
        let mut namespaced = self.namespaced_synced.clone();
        let ready = async move {
            // The index owns both senders, so neither channel closes while
            // the cache is alive.
            let _ = cluster.wait_for(|synced| *synced).await;
            let _ = namespaced.wait_for(|synced| *synced).await;
        };

        match time::timeout(timeout, ready).await {
            Ok(()) => {
                tracing::debug!("Policy caches synced");
                Ok(())
            }
            Err(_) => {
                let pending = [
                    (OverridePolicy::plural(&()), &self.namespaced_synced),
                    (ClusterOverridePolicy::plural(&()), &self.cluster_synced),
                ]
                .into_iter()
                .filter(|(_, rx)| !*rx.borrow())
                .map(|(plural, _)| plural.to_string())
                .collect::<Vec<_>>();
                Err(Error::CacheSyncTimeout(pending.join(", ")))
            }
        }
    }
}

impl PolicyLister for PolicyCache {
    fn list(&self, scope: Scope<'_>, selector: &Selector) -> Vec<Arc<Policy>> {
        self.index.read().list(scope, selector)
    }

    fn get(&self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>> {
        self.index.read().get(scope, name)
    }
}

impl fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyCache")
            .field("cluster_synced", &*self.cluster_synced.borrow())
            .field("namespaced_synced", &*self.namespaced_synced.borrow())
            .finish_non_exhaustive()
    }
}

/// Watches every object of kind `K`, retrying with backoff. Watch errors are
/// logged and dropped.
pub(crate) fn watch_all<K>(api: Api<K>) -> impl Stream<Item = watcher::Event<K>> + Send + 'static
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(error) => {
                    tracing::info!(%error, "Watch failed");
                    None
                }
            }
        })
}
