use chrono::{DateTime, Utc};
use policy_transport_core::{Error, PolicyId};
use policy_transport_k8s_api::{
    annotations, Api, Client, ClusterOverridePolicy, OverridePolicy, Patch, PatchParams,
};
use serde_json::json;
use tokio::{sync::mpsc::UnboundedReceiver, time};

/// Records when a policy's rules were last observed to change.
#[derive(Debug, PartialEq)]
pub struct Update {
    pub id: PolicyId,
    pub patch: Patch<serde_json::Value>,
}

/// Applies [`Update`]s to policy objects, one at a time.
///
/// Failed patches are logged and dropped.
pub struct Controller {
    client: Client,
    updates: UnboundedReceiver<Update>,
    patch_timeout: time::Duration,
}

// === impl Update ===

impl Update {
    pub fn last_sync(id: PolicyId) -> Self {
        #[cfg(not(test))]
        let timestamp = Utc::now();
        #[cfg(test)]
        let timestamp = DateTime::<Utc>::UNIX_EPOCH;

        Self {
            id,
            patch: last_sync_patch(timestamp),
        }
    }
}

pub(crate) fn last_sync_patch(timestamp: DateTime<Utc>) -> Patch<serde_json::Value> {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
    Patch::Merge(json!({
        "metadata": {
            "annotations": {
                (annotations::LAST_SYNC_TIME): nanos.to_string(),
            },
        },
    }))
}

// === impl Controller ===

impl Controller {
    pub fn new(
        client: Client,
        updates: UnboundedReceiver<Update>,
        patch_timeout: time::Duration,
    ) -> Self {
        Self {
            client,
            updates,
            patch_timeout,
        }
    }

    pub async fn run(mut self) {
        while let Some(Update { id, patch }) = self.updates.recv().await {
            let result = match id.namespace.as_deref() {
                Some(ns) => {
                    let api = Api::<OverridePolicy>::namespaced(self.client.clone(), ns);
                    self.patch(api, &id, &patch).await
                }
                None => {
                    let api = Api::<ClusterOverridePolicy>::all(self.client.clone());
                    self.patch(api, &id, &patch).await
                }
            };

            match result {
                Ok(()) => tracing::debug!(policy = %id, "Recorded last sync time"),
                Err(error) => tracing::error!(%error, "Failed to write back policy"),
            }
        }
        tracing::debug!("Updates channel closed");
    }

    async fn patch<K>(
        &self,
        api: Api<K>,
        id: &PolicyId,
        patch: &Patch<serde_json::Value>,
    ) -> Result<(), Error>
    where
        K: Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    {
        let params = PatchParams::default();
        match time::timeout(self.patch_timeout, api.patch(&id.name, &params, patch)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(Error::Writeback {
                policy: id.to_string(),
                reason: error.to_string(),
            }),
            Err(_) => Err(Error::Writeback {
                policy: id.to_string(),
                reason: format!("patch timed out after {:?}", self.patch_timeout),
            }),
        }
    }
}
