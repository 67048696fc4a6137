use crate::{
    core::{
        BaseInterrupter, HmacTokens, InterrupterChain, PolicyInterrupter, PolicyLister, Registry,
        TokenManager,
    },
    index::{self, Controller, DynamicCache, DynamicIndex, Index, PolicyCache},
    interceptor::{Pipeline, PolicyLayer},
    k8s::{ApiResource, Client},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

/// Starts the policy caches and builds the layer that enforces them.
#[derive(Clone, Debug)]
pub struct Setup {
    /// How long to wait for the initial listing of both policy kinds.
    pub sync_timeout: Duration,

    /// Bounds each `last-sync-time` write-back.
    pub patch_timeout: Duration,

    /// Signs policy tokens. A random secret is generated when unset, so
    /// tokens do not survive a restart.
    pub token_secret: Option<String>,

    /// Kinds that template overriders may reference via `valueRef`.
    pub references: Vec<ApiResource>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(60),
            patch_timeout: Duration::from_millis(5000),
            token_secret: None,
            references: Vec::new(),
        }
    }
}

impl Setup {
    /// Spawns the watch and write-back tasks on `client` and waits for the
    /// policy caches to sync.
    ///
    /// `client` must not itself be intercepted: policy write-backs would
    /// otherwise be rewritten by the policies they describe.
    pub async fn build(self, client: Client) -> Result<PolicyLayer> {
        let Self {
            sync_timeout,
            patch_timeout,
            token_secret,
            references,
        } = self;

        let mut registry = Registry::with_policies();
        for resource in references {
            registry.register_resource(resource);
        }

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Controller::new(client.clone(), updates_rx, patch_timeout)
                .run()
                .instrument(info_span!("writeback")),
        );

        let cache = PolicyCache::spawn(client.clone(), Index::shared(updates_tx));

        let objects = DynamicIndex::shared();
        for resource in registry.references() {
            tokio::spawn(
                index::dynamic::index(objects.clone(), client.clone(), resource.clone())
                    .instrument(info_span!("references", kind = %resource.kind)),
            );
        }

        cache
            .wait_for_sync(sync_timeout)
            .await
            .context("failed to sync policy caches")?;
        info!("Policy caches synced");

        let tokens: Arc<dyn TokenManager> = match token_secret {
            Some(secret) => Arc::new(HmacTokens::new(secret).context("invalid token secret")?),
            None => {
                info!("Generated a random token secret");
                Arc::new(HmacTokens::random())
            }
        };

        let lister: Arc<dyn PolicyLister> = Arc::new(cache);
        let base = BaseInterrupter::new(Arc::new(DynamicCache::new(objects)))
            .context("failed to compile policy templates")?;
        let chain = InterrupterChain::new(PolicyInterrupter::new(tokens, lister.clone()), base);

        Ok(PolicyLayer::new(Pipeline::new(Arc::new(chain), lister)))
    }
}
