use crate::{
    client,
    k8s::{Api, ApiResource, Client, GroupVersionKind, Pod, PostParams, ResourceExt},
    Setup,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "policy-transport",
    about = "Writes a pod through a client that enforces override policies"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "policy_transport=info,warn",
        env = "POLICY_TRANSPORT_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(long, default_value = "60")]
    sync_timeout_secs: u64,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Secret used to sign policy tokens.
    #[clap(long, env = "POLICY_TRANSPORT_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// A kind that template overriders may reference, as
    /// `group/version/Kind/plural` (`version/Kind/plural` for the core group).
    #[clap(long = "reference-resource")]
    reference_resources: Vec<ReferenceResource>,

    #[clap(long, default_value = "default")]
    namespace: String,

    /// The pod to annotate.
    #[clap(long)]
    pod: String,

    /// The annotation to set, as `key=value`.
    #[clap(long, default_value = "policy.kcloudlabs.io/demo=true")]
    annotation: Annotation,
}

#[derive(Clone, Debug)]
struct ReferenceResource(ApiResource);

#[derive(Clone, Debug)]
struct Annotation {
    key: String,
    value: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            sync_timeout_secs,
            patch_timeout_ms,
            token_secret,
            reference_resources,
            namespace,
            pod,
            annotation,
        } = self;

        log_format.try_init(log_level)?;

        let config = kube::Config::infer()
            .await
            .context("failed to load kubeconfig")?;

        // Policies are watched and written back without interception.
        let plain = Client::try_from(config.clone())?;
        let layer = Setup {
            sync_timeout: Duration::from_secs(sync_timeout_secs),
            patch_timeout: Duration::from_millis(patch_timeout_ms),
            token_secret,
            references: reference_resources
                .into_iter()
                .map(|ReferenceResource(r)| r)
                .collect(),
        }
        .build(plain)
        .await?;

        let client = client::build(config, layer)?;
        let pods = Api::<Pod>::namespaced(client, &namespace);
        let mut object = pods
            .get(&pod)
            .await
            .with_context(|| format!("failed to get pod {namespace}/{pod}"))?;
        object
            .annotations_mut()
            .insert(annotation.key, annotation.value);

        let written = pods
            .replace(&pod, &PostParams::default(), &object)
            .await
            .with_context(|| format!("failed to update pod {namespace}/{pod}"))?;
        info!(%namespace, name = %pod, annotations = ?written.annotations(), "Updated pod");
        Ok(())
    }
}

impl std::str::FromStr for ReferenceResource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s.split('/').collect::<Vec<_>>();
        let (group, version, kind, plural) = match parts[..] {
            [version, kind, plural] => ("", version, kind, plural),
            [group, version, kind, plural] => (group, version, kind, plural),
            _ => bail!("invalid resource {s:?}: expected group/version/Kind/plural"),
        };
        if version.is_empty() || kind.is_empty() || plural.is_empty() {
            bail!("invalid resource {s:?}: version, kind and plural must be set");
        }
        let gvk = GroupVersionKind::gvk(group, version, kind);
        Ok(Self(ApiResource::from_gvk_with_plural(&gvk, plural)))
    }
}

impl std::str::FromStr for Annotation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => bail!("invalid annotation {s:?}: expected key=value"),
        }
    }
}
