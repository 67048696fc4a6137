use crate::interceptor::PolicyLayer;
use hyper_util::{client::legacy::Client as HttpClient, rt::TokioExecutor};
use kube::client::ConfigExt;
use tower::{BoxError, ServiceBuilder};

/// Builds a client whose create and update requests pass through `policy`.
///
/// Authentication is applied before the policy layer sees a request.
pub fn build(config: kube::Config, policy: PolicyLayer) -> Result<kube::Client, kube::Error> {
    let https = config.rustls_https_connector()?;
    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .option_layer(config.auth_layer()?)
        .layer(policy)
        .map_err(BoxError::from)
        .service(HttpClient::builder(TokioExecutor::new()).build(https));
    Ok(kube::Client::new(service, config.default_namespace))
}
