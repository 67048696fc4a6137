//! Enforces override policies on a client's outgoing writes.
//!
//! [`PolicyLayer`] wraps the HTTP service beneath a `kube::Client`. Create and
//! update requests have their bodies rewritten by a [`Pipeline`] before they
//! are sent; all other requests pass through untouched.

use crate::{
    core::{self, patch, Document, InterrupterChain, OverrideResolver, PolicyLister},
    k8s::Operation,
};
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};


pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),

    #[error(transparent)]
    Policy(#[from] core::Error),
}

/// Rewrites a single serialized object according to the cached policies.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<InterrupterChain>,
    resolver: OverrideResolver<Arc<dyn PolicyLister>>,
}

#[derive(Clone, Debug)]
pub struct PolicyLayer {
    pipeline: Arc<Pipeline>,
}

#[derive(Clone, Debug)]
pub struct PolicyService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

/// The admission operation a request method performs, if it writes an object.
pub fn operation(method: &http::Method) -> Option<Operation> {
    match *method {
        http::Method::POST => Some(Operation::Create),
        http::Method::PUT | http::Method::PATCH => Some(Operation::Update),
        _ => None,
    }
}

// === impl Pipeline ===

impl Pipeline {
    pub fn new(chain: Arc<InterrupterChain>, lister: Arc<dyn PolicyLister>) -> Self {
        Self {
            chain,
            resolver: OverrideResolver::new(lister),
        }
    }

    /// Returns the re-encoded object after interrupting or resolving overrides.
    ///
    /// A non-empty interrupter patch takes precedence: when one is returned, the
    /// resolver does not run.
    pub fn process(&self, body: &[u8], operation: Operation) -> core::Result<Vec<u8>> {
        let mut doc = Document::from_slice(body)?;

        let interrupted = self.chain.on_mutating(&doc, None, operation)?;
        if interrupted.0.is_empty() {
            self.resolver.apply(&mut doc, operation)?;
        } else {
            tracing::debug!(
                kind = %doc.kind(),
                name = ?doc.name(),
                ops = interrupted.0.len(),
                "Applying interrupter patch"
            );
            patch::apply(&mut doc, &interrupted)?;
        }

        doc.to_vec()
    }

    /// Checks a serialized object without modifying it.
    pub fn validate(&self, body: &[u8], operation: Operation) -> core::Result<()> {
        let doc = Document::from_slice(body)?;
        self.chain.on_validating(&doc, None, operation)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

// === impl PolicyLayer ===

impl PolicyLayer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> tower::Layer<S> for PolicyLayer {
    type Service = PolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

// === impl PolicyService ===

impl<S, B> tower::Service<http::Request<B>> for PolicyService<S>
where
    S: tower::Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: http_body::Body + From<Vec<u8>> + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let Some(operation) = operation(req.method()) else {
            tracing::trace!(method = %req.method(), uri = %req.uri(), "Passing through");
            let call = self.inner.call(req);
            return Box::pin(async move { call.await.map_err(Into::into) });
        };

        // The ready service moves into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = self.pipeline.clone();
        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|error| Error::Body(error.into()))?
                .to_bytes();

            let body = pipeline.process(&bytes, operation).map_err(|error| {
                tracing::debug!(%error, method = %parts.method, uri = %parts.uri, "Rejected write");
                Error::Policy(error)
            })?;
            tracing::trace!(%operation, uri = %parts.uri, bytes = body.len(), "Rewrote body");

            parts
                .headers
                .insert(http::header::CONTENT_LENGTH, http::HeaderValue::from(body.len()));
            let req = http::Request::from_parts(parts, B::from(body));
            inner.call(req).await.map_err(Into::into)
        })
    }
}
