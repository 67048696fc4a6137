use super::{push, Flow, Request};
use crate::{
    patch,
    policy::{PolicyLister, Scope},
    token::TokenManager,
    Result,
};
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use policy_transport_k8s_api::{annotations, Operation};
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Binds policy objects to a token and skips re-rendering unchanged policies.
#[derive(Clone)]
pub struct PolicyInterrupter {
    tokens: Arc<dyn TokenManager>,
    lister: Arc<dyn PolicyLister>,
}

impl PolicyInterrupter {
    pub fn new(tokens: Arc<dyn TokenManager>, lister: Arc<dyn PolicyLister>) -> Self {
        Self { tokens, lister }
    }

    pub(super) fn on_mutating(
        &self,
        req: &Request<'_>,
        ops: &mut Vec<PatchOperation>,
    ) -> Result<Flow> {
        let id = req.id()?;

        match (req.operation, req.object.annotation(annotations::TOKEN)) {
            (Operation::Update, Some(token)) => self.tokens.validate(&id, token)?,
            _ => {
                let token = self.tokens.issue(&id)?;
                if !req.object.has_annotations() {
                    push(
                        ops,
                        PatchOperation::Add(AddOperation {
                            path: patch::pointer("/metadata/annotations")?,
                            value: Value::Object(Default::default()),
                        }),
                    );
                }
                push(
                    ops,
                    PatchOperation::Add(AddOperation {
                        path: PointerBuf::from_tokens(["metadata", "annotations", annotations::TOKEN]),
                        value: Value::String(token),
                    }),
                );
                tracing::debug!(policy = %id, "Issued token");
            }
        }

        let spec = req.spec()?;
        let previous = match req.previous_spec() {
            Some(previous) => Some(previous),
            None => {
                let scope = match id.namespace.as_deref() {
                    Some(ns) => Scope::Namespace(ns),
                    None => Scope::Cluster,
                };
                self.lister.get(scope, &id.name).map(|p| p.spec.clone())
            }
        };

        if previous.as_ref() == Some(&spec) && spec.is_rendered() {
            tracing::trace!(policy = %id, "Policy unchanged");
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    pub(super) fn on_validating(&self, req: &Request<'_>) -> Result<()> {
        let id = req.id()?;
        if req.operation == Operation::Update {
            if let Some(token) = req.object.annotation(annotations::TOKEN) {
                self.tokens.validate(&id, token)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PolicyInterrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyInterrupter").finish_non_exhaustive()
    }
}
