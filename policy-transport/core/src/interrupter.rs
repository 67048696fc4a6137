//! Policy-aware hooks that run before overrides are resolved.
//!
//! Writes of the policy kinds themselves are routed through a chain of layers
//! that may patch the outgoing object, reject it, or stop the walk early.
//! Every other kind passes through the chain with an empty patch.

mod base;
mod policy;

#[cfg(test)]
mod tests;

pub use self::{base::BaseInterrupter, policy::PolicyInterrupter};

use crate::{policy::PolicyId, registry::Registry, Document, Error, Result};
use ahash::AHashMap as HashMap;
use json_patch::{Patch, PatchOperation};
use policy_transport_k8s_api::{
    ClusterOverridePolicy, GroupVersionKind, Operation, OverridePolicy, OverridePolicySpec,
};

#[derive(Debug)]
pub enum Interrupter {
    /// Rejects cluster-scoped policies carrying a namespace.
    ClusterPolicy,
    Policy(PolicyInterrupter),
    Base(BaseInterrupter),
}

#[derive(Debug)]
pub struct InterrupterChain {
    layers: Vec<Interrupter>,
    entries: HashMap<GroupVersionKind, Entry>,
}

#[derive(Copy, Clone, Debug)]
struct Entry {
    layer: usize,
    cluster: bool,
}

/// Whether the walk proceeds to the next layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// A write of a policy object.
#[derive(Debug)]
pub(crate) struct Request<'a> {
    object: &'a Document,
    previous: Option<&'a Document>,
    operation: Operation,
    cluster: bool,
}

// === impl InterrupterChain ===

impl InterrupterChain {
    pub fn new(policy: PolicyInterrupter, base: BaseInterrupter) -> Self {
        let layers = vec![
            Interrupter::ClusterPolicy,
            Interrupter::Policy(policy),
            Interrupter::Base(base),
        ];

        let mut entries = HashMap::new();
        entries.insert(
            Registry::gvk::<ClusterOverridePolicy>(),
            Entry {
                layer: 0,
                cluster: true,
            },
        );
        entries.insert(
            Registry::gvk::<OverridePolicy>(),
            Entry {
                layer: 1,
                cluster: false,
            },
        );

        Self { layers, entries }
    }

    /// Returns the patch to apply to `object` before it is written. Kinds
    /// without an entry get an empty patch.
    pub fn on_mutating(
        &self,
        object: &Document,
        previous: Option<&Document>,
        operation: Operation,
    ) -> Result<Patch> {
        let Some(entry) = self.entries.get(&object.gvk()) else {
            return Ok(Patch::default());
        };
        let req = Request {
            object,
            previous,
            operation,
            cluster: entry.cluster,
        };

        let mut ops = Vec::new();
        for layer in &self.layers[entry.layer..] {
            let flow = match layer {
                Interrupter::ClusterPolicy => cluster_policy(&req)?,
                Interrupter::Policy(policy) => policy.on_mutating(&req, &mut ops)?,
                Interrupter::Base(base) => base.on_mutating(&req, &mut ops)?,
            };
            if flow == Flow::Stop {
                break;
            }
        }

        tracing::trace!(kind = %object.kind(), name = ?object.name(), ops = ops.len(), "Interrupted");
        Ok(Patch(ops))
    }

    /// Checks `object` without modifying it, failing with the problems found.
    pub fn on_validating(
        &self,
        object: &Document,
        previous: Option<&Document>,
        operation: Operation,
    ) -> Result<()> {
        let Some(entry) = self.entries.get(&object.gvk()) else {
            return Ok(());
        };
        let req = Request {
            object,
            previous,
            operation,
            cluster: entry.cluster,
        };

        for layer in &self.layers[entry.layer..] {
            match layer {
                Interrupter::ClusterPolicy => {
                    cluster_policy(&req)?;
                }
                Interrupter::Policy(policy) => policy.on_validating(&req)?,
                Interrupter::Base(base) => base.on_validating(&req)?,
            }
        }
        Ok(())
    }
}

fn cluster_policy(req: &Request<'_>) -> Result<Flow> {
    if let Some(ns) = req.object.namespace() {
        return Err(req.invalid(vec![format!(
            "cluster-scoped policy must not set metadata.namespace (got {ns:?})"
        )]));
    }
    Ok(Flow::Continue)
}

// === impl Request ===

impl Request<'_> {
    fn id(&self) -> Result<PolicyId> {
        let name = self
            .object
            .name()
            .ok_or_else(|| self.invalid(vec!["metadata.name must be set".to_string()]))?;
        let namespace = if self.cluster {
            None
        } else {
            Some(
                self.object
                    .namespace()
                    .ok_or_else(|| self.invalid(vec!["metadata.namespace must be set".to_string()]))?
                    .to_string(),
            )
        };
        Ok(PolicyId {
            namespace,
            name: name.to_string(),
        })
    }

    fn spec(&self) -> Result<OverridePolicySpec> {
        spec(self.object)
    }

    fn previous_spec(&self) -> Option<OverridePolicySpec> {
        self.previous.and_then(|prev| spec(prev).ok())
    }

    fn invalid(&self, problems: Vec<String>) -> Error {
        Error::Validation {
            kind: self.object.kind().to_string(),
            name: self.object.name().unwrap_or_default().to_string(),
            problems,
        }
    }
}

fn spec(doc: &Document) -> Result<OverridePolicySpec> {
    match doc.as_value().get("spec") {
        None => Ok(OverridePolicySpec::default()),
        Some(spec) => serde_json::from_value(spec.clone())
            .map_err(|error| Error::Parse(format!("invalid policy spec: {error}"))),
    }
}

fn push(ops: &mut Vec<PatchOperation>, op: PatchOperation) {
    tracing::trace!(?op, "Patching");
    ops.push(op);
}
