use crate::{Document, Error, PathError, Result};
use json_patch::{
    AddOperation, Patch, PatchErrorKind, PatchOperation, RemoveOperation, ReplaceOperation,
};
use jsonptr::PointerBuf;
use policy_transport_k8s_api::{Operator, Overriders, PlaintextOverrider};
use serde_json::Value;

/// Applies `patch` to `doc`. The document is only modified if every operation
/// succeeds and the result is still a well-formed object.
pub fn apply(doc: &mut Document, patch: &Patch) -> Result<()> {
    if patch.0.is_empty() {
        return Ok(());
    }

    let mut value = doc.as_value().clone();
    json_patch::patch(&mut value, &patch.0).map_err(|error| match error.kind {
        PatchErrorKind::InvalidPointer => Error::from(PathError::NotFound {
            path: error.path.to_string(),
        }),
        _ => Error::PatchApply(error.to_string()),
    })?;
    *doc = Document::from_value(value)?;
    Ok(())
}

/// Builds the patch for a rule's overriders: plaintext first, then rendered.
pub fn overriders(overriders: &Overriders) -> Result<Patch> {
    let ops = overriders
        .plaintext
        .iter()
        .chain(&overriders.rendered)
        .map(operation)
        .collect::<Result<Vec<_>>>()?;
    Ok(Patch(ops))
}

pub fn operation(overrider: &PlaintextOverrider) -> Result<PatchOperation> {
    let value = || overrider.value.clone().unwrap_or(Value::Null);
    let op = match &overrider.operator {
        Operator::Add => PatchOperation::Add(AddOperation {
            path: pointer(&overrider.path)?,
            value: value(),
        }),
        Operator::Replace => PatchOperation::Replace(ReplaceOperation {
            path: pointer(&overrider.path)?,
            value: value(),
        }),
        Operator::Remove => PatchOperation::Remove(RemoveOperation {
            path: pointer(&overrider.path)?,
        }),
        Operator::Unknown(op) => return Err(Error::UnsupportedOperator(op.clone())),
    };
    Ok(op)
}

pub fn pointer(path: &str) -> Result<PointerBuf> {
    PointerBuf::parse(path).map_err(|error| {
        PathError::Malformed {
            path: path.to_string(),
            reason: error.to_string(),
        }
        .into()
    })
}
