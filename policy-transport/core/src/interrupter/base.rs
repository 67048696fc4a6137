use super::{push, Flow, Request};
use crate::{dynamic::DynamicResourceLister, template::CompiledTemplate, Error, Result};
use json_patch::{AddOperation, PatchOperation, RemoveOperation};
use jsonptr::PointerBuf;
use policy_transport_k8s_api::{GroupVersionKind, PlaintextOverrider, TemplateOverrider};
use serde_json::{json, Value};
use std::{fmt, sync::Arc};

const MUTATING: &str = include_str!("../../templates/mutating.jinja");
const VALIDATING: &str = include_str!("../../templates/validating.jinja");

/// Renders template overriders into plaintext and validates policy objects.
pub struct BaseInterrupter {
    mutating: CompiledTemplate,
    validating: CompiledTemplate,
    references: Arc<dyn DynamicResourceLister>,
}

impl BaseInterrupter {
    /// Compiles the built-in templates.
    pub fn new(references: Arc<dyn DynamicResourceLister>) -> Result<Self> {
        Ok(Self {
            mutating: CompiledTemplate::compile("mutating", MUTATING)?,
            validating: CompiledTemplate::compile("validating", VALIDATING)?,
            references,
        })
    }

    pub(super) fn on_mutating(
        &self,
        req: &Request<'_>,
        ops: &mut Vec<PatchOperation>,
    ) -> Result<Flow> {
        let spec = req.spec()?;
        for (i, rule) in spec.override_rules.iter().enumerate() {
            let index = i.to_string();
            let path = PointerBuf::from_tokens([
                "spec",
                "overrideRules",
                index.as_str(),
                "overriders",
                "rendered",
            ]);

            let overriders = &rule.overriders;
            if overriders.template.is_empty() {
                if !overriders.rendered.is_empty() {
                    push(ops, PatchOperation::Remove(RemoveOperation { path }));
                }
                continue;
            }

            let rendered = overriders
                .template
                .iter()
                .map(|t| self.render(req, t))
                .collect::<Result<Vec<_>>>()?;
            if rendered != overriders.rendered {
                let value = serde_json::to_value(&rendered).map_err(Error::Encode)?;
                push(ops, PatchOperation::Add(AddOperation { path, value }));
            }
        }
        Ok(Flow::Stop)
    }

    pub(super) fn on_validating(&self, req: &Request<'_>) -> Result<()> {
        let bindings = json!({
            "object": req.object.as_value(),
            "operation": req.operation,
        });
        let mut problems = match self.validating.render(&bindings)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(problem) => Some(problem),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            _ => {
                return Err(Error::TemplateRender {
                    name: self.validating.name().to_string(),
                    reason: "output is not a list".to_string(),
                })
            }
        };

        // Malformed specs are reported by the template above.
        if let Ok(spec) = req.spec() {
            for (i, rule) in spec.override_rules.iter().enumerate() {
                for (j, t) in rule.overriders.template.iter().enumerate() {
                    if let Err(error) = self.mutating.check(&t.value) {
                        problems.push(format!(
                            "spec.overrideRules[{i}].overriders.template[{j}].value: {error}"
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            return Ok(());
        }
        Err(req.invalid(problems))
    }

    fn render(&self, req: &Request<'_>, overrider: &TemplateOverrider) -> Result<PlaintextOverrider> {
        let reference = match overrider.value_ref.as_ref() {
            None => None,
            Some(r) => {
                let (group, version) = match r.api_version.split_once('/') {
                    Some((group, version)) => (group, version),
                    None => ("", r.api_version.as_str()),
                };
                let gvk = GroupVersionKind::gvk(group, version, &r.kind);
                let namespace = r.namespace.as_deref().or(req.object.namespace());
                let object = self.references.get(&gvk, namespace, &r.name).ok_or_else(|| {
                    Error::TemplateRender {
                        name: overrider.path.clone(),
                        reason: format!("referenced {} {} not found", r.kind, r.name),
                    }
                })?;
                Some(object)
            }
        };

        let bindings = json!({
            "policy": req.object.as_value(),
            "ref": reference.as_deref(),
        });
        let text = self.mutating.render_str(&overrider.value, &bindings)?;
        // Rendered text that is not JSON is used as a string value.
        let value = serde_json::from_str(text.trim()).unwrap_or(Value::String(text));

        let out = self.mutating.render(&json!({
            "overrider": overrider,
            "value": value,
        }))?;
        serde_json::from_value(out).map_err(|error| Error::TemplateRender {
            name: self.mutating.name().to_string(),
            reason: error.to_string(),
        })
    }
}

impl fmt::Debug for BaseInterrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseInterrupter")
            .field("mutating", &self.mutating.name())
            .field("validating", &self.validating.name())
            .finish_non_exhaustive()
    }
}
