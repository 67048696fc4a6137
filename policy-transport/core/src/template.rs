use crate::{Error, Result};
use minijinja::Environment;
use serde_json::Value;

/// A template compiled once at startup and rendered many times.
///
/// Templates render JSON text, which is parsed back into a value.
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    env: Environment<'static>,
}

impl CompiledTemplate {
    pub fn compile(name: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut env = Environment::new();
        env.add_template_owned(name.clone(), source.into())
            .map_err(|error| Error::TemplateCompile {
                name: name.clone(),
                reason: error.to_string(),
            })?;
        Ok(Self { name, env })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, bindings: &Value) -> Result<Value> {
        let out = self
            .env
            .get_template(&self.name)
            .and_then(|tmpl| tmpl.render(bindings))
            .map_err(|error| self.render_error(error))?;
        serde_json::from_str(&out).map_err(|error| Error::TemplateRender {
            name: self.name.clone(),
            reason: format!("output is not JSON: {error}"),
        })
    }

    /// Renders ad-hoc template text with this template's environment.
    pub fn render_str(&self, source: &str, bindings: &Value) -> Result<String> {
        self.env
            .render_str(source, bindings)
            .map_err(|error| self.render_error(error))
    }

    /// Checks that ad-hoc template text compiles.
    pub fn check(&self, source: &str) -> Result<()> {
        self.env
            .template_from_str(source)
            .map(drop)
            .map_err(|error| Error::TemplateCompile {
                name: self.name.clone(),
                reason: error.to_string(),
            })
    }

    fn render_error(&self, error: minijinja::Error) -> Error {
        Error::TemplateRender {
            name: self.name.clone(),
            reason: error.to_string(),
        }
    }
}
