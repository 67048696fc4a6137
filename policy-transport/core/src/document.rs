use crate::{Error, Result};
use policy_transport_k8s_api::{GroupVersionKind, Labels};
use serde_json::{Map, Value};

/// A single Kubernetes object decoded from a request body.
///
/// A document is always a JSON object carrying non-empty `apiVersion` and
/// `kind` strings. When present, `metadata` is an object.
#[derive(Clone, Debug, PartialEq)]
pub struct Document(Value);

impl Document {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value = serde_json::from_slice(bytes).map_err(|error| Error::Parse(error.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Parse("body is not a JSON object".to_string()))?;
        for field in ["apiVersion", "kind"] {
            match obj.get(field).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                _ => return Err(Error::Parse(format!("missing {field}"))),
            }
        }
        match obj.get("metadata") {
            None | Some(Value::Object(_)) => {}
            Some(_) => return Err(Error::Parse("metadata is not an object".to_string())),
        }
        Ok(Self(value))
    }

    pub fn api_version(&self) -> &str {
        self.0["apiVersion"].as_str().unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.0["kind"].as_str().unwrap_or_default()
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version().split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version()),
        };
        GroupVersionKind::gvk(group, version, self.kind())
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    pub fn labels(&self) -> Labels {
        self.metadata()
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()?
            .get("annotations")?
            .as_object()?
            .get(key)?
            .as_str()
    }

    pub fn has_annotations(&self) -> bool {
        self.metadata()
            .and_then(|m| m.get("annotations"))
            .is_some_and(Value::is_object)
    }

    /// Sets an annotation, creating `metadata.annotations` as needed.
    pub fn set_annotation(&mut self, key: &str, value: String) -> Result<()> {
        let obj = self
            .0
            .as_object_mut()
            .ok_or_else(|| Error::Parse("body is not a JSON object".to_string()))?;
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| Error::Parse("metadata is not an object".to_string()))?;
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if annotations.is_null() {
            *annotations = Value::Object(Map::new());
        }
        annotations
            .as_object_mut()
            .ok_or_else(|| Error::Parse("metadata.annotations is not an object".to_string()))?
            .insert(key.to_string(), Value::String(value));
        Ok(())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(Error::Encode)
    }

    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata")?.as_object()
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.metadata()?
            .get(field)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}
