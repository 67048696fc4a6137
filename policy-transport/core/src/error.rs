use policy_transport_k8s_api::labels::InvalidSelector;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse object: {0}")]
    Parse(String),

    #[error("invalid label selector: {0}")]
    Selector(#[from] InvalidSelector),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("unsupported patch operator {0:?}")]
    UnsupportedOperator(String),

    #[error("failed to compile template {name}: {reason}")]
    TemplateCompile { name: String, reason: String },

    #[error("failed to render template {name}: {reason}")]
    TemplateRender { name: String, reason: String },

    #[error("{kind} {name} is invalid: {}", problems.join("; "))]
    Validation {
        kind: String,
        name: String,
        problems: Vec<String>,
    },

    #[error("token rejected: {0}")]
    Token(String),

    #[error("failed to apply patch: {0}")]
    PatchApply(String),

    #[error("failed to encode object: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("timed out waiting for {0} to sync")]
    CacheSyncTimeout(String),

    #[error("failed to write back {policy}: {reason}")]
    Writeback { policy: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("malformed path {path:?}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("path {path:?} does not resolve")]
    NotFound { path: String },
}
