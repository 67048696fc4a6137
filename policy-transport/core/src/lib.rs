#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod document;
pub mod dynamic;
mod error;
pub mod interrupter;
pub mod overrides;
pub mod patch;
pub mod policy;
pub mod registry;
pub mod template;
pub mod token;

pub use self::{
    document::Document,
    dynamic::{DynamicResourceLister, NoReferences},
    error::{Error, PathError, Result},
    interrupter::{BaseInterrupter, InterrupterChain, PolicyInterrupter},
    overrides::{AppliedOverrides, OverridePolicyItem, OverrideResolver, Resolution},
    policy::{Policy, PolicyId, PolicyLister, PolicySet, Scope},
    registry::Registry,
    template::CompiledTemplate,
    token::{HmacTokens, TokenManager},
};
