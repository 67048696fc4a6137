#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use policy_transport_core as core;
pub use policy_transport_k8s_api as k8s;
pub use policy_transport_k8s_index as index;

mod args;
pub mod client;
pub mod interceptor;
mod setup;

pub use self::{
    args::Args,
    interceptor::{Pipeline, PolicyLayer, PolicyService},
    setup::Setup,
};
