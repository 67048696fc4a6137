#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;

pub use self::{
    labels::Labels,
    policy::{
        ClusterOverridePolicy, ClusterOverridePolicySpec, ObjectReference, Operation, Operator,
        OverridePolicy, OverridePolicySpec, Overriders, PlaintextOverrider, ResourceSelector,
        RuleWithOperation, TemplateOverrider,
    },
};
pub use k8s_openapi::api::core::v1::Pod;
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, Error, Resource,
};

/// Well-known annotations written by the policy transport.
pub mod annotations {
    /// Compact JSON record of the namespace-scoped overrides applied to an object.
    pub const APPLIED_OVERRIDES: &str = "policy.kcloudlabs.io/applied-overrides";

    /// Compact JSON record of the cluster-scoped overrides applied to an object.
    pub const APPLIED_CLUSTER_OVERRIDES: &str = "policy.kcloudlabs.io/applied-cluster-overrides";

    /// Nanosecond timestamp of the last observed change to a policy's rules.
    pub const LAST_SYNC_TIME: &str = "policy.kcloudlabs.io/last-sync-time";

    /// Authorization token bound to a policy object's identity.
    pub const TOKEN: &str = "policy.kcloudlabs.io/token";
}
