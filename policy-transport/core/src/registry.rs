use ahash::AHashMap as HashMap;
use policy_transport_k8s_api::{
    ApiResource, ClusterOverridePolicy, GroupVersionKind, OverridePolicy, Resource,
};

/// The resource types known to the transport, keyed by group/version/kind.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    resources: HashMap<GroupVersionKind, ApiResource>,
}

impl Registry {
    /// A registry holding both policy kinds.
    pub fn with_policies() -> Self {
        let mut registry = Self::default();
        registry
            .register::<OverridePolicy>()
            .register::<ClusterOverridePolicy>();
        registry
    }

    pub fn register<K: Resource<DynamicType = ()>>(&mut self) -> &mut Self {
        self.register_resource(ApiResource::erase::<K>(&()))
    }

    pub fn register_resource(&mut self, resource: ApiResource) -> &mut Self {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        self.resources.insert(gvk, resource);
        self
    }

    pub fn gvk<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
        GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
    }

    /// Registered resources other than the policy kinds themselves.
    pub fn references(&self) -> impl Iterator<Item = &ApiResource> + '_ {
        let policies = [
            Self::gvk::<OverridePolicy>(),
            Self::gvk::<ClusterOverridePolicy>(),
        ];
        self.resources
            .iter()
            .filter(move |(gvk, _)| !policies.contains(*gvk))
            .map(|(_, resource)| resource)
    }
}
