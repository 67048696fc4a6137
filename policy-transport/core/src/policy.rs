use ahash::AHashMap as HashMap;
use policy_transport_k8s_api::{labels::Selector, Labels, OverridePolicySpec};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A scope-neutral view of an `OverridePolicy` or `ClusterOverridePolicy`.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub name: String,
    /// Unset for cluster-scoped policies.
    pub namespace: Option<String>,
    pub labels: Labels,
    pub spec: OverridePolicySpec,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope<'a> {
    Cluster,
    Namespace(&'a str),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId {
    pub namespace: Option<String>,
    pub name: String,
}

/// Read access to the known policies.
pub trait PolicyLister: Send + Sync {
    /// Returns the policies in `scope` whose labels match `selector`, ordered
    /// by name.
    fn list(&self, scope: Scope<'_>, selector: &Selector) -> Vec<Arc<Policy>>;

    fn get(&self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>>;
}

/// An in-memory set of policies, keyed by scope and name.
#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    cluster: BTreeMap<String, Arc<Policy>>,
    namespaces: HashMap<String, BTreeMap<String, Arc<Policy>>>,
}

// === impl Policy ===

impl Policy {
    pub fn id(&self) -> PolicyId {
        PolicyId {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn scope(&self) -> Scope<'_> {
        match self.namespace.as_deref() {
            Some(ns) => Scope::Namespace(ns),
            None => Scope::Cluster,
        }
    }
}

// === impl PolicyId ===

impl PolicyId {
    pub fn cluster(name: impl ToString) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// === impl PolicyLister ===

impl<L: PolicyLister + ?Sized> PolicyLister for Arc<L> {
    fn list(&self, scope: Scope<'_>, selector: &Selector) -> Vec<Arc<Policy>> {
        (**self).list(scope, selector)
    }

    fn get(&self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>> {
        (**self).get(scope, name)
    }
}

// === impl PolicySet ===

impl PolicySet {
    /// Inserts a policy, returning the entry it replaced.
    pub fn insert(&mut self, policy: Policy) -> Option<Arc<Policy>> {
        let policy = Arc::new(policy);
        let name = policy.name.clone();
        match policy.namespace.clone() {
            Some(ns) => self.namespaces.entry(ns).or_default().insert(name, policy),
            None => self.cluster.insert(name, policy),
        }
    }

    pub fn remove(&mut self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>> {
        match scope {
            Scope::Cluster => self.cluster.remove(name),
            Scope::Namespace(ns) => {
                let policies = self.namespaces.get_mut(ns)?;
                let removed = policies.remove(name);
                if policies.is_empty() {
                    self.namespaces.remove(ns);
                }
                removed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cluster.len() + self.namespaces.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scope(&self, scope: Scope<'_>) -> Option<&BTreeMap<String, Arc<Policy>>> {
        match scope {
            Scope::Cluster => Some(&self.cluster),
            Scope::Namespace(ns) => self.namespaces.get(ns),
        }
    }
}

impl PolicyLister for PolicySet {
    fn list(&self, scope: Scope<'_>, selector: &Selector) -> Vec<Arc<Policy>> {
        self.scope(scope)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|p| selector.matches(&p.labels))
            .cloned()
            .collect()
    }

    fn get(&self, scope: Scope<'_>, name: &str) -> Option<Arc<Policy>> {
        self.scope(scope)?.get(name).cloned()
    }
}

impl FromIterator<Policy> for PolicySet {
    fn from_iter<T: IntoIterator<Item = Policy>>(iter: T) -> Self {
        let mut set = Self::default();
        for policy in iter {
            set.insert(policy);
        }
        set
    }
}
