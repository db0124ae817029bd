//! Object identity used for deduplication and cache lookups

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::error::KeyError;

/// `namespace/name` identity of one object within a kind.
///
/// Cluster-scoped objects have an empty namespace and display as just `name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Object namespace, empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a key from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the key of a Kubernetes object from its metadata
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        let name = obj.meta().name.clone().ok_or(KeyError::Unnamed)?;
        Ok(Self {
            namespace: obj.namespace().unwrap_or_default(),
            name,
        })
    }

    /// Key of another object in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => return Err(KeyError::Malformed(s.to_string())),
        };
        if name.is_empty() {
            return Err(KeyError::EmptyName(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}
