//! Target identifiers stored in experiment records.
//!
//! Pod targets are `namespace/name`, container targets
//! `namespace/name/container`. Cloud targets are opaque JSON blobs and are
//! not parsed here.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A pod or container addressed by a record id
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodTarget {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Container name for container-level targets
    pub container: Option<String>,
}

impl PodTarget {
    /// Target addressing a whole pod
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: None,
        }
    }

    /// Target addressing one container of a pod
    pub fn container(
        namespace: impl Into<String>,
        name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: Some(container.into()),
        }
    }

    /// Whether this target lives on the pod `namespace/name`
    pub fn is_on_pod(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

impl fmt::Display for PodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}/{}/{}", self.namespace, self.name, container),
            None => write!(f, "{}/{}", self.namespace, self.name),
        }
    }
}

impl FromStr for PodTarget {
    type Err = Error;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = id.split('/').collect();
        match parts.as_slice() {
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::pod(*ns, *name)),
            [ns, name, container]
                if !ns.is_empty() && !name.is_empty() && !container.is_empty() =>
            {
                Ok(Self::container(*ns, *name, *container))
            }
            _ => Err(Error::validation(format!("malformed pod target id {id:?}"))),
        }
    }
}
