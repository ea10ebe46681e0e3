//! Cloud instance selection

use chaos_common::crd::{CloudProvider, CloudSelector};
use serde::{Deserialize, Serialize};

use crate::SelectError;

/// Decoded form of a cloud record id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudTarget {
    /// Vendor
    pub provider: CloudProvider,
    /// Region or zone
    pub region: String,
    /// GCP project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Instance id or name
    pub instance: String,
    /// Credentials secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

impl CloudTarget {
    /// Target for `instance` under `selector`
    pub fn new(selector: &CloudSelector, instance: impl Into<String>) -> Self {
        Self {
            provider: selector.provider,
            region: selector.region.clone(),
            project: selector.project.clone(),
            instance: instance.into(),
            secret_name: selector.secret_name.clone(),
        }
    }

    /// JSON record id
    pub fn to_id(&self) -> Result<String, SelectError> {
        serde_json::to_string(self).map_err(|e| SelectError::invalid(e.to_string()))
    }

    /// Parse a record id produced by [`to_id`](Self::to_id)
    pub fn from_id(id: &str) -> Result<Self, SelectError> {
        serde_json::from_str(id).map_err(|e| SelectError::invalid(e.to_string()))
    }
}

/// Candidate instance ids: the selector's explicit instances.
///
/// Filter tuples need a vendor API to resolve and are rejected as an
/// invalid selector.
pub fn candidate_instances(selector: &CloudSelector) -> Result<Vec<String>, SelectError> {
    if !selector.filters.is_empty() {
        return Err(SelectError::invalid(format!(
            "{:?} instance filters are not supported, list instances explicitly",
            selector.provider
        )));
    }
    Ok(selector.instances.clone())
}
