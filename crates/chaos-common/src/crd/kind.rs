//! Experiment kinds and the trait every experiment CRD implements

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::selector::SelectorSpec;
use super::status::{ChaosStatus, ChaosStatusBlock, DesiredPhase, Record};
use crate::{
    Error, CHAOS_API_GROUP, CHAOS_API_VERSION, CLEAN_FINALIZER_ANNOTATION, CLEAN_FINALIZER_FORCED,
    PAUSE_ANNOTATION, PAUSE_ANNOTATION_VALUE,
};

/// Closed set of experiment kinds the controller knows how to drive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChaosKind {
    /// Pod and container kills, pod failure
    PodChaos,
    /// Traffic control faults
    NetworkChaos,
    /// Filesystem faults
    IOChaos,
    /// CPU and memory stress
    StressChaos,
    /// HTTP request/response faults
    HTTPChaos,
    /// Kernel fault injection
    KernelChaos,
    /// Clock skew
    TimeChaos,
    /// EC2 instance and volume faults
    AWSChaos,
    /// GCE instance and disk faults
    GCPChaos,
}

/// Every kind, in registration order
pub const ALL_CHAOS_KINDS: &[ChaosKind] = &[
    ChaosKind::PodChaos,
    ChaosKind::NetworkChaos,
    ChaosKind::IOChaos,
    ChaosKind::StressChaos,
    ChaosKind::HTTPChaos,
    ChaosKind::KernelChaos,
    ChaosKind::TimeChaos,
    ChaosKind::AWSChaos,
    ChaosKind::GCPChaos,
];

impl ChaosKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PodChaos => "PodChaos",
            Self::NetworkChaos => "NetworkChaos",
            Self::IOChaos => "IOChaos",
            Self::StressChaos => "StressChaos",
            Self::HTTPChaos => "HTTPChaos",
            Self::KernelChaos => "KernelChaos",
            Self::TimeChaos => "TimeChaos",
            Self::AWSChaos => "AWSChaos",
            Self::GCPChaos => "GCPChaos",
        }
    }

    /// Plural resource name
    pub fn plural(&self) -> &'static str {
        match self {
            Self::PodChaos => "podchaos",
            Self::NetworkChaos => "networkchaos",
            Self::IOChaos => "iochaos",
            Self::StressChaos => "stresschaos",
            Self::HTTPChaos => "httpchaos",
            Self::KernelChaos => "kernelchaos",
            Self::TimeChaos => "timechaos",
            Self::AWSChaos => "awschaos",
            Self::GCPChaos => "gcpchaos",
        }
    }

    /// Name of the CustomResourceDefinition object
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural(), CHAOS_API_GROUP)
    }

    /// Name used for the per-kind controller and its event reporter
    pub fn controller_name(&self) -> String {
        format!("{}-controller", self.plural())
    }
}

impl fmt::Display for ChaosKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChaosKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_CHAOS_KINDS
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s) || k.plural() == s)
            .ok_or_else(|| Error::validation(format!("unknown chaos kind {s:?}")))
    }
}

/// A per-target sub-resource owned by an injector
///
/// Changes to a child resource re-enqueue every experiment whose records
/// point at the child's pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChildKind {
    /// API group
    pub group: &'static str,
    /// API version
    pub version: &'static str,
    /// Kind
    pub kind: &'static str,
    /// Plural resource name
    pub plural: &'static str,
}

impl ChildKind {
    /// `group/version`
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

/// Network faults applied to one pod
pub const POD_NETWORK_CHAOS: ChildKind = ChildKind {
    group: CHAOS_API_GROUP,
    version: CHAOS_API_VERSION,
    kind: "PodNetworkChaos",
    plural: "podnetworkchaos",
};

/// I/O faults applied to one pod
pub const POD_IO_CHAOS: ChildKind = ChildKind {
    group: CHAOS_API_GROUP,
    version: CHAOS_API_VERSION,
    kind: "PodIOChaos",
    plural: "podiochaos",
};

/// HTTP faults applied to one pod
pub const POD_HTTP_CHAOS: ChildKind = ChildKind {
    group: CHAOS_API_GROUP,
    version: CHAOS_API_VERSION,
    kind: "PodHttpChaos",
    plural: "podhttpchaos",
};

/// Implemented by every experiment CRD.
///
/// This is the only view of an experiment the reconcile pipeline needs: the
/// common status, the selectors, and the few spec fields that drive the
/// desired phase.
pub trait ChaosResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The kind's status type
    type Status: ChaosStatusBlock;

    /// Kind tag
    const KIND: ChaosKind;

    /// Status, if any has been written
    fn status_block(&self) -> Option<&Self::Status>;

    /// Status slot
    fn status_block_mut(&mut self) -> &mut Option<Self::Status>;

    /// Action string used to dispatch to an injector
    fn action(&self) -> &'static str;

    /// Raw duration string from the spec
    fn duration(&self) -> Option<&str>;

    /// Whether the injector terminates the fault by itself after one apply
    fn is_one_shot(&self) -> bool {
        false
    }

    /// Named selectors; records are created per key, in key order
    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec>;

    /// Common status, if any has been written
    fn chaos_status(&self) -> Option<&ChaosStatus> {
        self.status_block().map(ChaosStatusBlock::common)
    }

    /// Common status, created on first use
    fn chaos_status_mut(&mut self) -> &mut ChaosStatus {
        self.status_block_mut()
            .get_or_insert_with(Default::default)
            .common_mut()
    }

    /// Carry the kind-specific status of `from` over to `self`
    fn adopt_custom_status(&mut self, from: &Self) {
        if let Some(source) = from.status_block() {
            self.status_block_mut()
                .get_or_insert_with(Default::default)
                .adopt_custom(source);
        }
    }

    /// Records, if selection has happened
    fn records(&self) -> Option<&[Record]> {
        self.chaos_status().and_then(ChaosStatus::records)
    }

    /// Persisted desired phase
    fn desired_phase(&self) -> Option<DesiredPhase> {
        self.chaos_status()
            .and_then(|s| s.experiment.desired_phase)
    }

    /// Deletion has been requested
    fn is_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// The pause annotation is set to `"true"`
    fn is_paused(&self) -> bool {
        annotation(self, PAUSE_ANNOTATION) == Some(PAUSE_ANNOTATION_VALUE)
    }

    /// The forced-cleanup annotation is set
    fn is_cleanup_forced(&self) -> bool {
        annotation(self, CLEAN_FINALIZER_ANNOTATION) == Some(CLEAN_FINALIZER_FORCED)
    }
}

fn annotation<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
