//! Experiment CRDs
//!
//! One CustomResource per fault family. Specs flatten their selector so the
//! YAML reads `spec.selector`, `spec.mode`, `spec.value` like every other
//! chaos resource.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::kind::{ChaosKind, ChaosResource};
use super::selector::{
    CloudFilter, CloudProvider, CloudSelector, ContainerSelector, PodSelector, SelectorSpec,
    DEFAULT_SELECTOR_KEY, NETWORK_TARGET_SELECTOR_KEY,
};
use super::status::{ChaosStatus, InstancesStatus, StressChaosStatus};

macro_rules! status_accessors {
    ($status:ty) => {
        type Status = $status;

        fn status_block(&self) -> Option<&$status> {
            self.status.as_ref()
        }

        fn status_block_mut(&mut self) -> &mut Option<$status> {
            &mut self.status
        }
    };
}

fn single(spec: SelectorSpec) -> BTreeMap<String, SelectorSpec> {
    BTreeMap::from([(DEFAULT_SELECTOR_KEY.to_string(), spec)])
}

// =============================================================================
// PodChaos
// =============================================================================

/// What to do to the selected pods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PodChaosAction {
    /// Delete the pod
    PodKill,
    /// Replace container images with a pause image for the duration
    PodFailure,
    /// Kill named containers
    ContainerKill,
}

impl PodChaosAction {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PodKill => "pod-kill",
            Self::PodFailure => "pod-failure",
            Self::ContainerKill => "container-kill",
        }
    }
}

/// Kill or fail pods and containers
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "PodChaos",
    plural = "podchaos",
    namespaced,
    status = "ChaosStatus",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.experiment.desiredPhase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodChaosSpec {
    /// Target pods or containers
    #[serde(flatten)]
    pub selector: ContainerSelector,
    /// Fault to inject
    pub action: PodChaosAction,
    /// How long the fault lasts (pod-failure only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Grace period in seconds for pod-kill
    #[serde(default)]
    pub grace_period: i64,
}

impl ChaosResource for PodChaos {
    status_accessors!(ChaosStatus);

    const KIND: ChaosKind = ChaosKind::PodChaos;

    fn action(&self) -> &'static str {
        self.spec.action.as_str()
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn is_one_shot(&self) -> bool {
        matches!(
            self.spec.action,
            PodChaosAction::PodKill | PodChaosAction::ContainerKill
        )
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        match self.spec.action {
            PodChaosAction::ContainerKill => {
                single(SelectorSpec::Container(self.spec.selector.clone()))
            }
            _ => single(SelectorSpec::Pod(self.spec.selector.pod.clone())),
        }
    }
}

// =============================================================================
// NetworkChaos
// =============================================================================

/// Traffic control fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NetworkChaosAction {
    /// Combined netem parameters
    Netem,
    /// Latency
    Delay,
    /// Packet loss
    Loss,
    /// Packet duplication
    Duplicate,
    /// Packet corruption
    Corrupt,
    /// Drop traffic between source and target
    Partition,
    /// Rate limit
    Bandwidth,
}

impl NetworkChaosAction {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Netem => "netem",
            Self::Delay => "delay",
            Self::Loss => "loss",
            Self::Duplicate => "duplicate",
            Self::Corrupt => "corrupt",
            Self::Partition => "partition",
            Self::Bandwidth => "bandwidth",
        }
    }
}

/// Which traffic direction is affected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source to target
    #[default]
    To,
    /// Target to source
    From,
    /// Both ways
    Both,
}

/// Latency parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DelaySpec {
    /// Added latency, e.g. `100ms`
    pub latency: String,
    /// Jitter, e.g. `10ms`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<String>,
    /// Correlation with the previous packet, percent as string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

/// Loss parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LossSpec {
    /// Loss percentage as string
    pub loss: String,
    /// Correlation percentage as string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

/// Bandwidth parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthSpec {
    /// Rate, e.g. `1mbps`
    pub rate: String,
    /// Bytes queued waiting for tokens
    pub limit: u32,
    /// Bucket size in bytes
    pub buffer: u32,
}

/// Network faults between pods or towards external hosts
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "NetworkChaos",
    plural = "networkchaos",
    namespaced,
    status = "InstancesStatus",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkChaosSpec {
    /// Source pods
    #[serde(flatten)]
    pub selector: PodSelector,
    /// Fault to inject
    pub action: NetworkChaosAction,
    /// Affected direction relative to `target`
    #[serde(default)]
    pub direction: Direction,
    /// Optional peer pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PodSelector>,
    /// External hosts or CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_targets: Vec<String>,
    /// Network device, defaults to eth0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Latency parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
    /// Loss parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<LossSpec>,
    /// Bandwidth parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<BandwidthSpec>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for NetworkChaos {
    status_accessors!(InstancesStatus);

    const KIND: ChaosKind = ChaosKind::NetworkChaos;

    fn action(&self) -> &'static str {
        self.spec.action.as_str()
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        let mut specs = single(SelectorSpec::Pod(self.spec.selector.clone()));
        if let Some(target) = &self.spec.target {
            specs.insert(
                NETWORK_TARGET_SELECTOR_KEY.to_string(),
                SelectorSpec::Pod(target.clone()),
            );
        }
        specs
    }
}

// =============================================================================
// IOChaos
// =============================================================================

/// Filesystem fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum IoChaosAction {
    /// Delay syscalls
    Latency,
    /// Fail syscalls with an errno
    Fault,
    /// Override file attributes
    AttrOverride,
    /// Corrupt read/write data
    Mistake,
}

impl IoChaosAction {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Fault => "fault",
            Self::AttrOverride => "attrOverride",
            Self::Mistake => "mistake",
        }
    }
}

/// Filesystem faults inside containers
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "IOChaos",
    plural = "iochaos",
    namespaced,
    status = "InstancesStatus",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IOChaosSpec {
    /// Target containers
    #[serde(flatten)]
    pub selector: ContainerSelector,
    /// Fault to inject
    pub action: IoChaosAction,
    /// Mount point of the affected volume
    pub volume_path: String,
    /// Glob of affected files below the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Added latency for `latency`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    /// Errno returned for `fault`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<u32>,
    /// Share of affected calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
    /// Affected syscalls; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for IOChaos {
    status_accessors!(InstancesStatus);

    const KIND: ChaosKind = ChaosKind::IOChaos;

    fn action(&self) -> &'static str {
        self.spec.action.as_str()
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Container(self.spec.selector.clone()))
    }
}

// =============================================================================
// StressChaos
// =============================================================================

/// CPU stressor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuStressor {
    /// Worker processes
    pub workers: u32,
    /// Load per worker, percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<u32>,
}

/// Memory stressor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStressor {
    /// Worker processes
    pub workers: u32,
    /// Memory per worker, e.g. `256MB` or `50%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Stressors to run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stressors {
    /// CPU stressor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStressor>,
    /// Memory stressor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStressor>,
}

/// CPU and memory pressure inside containers
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "StressChaos",
    plural = "stresschaos",
    namespaced,
    status = "StressChaosStatus",
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StressChaosSpec {
    /// Target containers
    #[serde(flatten)]
    pub selector: ContainerSelector,
    /// Structured stressors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stressors: Option<Stressors>,
    /// Raw stress-ng arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stressng_stressors: Option<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for StressChaos {
    status_accessors!(StressChaosStatus);

    const KIND: ChaosKind = ChaosKind::StressChaos;

    fn action(&self) -> &'static str {
        "stress"
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Container(self.spec.selector.clone()))
    }
}

// =============================================================================
// HTTPChaos
// =============================================================================

/// Which half of an HTTP exchange is affected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum HttpTarget {
    /// Requests entering the pod
    Request,
    /// Responses leaving the pod
    Response,
}

/// HTTP faults on a pod's listening port
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "HTTPChaos",
    plural = "httpchaos",
    namespaced,
    status = "InstancesStatus",
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPChaosSpec {
    /// Target pods
    #[serde(flatten)]
    pub selector: PodSelector,
    /// Request or Response
    pub target: HttpTarget,
    /// Port the application listens on
    pub port: i32,
    /// Path glob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Abort the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<bool>,
    /// Added latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for HTTPChaos {
    status_accessors!(InstancesStatus);

    const KIND: ChaosKind = ChaosKind::HTTPChaos;

    fn action(&self) -> &'static str {
        "http"
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Pod(self.spec.selector.clone()))
    }
}

// =============================================================================
// KernelChaos
// =============================================================================

/// One frame of the call chain a kernel fault matches
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Function name
    pub funcname: String,
    /// Parameter list
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,
    /// Predicate on the parameters
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub predicate: String,
}

/// Kernel fault request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailKernRequest {
    /// Call chain to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callchain: Vec<Frame>,
    /// 0: kmalloc, 1: alloc_page, 2: bio
    pub failtype: i32,
    /// Extra headers for the predicate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    /// Failure probability, percent
    #[serde(default)]
    pub probability: u32,
    /// Maximum number of failures, 0 for unlimited
    #[serde(default)]
    pub times: u32,
}

/// Kernel fault injection through BPF
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "KernelChaos",
    plural = "kernelchaos",
    namespaced,
    status = "ChaosStatus",
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KernelChaosSpec {
    /// Target pods
    #[serde(flatten)]
    pub selector: PodSelector,
    /// Fault definition
    pub fail_kern_request: FailKernRequest,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for KernelChaos {
    status_accessors!(ChaosStatus);

    const KIND: ChaosKind = ChaosKind::KernelChaos;

    fn action(&self) -> &'static str {
        "kernel"
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Pod(self.spec.selector.clone()))
    }
}

// =============================================================================
// TimeChaos
// =============================================================================

/// Clock skew inside containers
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "TimeChaos",
    plural = "timechaos",
    namespaced,
    status = "ChaosStatus",
    printcolumn = r#"{"name":"Offset","type":"string","jsonPath":".spec.timeOffset"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TimeChaosSpec {
    /// Target containers
    #[serde(flatten)]
    pub selector: ContainerSelector,
    /// Offset added to the clock, e.g. `-5m`
    pub time_offset: String,
    /// Affected clocks, defaults to CLOCK_REALTIME
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clock_ids: Vec<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for TimeChaos {
    status_accessors!(ChaosStatus);

    const KIND: ChaosKind = ChaosKind::TimeChaos;

    fn action(&self) -> &'static str {
        "time"
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Container(self.spec.selector.clone()))
    }
}

// =============================================================================
// AWSChaos
// =============================================================================

/// EC2 fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AwsChaosAction {
    /// Stop the instance for the duration
    Ec2Stop,
    /// Restart the instance once
    Ec2Restart,
    /// Detach a volume for the duration
    DetachVolume,
}

impl AwsChaosAction {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ec2Stop => "ec2-stop",
            Self::Ec2Restart => "ec2-restart",
            Self::DetachVolume => "detach-volume",
        }
    }
}

/// EC2 instance and volume faults
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "AWSChaos",
    plural = "awschaos",
    namespaced,
    status = "ChaosStatus",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AWSChaosSpec {
    /// Fault to inject
    pub action: AwsChaosAction,
    /// Region of the instances
    pub aws_region: String,
    /// Secret with `aws_access_key_id` and `aws_secret_access_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Explicit instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_instance: Option<String>,
    /// EC2 describe-instances filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<CloudFilter>,
    /// Cardinality mode over filter matches
    #[serde(default = "default_cloud_mode")]
    pub mode: String,
    /// Mode value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Volume for detach-volume
    #[serde(default, rename = "volumeID", skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    /// Device name for detach-volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

fn default_cloud_mode() -> String {
    "all".to_string()
}

impl ChaosResource for AWSChaos {
    status_accessors!(ChaosStatus);

    const KIND: ChaosKind = ChaosKind::AWSChaos;

    fn action(&self) -> &'static str {
        self.spec.action.as_str()
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn is_one_shot(&self) -> bool {
        self.spec.action == AwsChaosAction::Ec2Restart
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Cloud(CloudSelector {
            provider: CloudProvider::Aws,
            region: self.spec.aws_region.clone(),
            project: None,
            secret_name: self.spec.secret_name.clone(),
            instances: self.spec.ec2_instance.iter().cloned().collect(),
            filters: self.spec.filters.clone(),
            mode: self.spec.mode.clone(),
            value: self.spec.value.clone(),
        }))
    }
}

// =============================================================================
// GCPChaos
// =============================================================================

/// GCE fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum GcpChaosAction {
    /// Stop the instance for the duration
    NodeStop,
    /// Reset the instance once
    NodeReset,
    /// Detach disks for the duration
    DiskLoss,
}

impl GcpChaosAction {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeStop => "node-stop",
            Self::NodeReset => "node-reset",
            Self::DiskLoss => "disk-loss",
        }
    }
}

/// GCE instance and disk faults
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "GCPChaos",
    plural = "gcpchaos",
    namespaced,
    status = "ChaosStatus",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".spec.duration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GCPChaosSpec {
    /// Fault to inject
    pub action: GcpChaosAction,
    /// Project id
    pub project: String,
    /// Zone of the instance
    pub zone: String,
    /// Instance name
    pub instance: String,
    /// Secret with service account credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Disks for disk-loss
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_names: Vec<String>,
    /// How long the fault lasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ChaosResource for GCPChaos {
    status_accessors!(ChaosStatus);

    const KIND: ChaosKind = ChaosKind::GCPChaos;

    fn action(&self) -> &'static str {
        self.spec.action.as_str()
    }

    fn duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }

    fn is_one_shot(&self) -> bool {
        self.spec.action == GcpChaosAction::NodeReset
    }

    fn selector_specs(&self) -> BTreeMap<String, SelectorSpec> {
        single(SelectorSpec::Cloud(CloudSelector {
            provider: CloudProvider::Gcp,
            region: self.spec.zone.clone(),
            project: Some(self.spec.project.clone()),
            secret_name: self.spec.secret_name.clone(),
            instances: vec![self.spec.instance.clone()],
            filters: Vec::new(),
            mode: "all".to_string(),
            value: None,
        }))
    }
}
