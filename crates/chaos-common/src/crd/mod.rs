//! Custom Resource Definitions for chaos experiments

mod experiments;
mod kind;
mod selector;
mod status;

pub use experiments::*;
pub use kind::{
    ChaosKind, ChaosResource, ChildKind, ALL_CHAOS_KINDS, POD_HTTP_CHAOS, POD_IO_CHAOS,
    POD_NETWORK_CHAOS,
};
pub use selector::{
    CloudFilter, CloudProvider, CloudSelector, ContainerSelector, PodSelector, PodSelectorSpec,
    SelectorMode, SelectorRequirement, SelectorSpec, DEFAULT_SELECTOR_KEY,
    NETWORK_TARGET_SELECTOR_KEY,
};
pub use status::{
    ChaosCondition, ChaosStatus, ChaosStatusBlock, ConditionStatus, ConditionType, DesiredPhase,
    ExperimentStatus, InstancesStatus, Phase, Record, RecordEvent, RecordEventOperation,
    RecordEventType, StressChaosStatus, StressInstance,
};
