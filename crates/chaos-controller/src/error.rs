//! Errors raised while reconciling an experiment

use std::time::Duration;

use chaos_common::crd::Phase;
use thiserror::Error;

/// Failure of a resource store call
#[derive(Debug, Error)]
pub enum StoreError {
    /// Someone else wrote the object since it was read
    #[error("conflict writing {key}")]
    Conflict {
        /// `namespace/name` of the object
        key: String,
    },

    /// The object does not exist
    #[error("{key} not found")]
    NotFound {
        /// `namespace/name` of the object
        key: String,
    },

    /// Any other API failure
    #[error("store error on {key}: {message}")]
    Api {
        /// `namespace/name` of the object
        key: String,
        /// Underlying error text
        message: String,
    },

    /// The object could not be encoded for the API
    #[error("serialization error on {key}: {message}")]
    Serialization {
        /// `namespace/name` of the object
        key: String,
        /// Underlying error text
        message: String,
    },
}

impl StoreError {
    /// Classify a kube error for `key`
    pub fn from_kube(key: impl Into<String>, err: kube::Error) -> Self {
        let key = key.into();
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict { key },
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { key },
            other => Self::Api {
                key,
                message: other.to_string(),
            },
        }
    }

    /// Optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure reported by an injector
#[derive(Debug, Error)]
pub enum InjectError {
    /// The fault could not be applied or recovered
    #[error("{message}")]
    Failed {
        /// What went wrong
        message: String,
        /// Phase the target ended up in, when the injector knows
        phase: Option<Phase>,
    },

    /// No injector is registered for the experiment's action
    #[error("unknown action {action:?}")]
    UnknownAction {
        /// The action string from the spec
        action: String,
    },

    /// The call exceeded the per-call deadline
    #[error("injector call timed out after {0:?}")]
    TimedOut(Duration),

    /// The reconcile was cancelled while the call was in flight
    #[error("injector call cancelled")]
    Cancelled,
}

impl InjectError {
    /// Failure without a known phase
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            phase: None,
        }
    }

    /// Failure that left the target in `phase`
    pub fn failed_in(message: impl Into<String>, phase: Phase) -> Self {
        Self::Failed {
            message: message.into(),
            phase: Some(phase),
        }
    }

    /// Phase reported alongside the failure
    pub fn phase(&self) -> Option<&Phase> {
        match self {
            Self::Failed { phase, .. } => phase.as_ref(),
            _ => None,
        }
    }
}

/// Why a reconcile stopped
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The store failed outside of the locally retried conflict path
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shutdown was requested mid-reconcile
    #[error("reconcile cancelled")]
    Cancelled,

    /// The spec can never be reconciled as written
    #[error("malformed experiment: {message}")]
    Malformed {
        /// What is wrong
        message: String,
    },
}

impl ReconcileError {
    /// Create a malformed-spec error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Whether requeueing could make progress without a spec change
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}
