//! Selection errors

use thiserror::Error;

/// Why a selector could not be resolved
#[derive(Debug, Error)]
pub enum SelectError {
    /// Filters matched nothing under a mode that needs at least one target
    #[error("no target has been selected")]
    NoTargets,

    /// `fixed` asked for more targets than exist
    #[error("not enough targets: requested {requested}, found {available}")]
    InsufficientTargets {
        /// Count from the mode value
        requested: usize,
        /// Candidates after filtering
        available: usize,
    },

    /// The selector can never match as written
    #[error("invalid selector: {message}")]
    InvalidSpec {
        /// What is wrong
        message: String,
    },

    /// Listing or reading the inventory failed
    #[error("inventory error: {message}")]
    Inventory {
        /// Underlying error text
        message: String,
    },
}

impl SelectError {
    /// Create an invalid-spec error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    /// Create an inventory error
    pub fn inventory(message: impl Into<String>) -> Self {
        Self::Inventory {
            message: message.into(),
        }
    }

    /// Whether the same selector could resolve later without a spec change
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidSpec { .. })
    }
}

impl From<kube::Error> for SelectError {
    fn from(e: kube::Error) -> Self {
        Self::inventory(e.to_string())
    }
}

impl From<chaos_common::Error> for SelectError {
    fn from(e: chaos_common::Error) -> Self {
        match e {
            chaos_common::Error::Validation { message, .. } => Self::InvalidSpec { message },
            other => Self::inventory(other.to_string()),
        }
    }
}
