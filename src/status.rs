//! Operator-facing workload status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse state shown to the operator
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    /// Work is in progress
    #[default]
    Maintenance,
    /// Operator action is required (missing relation or configuration)
    Blocked,
    /// Waiting on an external party
    Waiting,
    /// Certificate issued, ingress serving
    Active,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maintenance => write!(f, "maintenance"),
            Self::Blocked => write!(f, "blocked"),
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Status with a human readable message
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Coarse state
    pub state: StatusState,
    /// Message shown next to the state
    pub message: String,
}

impl WorkloadStatus {
    /// Operator action required
    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            state: StatusState::Blocked,
            message: message.into(),
        }
    }

    /// Waiting on an external party
    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            state: StatusState::Waiting,
            message: message.into(),
        }
    }

    /// Everything is in place
    pub fn active(message: impl Into<String>) -> Self {
        Self {
            state: StatusState::Active,
            message: message.into(),
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}
