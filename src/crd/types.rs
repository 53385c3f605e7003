//! Supporting types shared by the Tunnel and Proxy CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why a Tunnel is or is not ready
///
/// Closed set so the tunnel state machine stays exhaustively matched.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum TunnelReason {
    /// The referenced Proxy does not exist in the tunnel's namespace
    NoSuchProxy,
    /// The Proxy exists but has not assigned a transit port yet
    WaitingForProxy,
    /// The tunnel's Service could not be created or updated
    ServiceFailure,
    /// The tunnel is routable
    Ready,
}

impl TunnelReason {
    /// Whether this reason means the tunnel is routable
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for TunnelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchProxy => write!(f, "NoSuchProxy"),
            Self::WaitingForProxy => write!(f, "WaitingForProxy"),
            Self::ServiceFailure => write!(f, "ServiceFailure"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Keep the previous transition time when status did not change
    ///
    /// Avoids bumping `lastTransitionTime` on every reconcile.
    pub fn carry_transition_time(mut self, previous: &[Condition]) -> Self {
        if let Some(prev) = previous
            .iter()
            .find(|c| c.type_ == self.type_ && c.status == self.status)
        {
            self.last_transition_time = prev.last_transition_time;
        }
        self
    }
}
