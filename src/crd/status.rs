//! # Shared Status Types
//!
//! `Condition` and the MAC/backoff bookkeeping fields shared by every managed
//! secret resource kind.

use serde::{Deserialize, Serialize};

/// Condition represents the latest observed state transition for a resource.
///
/// Mirrors the Kubernetes "conditions" convention used throughout the
/// ecosystem (`Ready`, `Degraded`, `Invalid`, ...).
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. "Ready", "Degraded", "Invalid".
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Last transition time (RFC3339).
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the condition.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message describing the condition.
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(r#type: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn ready(message: impl Into<String>) -> Self {
        Self::new("Ready", true, "ReconciliationSucceeded", message)
    }

    #[must_use]
    pub fn degraded(reason: &str, message: impl Into<String>) -> Self {
        Self::new("Degraded", true, reason, message)
    }

    #[must_use]
    pub fn invalid(reason: &str, message: impl Into<String>) -> Self {
        Self::new("Invalid", true, reason, message)
    }
}

/// Status fields common to every managed secret resource kind.
///
/// Each concrete `*Status` type (Static/Dynamic/Pki/App) embeds these via
/// `#[serde(flatten)]` so that a single helper can update them generically.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonStatus {
    /// Latest observed conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// `metadata.generation` observed by the last successful reconcile.
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Base64 HMAC of the last data written to the destination Secret.
    #[serde(default)]
    pub secret_mac: Option<String>,
    /// RFC3339 timestamp of the last successful sync.
    #[serde(default)]
    pub last_sync_time: Option<String>,
    /// Accessor/identifier for the current lease, if any (Dynamic/PKI only,
    /// but kept common so the finalizer/shutdown path can read it uniformly).
    #[serde(default)]
    pub lease_accessor: Option<String>,
}
