//! # Managed Secret Resource (MSR) kinds
//!
//! Four sub-kinds share the same `Destination` block and `auth_ref` but
//! differ in how they locate material at the authority and how their next
//! requeue time is computed.

use crate::crd::auth::AuthConfigRef;
use crate::crd::status::{CommonStatus, Condition};
use crate::crd::transformation::Destination;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_renewal_percent() -> f64 {
    crate::constants::DEFAULT_RENEWAL_PERCENT
}

/// *Static* — a versioned KV entry.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "StaticSecret",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    status = "StaticSecretStatus",
    shortname = "vss",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StaticSecretSpec {
    #[serde(default)]
    pub auth_ref: Option<AuthConfigRef>,
    pub mount: String,
    pub path: String,
    /// Pin to a specific KV version; `None`/`0` means "latest".
    #[serde(default)]
    pub version: Option<u64>,
    /// Kubernetes duration string; when set, overrides the controller's
    /// resync-driven refresh with an explicit schedule.
    #[serde(default)]
    pub refresh_after: Option<String>,
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticSecretStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default)]
    pub last_version: Option<u64>,
}

/// *Dynamic* — a leased credential.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "DynamicSecret",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    status = "DynamicSecretStatus",
    shortname = "vds",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSecretSpec {
    #[serde(default)]
    pub auth_ref: Option<AuthConfigRef>,
    pub mount: String,
    /// Role path under the mount, e.g. `creds/my-role`.
    pub path: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Fraction of the lease TTL at which to renew. Default 0.67.
    #[serde(default = "default_renewal_percent")]
    pub renewal_percent: f64,
    /// Revoke the lease at the authority when this MSR is deleted.
    #[serde(default)]
    pub revoke: bool,
    /// Permit static (non-leased) credentials to be treated as Dynamic.
    #[serde(default)]
    pub allow_static_creds: bool,
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSecretStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default)]
    pub lease_id: Option<String>,
    #[serde(default)]
    pub lease_duration_seconds: Option<i64>,
    #[serde(default)]
    pub renewable: Option<bool>,
}

/// *PKI* — an issued certificate.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "PkiSecret",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    status = "PkiSecretStatus",
    shortname = "vps",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PkiSecretSpec {
    #[serde(default)]
    pub auth_ref: Option<AuthConfigRef>,
    pub mount: String,
    pub role: String,
    pub common_name: String,
    #[serde(default)]
    pub alt_names: Vec<String>,
    #[serde(default)]
    pub ip_sans: Vec<String>,
    #[serde(default)]
    pub other_sans: Vec<String>,
    /// `pem`, `der`, or `pem_bundle`.
    #[serde(default = "default_pki_format")]
    pub format: String,
    #[serde(default)]
    pub ttl: Option<String>,
    /// Kubernetes duration string subtracted from the cert TTL when
    /// computing the next requeue time.
    #[serde(default)]
    pub expiry_offset: Option<String>,
    #[serde(default)]
    pub revoke: bool,
    /// Clear the destination data when the certificate is revoked/expired
    /// instead of leaving stale material in place.
    #[serde(default)]
    pub clear: bool,
    pub destination: Destination,
}

fn default_pki_format() -> String {
    "pem".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PkiSecretStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub expiration: Option<i64>,
}

/// *App* — an external-secret-manager bundle (e.g. a third-party app
/// integration exposed by the authority as a single fetch).
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AppSecret",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    status = "AppSecretStatus",
    shortname = "vas",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSecretSpec {
    #[serde(default)]
    pub auth_ref: Option<AuthConfigRef>,
    pub app_name: String,
    /// Kubernetes duration string; the controller enforces
    /// `max(refresh_after, --min-refresh-after-hvsa)`.
    #[serde(default)]
    pub refresh_after: Option<String>,
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSecretStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
}

/// Helper shared by every `*Status` type for recording a state transition.
pub trait HasConditions {
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn set_condition(&mut self, condition: Condition) {
        let conditions = self.conditions_mut();
        conditions.retain(|c| c.r#type != condition.r#type);
        conditions.push(condition);
    }
}

macro_rules! impl_has_conditions {
    ($ty:ty) => {
        impl HasConditions for $ty {
            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.common.conditions
            }
        }
    };
}

impl_has_conditions!(StaticSecretStatus);
impl_has_conditions!(DynamicSecretStatus);
impl_has_conditions!(PkiSecretStatus);
impl_has_conditions!(AppSecretStatus);
