//! # Authentication Configuration (AC) and Global Authentication Defaults (GAD)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of credential-provider method tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    Kubernetes,
    Jwt,
    AppRole,
    Aws,
    Gcp,
    ServicePrincipal,
}

impl AuthMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Kubernetes => "kubernetes",
            AuthMethod::Jwt => "jwt",
            AuthMethod::AppRole => "appRole",
            AuthMethod::Aws => "aws",
            AuthMethod::Gcp => "gcp",
            AuthMethod::ServicePrincipal => "servicePrincipal",
        }
    }
}

/// Kubernetes ServiceAccount token-exchange parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    /// Role configured at the authority for this login.
    #[serde(default)]
    pub role: Option<String>,
    /// ServiceAccount to project a token for. Defaults to the operator's own
    /// ServiceAccount when omitted.
    #[serde(default)]
    pub service_account: Option<String>,
    /// Audiences requested for the projected token.
    #[serde(default)]
    pub audiences: Vec<String>,
    /// TTL requested for the projected token, as a Kubernetes duration string.
    #[serde(default)]
    pub token_expiration_seconds: Option<i64>,
}

/// Signed-JWT exchange parameters: either a static JWT from a Secret, or a
/// ServiceAccount to project a JWT for.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Name of a Secret (in the resolved `secretRef` namespace) with a `jwt` key.
    #[serde(default)]
    pub secret_ref: Option<String>,
    /// ServiceAccount to project a JWT for, when `secretRef` is absent.
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub audiences: Vec<String>,
}

/// `role_id` + `secret_id` pair (role id is plaintext, secret id lives in a Secret).
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    pub role_id: String,
    /// Name of the Secret containing the `secret_id` key.
    pub secret_id_ref: String,
}

/// AWS credential parameters: static keys, IRSA, or node identity.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub region: String,
    pub sts_endpoint: Option<String>,
    /// Name of a Secret with `access_key_id`/`secret_access_key`, when not
    /// using IRSA or node identity.
    #[serde(default)]
    pub secret_ref: Option<String>,
    /// ServiceAccount annotated for IRSA.
    #[serde(default)]
    pub irsa_service_account: Option<String>,
}

/// GCP workload-identity parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// ServiceAccount annotated with the cloud service-account email to
    /// impersonate.
    pub service_account: String,
}

/// Service-principal parameters for the `App` MSR variant's external manager.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipalAuthParams {
    /// Per-method mount override; wins over a `GlobalAuthDefault`'s
    /// top-level `defaultMount` but loses to the `AuthConfig`'s own
    /// top-level `mount`.
    #[serde(default)]
    pub mount: Option<String>,
    /// Name of a Secret with `client_id`/`client_secret` keys.
    pub secret_ref: String,
}

/// Authentication Configuration (AC). A reference to one of these (by
/// `ns/name`, or the operator-namespace `default` when unset) resolves the
/// credential provider used for a given managed secret resource.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AuthConfig",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Method", "type":"string", "jsonPath":".spec.method"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigSpec {
    #[serde(default)]
    pub method: Option<AuthMethod>,
    #[serde(default)]
    pub mount: Option<String>,
    /// Namespace within the authority this login targets (authority-side
    /// namespace, distinct from the Kubernetes namespace).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Kubernetes namespaces permitted to reference this AC. `["*"]` allows
    /// all; unset allows only same-namespace (plus the operator namespace for
    /// the implicit `default` AC).
    #[serde(default)]
    pub allowed_namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub kubernetes: Option<KubernetesAuthParams>,
    #[serde(default)]
    pub jwt: Option<JwtAuthParams>,
    #[serde(default, rename = "appRole")]
    pub app_role: Option<AppRoleAuthParams>,
    #[serde(default)]
    pub aws: Option<AwsAuthParams>,
    #[serde(default)]
    pub gcp: Option<GcpAuthParams>,
    #[serde(default, rename = "servicePrincipal")]
    pub service_principal: Option<ServicePrincipalAuthParams>,
}

/// Global Authentication Defaults (GAD). A namespaced singleton (by
/// convention named `default`) whose fields are merged into an AC that
/// leaves them empty.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "GlobalAuthDefault",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAuthDefaultSpec {
    /// Fallback method used when the AC names none.
    #[serde(default)]
    pub default_method: Option<AuthMethod>,
    #[serde(default)]
    pub default_mount: Option<String>,
    #[serde(default)]
    pub default_namespace: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub kubernetes: Option<KubernetesAuthParams>,
    #[serde(default)]
    pub jwt: Option<JwtAuthParams>,
    #[serde(default, rename = "appRole")]
    pub app_role: Option<AppRoleAuthParams>,
    #[serde(default)]
    pub aws: Option<AwsAuthParams>,
    #[serde(default)]
    pub gcp: Option<GcpAuthParams>,
    #[serde(default, rename = "servicePrincipal")]
    pub service_principal: Option<ServicePrincipalAuthParams>,
}

/// A reference to an `AuthConfig`, possibly in another namespace.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigRef {
    /// Namespace of the referenced `AuthConfig`. Defaults to the MSR's own
    /// namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Name of the referenced `AuthConfig`. Defaults to `"default"` in the
    /// operator's own namespace.
    #[serde(default)]
    pub name: Option<String>,
}
