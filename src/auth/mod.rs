//! # Credential Providers
//!
//! Resolves an `AuthConfig` (merged with `GlobalAuthDefault`) into a live
//! login against the external secret authority, producing a client token
//! plus a stable identity used to fingerprint the authenticated-client cache.

mod app_role;
mod aws;
mod gcp;
mod jwt;
mod kubernetes;
mod merge;
mod service_principal;

pub use merge::merge_with_defaults;

use crate::crd::auth::{AuthConfigSpec, AuthMethod};
use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroize;

/// Errors surfaced while resolving or exercising a credential provider.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth config is missing required field: {0}")]
    MissingField(&'static str),
    #[error("unsupported auth method: {0}")]
    UnsupportedMethod(String),
    #[error("login request failed: {0}")]
    LoginFailed(String),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A freshly minted token, plus the TTL/renewability the authority reported.
pub struct Credentials {
    pub token: SecretString,
    pub lease_duration_secs: i64,
    pub renewable: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("lease_duration_secs", &self.lease_duration_secs)
            .field("renewable", &self.renewable)
            .finish()
    }
}

/// A token value that scrubs itself from memory on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Implemented once per supported authentication method. `Init` resolves any
/// Kubernetes-side material (ServiceAccount tokens, referenced Secrets) and
/// produces a stable identity; `GetCreds` performs (or renews) the login
/// itself against the authority.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Validate the spec and resolve any Kubernetes-side references,
    /// returning an identity string stable across reconciles as long as the
    /// underlying credential material is unchanged. Used as input to the
    /// authenticated-client cache fingerprint.
    async fn init(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError>;

    /// Perform a login against the authority and return a fresh token.
    async fn get_creds(
        &self,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<Credentials, AuthError>;

    fn method(&self) -> AuthMethod;
}

/// Common shape of a successful authority login response body.
#[derive(serde::Deserialize)]
pub(crate) struct LoginResponse {
    pub auth: LoginAuth,
}

#[derive(serde::Deserialize)]
pub(crate) struct LoginAuth {
    pub client_token: String,
    #[serde(default)]
    pub lease_duration: i64,
    #[serde(default)]
    pub renewable: bool,
}

/// Construct the concrete provider named by a merged `AuthConfigSpec`.
pub fn build_provider(spec: &AuthConfigSpec) -> Result<Box<dyn CredentialProvider>, AuthError> {
    let method = spec.method.ok_or(AuthError::MissingField("method"))?;
    match method {
        AuthMethod::Kubernetes => Ok(Box::new(kubernetes::KubernetesProvider::new(spec)?)),
        AuthMethod::Jwt => Ok(Box::new(jwt::JwtProvider::new(spec)?)),
        AuthMethod::AppRole => Ok(Box::new(app_role::AppRoleProvider::new(spec)?)),
        AuthMethod::Aws => Ok(Box::new(aws::AwsProvider::new(spec)?)),
        AuthMethod::Gcp => Ok(Box::new(gcp::GcpProvider::new(spec)?)),
        AuthMethod::ServicePrincipal => {
            Ok(Box::new(service_principal::ServicePrincipalProvider::new(spec)?))
        }
    }
}
