//! # Secret Authority Client
//!
//! Abstraction over the external secret authority (read/renew/revoke), kept
//! separate from [`crate::auth`] which only covers the login handshake.
//! Every managed secret resource kind reads through this trait; only the
//! wire paths differ per kind.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("authority returned not found for path {0}")]
    NotFound(String),
    #[error("authority request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authority response could not be decoded: {0}")]
    Decode(String),
}

/// A KV read, including enough envelope metadata to drive requeue timing.
#[derive(Debug, Clone)]
pub struct SecretRead {
    pub data: HashMap<String, Value>,
    pub version: Option<u64>,
    pub lease_id: Option<String>,
    pub lease_duration_secs: Option<i64>,
    pub renewable: bool,
}

/// A certificate issued by a PKI mount.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub ca_chain: Vec<String>,
    pub private_key: String,
    pub serial_number: String,
    pub expiration: i64,
}

#[async_trait]
pub trait Authority: Send + Sync {
    /// Read a static KV entry, optionally pinned to `version`.
    async fn read_kv(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        version: Option<u64>,
    ) -> Result<SecretRead, AuthorityError>;

    /// Issue (or fetch the already-materialized view of) a dynamic lease.
    async fn read_dynamic(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        params: &HashMap<String, Value>,
    ) -> Result<SecretRead, AuthorityError>;

    /// Renew a lease in place, returning its new TTL.
    async fn renew_lease(&self, token: &str, lease_id: &str) -> Result<i64, AuthorityError>;

    /// Revoke a lease. Best-effort: callers treat failures as advisory.
    async fn revoke_lease(&self, token: &str, lease_id: &str) -> Result<(), AuthorityError>;

    /// Issue a PKI certificate.
    #[allow(clippy::too_many_arguments, reason = "mirrors the authority's issue request shape")]
    async fn issue_certificate(
        &self,
        token: &str,
        mount: &str,
        role: &str,
        common_name: &str,
        alt_names: &[String],
        ip_sans: &[String],
        other_sans: &[String],
        ttl: Option<&str>,
    ) -> Result<IssuedCertificate, AuthorityError>;

    /// Revoke a certificate by serial number.
    async fn revoke_certificate(&self, token: &str, mount: &str, serial_number: &str) -> Result<(), AuthorityError>;

    /// Fetch an App bundle: an opaque key/value map the authority assembles
    /// from one or more upstream app integrations.
    async fn read_app_bundle(&self, token: &str, app_name: &str) -> Result<HashMap<String, Value>, AuthorityError>;

    /// Revoke `token` itself (not a lease or certificate it was used to
    /// mint). Used only by the shutdown coordinator's `revoke` cleanup model.
    async fn revoke_self(&self, token: &str) -> Result<(), AuthorityError>;
}

/// Default REST-backed implementation, speaking the Vault-compatible HTTP
/// API that every credential provider in [`crate::auth`] already logs into.
#[derive(Debug, Clone)]
pub struct RestAuthority {
    http: reqwest::Client,
    addr: String,
}

impl RestAuthority {
    #[must_use]
    pub fn new(http: reqwest::Client, addr: impl Into<String>) -> Self {
        Self {
            http,
            addr: addr.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.addr.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(serde::Deserialize)]
struct KvEnvelope {
    data: KvData,
}

#[derive(serde::Deserialize)]
struct KvData {
    data: HashMap<String, Value>,
    #[serde(default)]
    metadata: Option<KvMetadata>,
}

#[derive(serde::Deserialize)]
struct KvMetadata {
    version: u64,
}

#[derive(serde::Deserialize)]
struct LeasedEnvelope {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: i64,
    #[serde(default)]
    renewable: bool,
    data: HashMap<String, Value>,
}

#[derive(serde::Deserialize)]
struct PkiEnvelope {
    data: PkiData,
}

#[derive(serde::Deserialize)]
struct PkiData {
    certificate: String,
    #[serde(default)]
    ca_chain: Vec<String>,
    #[serde(default)]
    private_key: String,
    serial_number: String,
    expiration: i64,
}

#[async_trait]
impl Authority for RestAuthority {
    async fn read_kv(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        version: Option<u64>,
    ) -> Result<SecretRead, AuthorityError> {
        let mut url = self.url(&format!("{mount}/data/{path}"));
        if let Some(v) = version {
            url = format!("{url}?version={v}");
        }
        let resp = self
            .http
            .get(url)
            .header("X-Vault-Token", token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthorityError::NotFound(path.to_string()));
        }
        let envelope: KvEnvelope = resp.error_for_status()?.json().await?;
        Ok(SecretRead {
            data: envelope.data.data,
            version: envelope.data.metadata.map(|m| m.version),
            lease_id: None,
            lease_duration_secs: None,
            renewable: false,
        })
    }

    async fn read_dynamic(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        params: &HashMap<String, Value>,
    ) -> Result<SecretRead, AuthorityError> {
        let url = self.url(&format!("{mount}/{path}"));
        let req = if params.is_empty() {
            self.http.get(url).header("X-Vault-Token", token)
        } else {
            self.http
                .post(url)
                .header("X-Vault-Token", token)
                .json(params)
        };
        let envelope: LeasedEnvelope = req.send().await?.error_for_status()?.json().await?;
        Ok(SecretRead {
            data: envelope.data,
            version: None,
            lease_id: (!envelope.lease_id.is_empty()).then_some(envelope.lease_id),
            lease_duration_secs: Some(envelope.lease_duration),
            renewable: envelope.renewable,
        })
    }

    async fn renew_lease(&self, token: &str, lease_id: &str) -> Result<i64, AuthorityError> {
        #[derive(serde::Deserialize)]
        struct RenewResponse {
            lease_duration: i64,
        }
        let resp: RenewResponse = self
            .http
            .put(self.url("sys/leases/renew"))
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({ "lease_id": lease_id }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.lease_duration)
    }

    async fn revoke_lease(&self, token: &str, lease_id: &str) -> Result<(), AuthorityError> {
        self.http
            .put(self.url("sys/leases/revoke"))
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({ "lease_id": lease_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn issue_certificate(
        &self,
        token: &str,
        mount: &str,
        role: &str,
        common_name: &str,
        alt_names: &[String],
        ip_sans: &[String],
        other_sans: &[String],
        ttl: Option<&str>,
    ) -> Result<IssuedCertificate, AuthorityError> {
        let url = self.url(&format!("{mount}/issue/{role}"));
        let mut body = serde_json::json!({
            "common_name": common_name,
            "alt_names": alt_names.join(","),
            "ip_sans": ip_sans.join(","),
            "other_sans": other_sans.join(","),
        });
        if let Some(ttl) = ttl {
            body["ttl"] = Value::String(ttl.to_string());
        }
        let envelope: PkiEnvelope = self
            .http
            .post(url)
            .header("X-Vault-Token", token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(IssuedCertificate {
            certificate: envelope.data.certificate,
            ca_chain: envelope.data.ca_chain,
            private_key: envelope.data.private_key,
            serial_number: envelope.data.serial_number,
            expiration: envelope.data.expiration,
        })
    }

    async fn revoke_certificate(&self, token: &str, mount: &str, serial_number: &str) -> Result<(), AuthorityError> {
        self.http
            .post(self.url(&format!("{mount}/revoke")))
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({ "serial_number": serial_number }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_app_bundle(&self, token: &str, app_name: &str) -> Result<HashMap<String, Value>, AuthorityError> {
        let url = self.url(&format!("app/data/{app_name}"));
        let envelope: KvEnvelope = self
            .http
            .get(url)
            .header("X-Vault-Token", token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.data.data)
    }

    async fn revoke_self(&self, token: &str) -> Result<(), AuthorityError> {
        self.http
            .post(self.url("auth/token/revoke-self"))
            .header("X-Vault-Token", token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
