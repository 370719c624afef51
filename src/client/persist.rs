//! Secret-backed persistence for cached clients, so a pod restart does not
//! force every managed secret resource to re-login simultaneously.

use crate::constants::CLIENT_CACHE_SECRET_PREFIX;
use crate::hmac::MacValidator;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("persisted token failed its integrity check, discarding")]
    TamperDetected,
}

/// A single fingerprint's persisted state: the token itself plus the MAC
/// computed over it at write time.
pub struct PersistedClient {
    pub token: String,
    pub expires_at_unix: i64,
}

fn secret_name(fingerprint: &str) -> String {
    format!("{CLIENT_CACHE_SECRET_PREFIX}-{}", &fingerprint[..16.min(fingerprint.len())])
}

/// Write `client` into the per-fingerprint Secret, stamping an HMAC so a
/// future read can detect tampering or corruption.
pub async fn save(
    k8s_client: &kube::Client,
    namespace: &str,
    mac: &MacValidator,
    fingerprint: &str,
    client: &PersistedClient,
) -> Result<(), PersistError> {
    let api: Api<Secret> = Api::namespaced(k8s_client.clone(), namespace);

    let mut fields = BTreeMap::new();
    fields.insert("token".to_string(), client.token.clone().into_bytes());
    fields.insert(
        "expiresAt".to_string(),
        client.expires_at_unix.to_string().into_bytes(),
    );
    let signature = mac.compute(&fields);

    let mut data = BTreeMap::new();
    for (k, v) in &fields {
        data.insert(k.clone(), ByteString(v.clone()));
    }
    data.insert("mac".to_string(), ByteString(signature.into_bytes()));

    let name = secret_name(fingerprint);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    api.patch(
        &name,
        &PatchParams::apply("vault-secrets-operator").force(),
        &Patch::Apply(&secret),
    )
    .await?;
    Ok(())
}

/// Read a previously persisted client back, verifying its MAC. Returns
/// `Ok(None)` when nothing is persisted yet; returns `Err(TamperDetected)`
/// when the MAC does not match, in which case the caller should treat the
/// fingerprint as uncached rather than trusting the contents.
pub async fn load(
    k8s_client: &kube::Client,
    namespace: &str,
    mac: &MacValidator,
    fingerprint: &str,
) -> Result<Option<PersistedClient>, PersistError> {
    let api: Api<Secret> = Api::namespaced(k8s_client.clone(), namespace);
    let name = secret_name(fingerprint);

    let secret = match api.get(&name).await {
        Ok(s) => s,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
        Err(e) => return Err(PersistError::Kube(e)),
    };

    let Some(data) = secret.data else {
        return Ok(None);
    };

    let mut fields = BTreeMap::new();
    for key in ["token", "expiresAt"] {
        let Some(bytes) = data.get(key) else {
            return Ok(None);
        };
        fields.insert(key.to_string(), bytes.0.clone());
    }
    let Some(signature) = data.get("mac") else {
        return Ok(None);
    };
    let signature = String::from_utf8_lossy(&signature.0).into_owned();

    if !mac.verify(&fields, &signature) {
        warn!(fingerprint, "persisted client cache entry failed mac check, discarding");
        return Err(PersistError::TamperDetected);
    }

    let token = String::from_utf8_lossy(&fields["token"]).into_owned();
    let expires_at_unix = String::from_utf8_lossy(&fields["expiresAt"])
        .parse()
        .unwrap_or(0);

    Ok(Some(PersistedClient {
        token,
        expires_at_unix,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_name_is_stable_and_bounded() {
        let fp = "a".repeat(64);
        let name = secret_name(&fp);
        assert!(name.starts_with(CLIENT_CACHE_SECRET_PREFIX));
        assert!(name.len() < 64);
    }
}
