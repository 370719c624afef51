//! # Drift Detection
//!
//! HMAC-SHA-256 over the bytes written to a destination Secret, so the
//! reconciler can tell "nothing changed" from "someone outside the operator
//! edited this Secret" without diffing the entire data map on every pass.
//! The signing key is a 128-bit value generated once and persisted in a
//! Kubernetes Secret; every operator replica reads the same key.

use crate::constants::{HMAC_KEY_LEN_BYTES, HMAC_KEY_SECRET_DATA_KEY, HMAC_KEY_SECRET_NAME};
use base64::Engine;
use hmac::{Hmac, Mac};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum HmacError {
    #[error("hmac key has invalid length")]
    InvalidKeyLength,
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

/// Computes and verifies the MAC stamped on `Status.SecretMAC`.
#[derive(Clone)]
pub struct MacValidator {
    key: Vec<u8>,
}

impl std::fmt::Debug for MacValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacValidator").field("key", &"<redacted>").finish()
    }
}

impl MacValidator {
    /// Load the operator-wide key from `namespace`, generating and
    /// persisting a fresh one if it does not exist yet. Safe to call
    /// concurrently from multiple replicas: a losing `create` race falls
    /// back to reading the winner's key.
    pub async fn bootstrap(k8s_client: kube::Client, namespace: &str) -> Result<Self, HmacError> {
        let api: Api<Secret> = Api::namespaced(k8s_client, namespace);

        match api.get(HMAC_KEY_SECRET_NAME).await {
            Ok(secret) => Self::from_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let mut key = vec![0u8; HMAC_KEY_LEN_BYTES];
                rand::thread_rng().fill_bytes(&mut key);

                let mut data = BTreeMap::new();
                data.insert(HMAC_KEY_SECRET_DATA_KEY.to_string(), ByteString(key.clone()));
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(HMAC_KEY_SECRET_NAME.to_string()),
                        ..Default::default()
                    },
                    data: Some(data),
                    immutable: Some(true),
                    ..Default::default()
                };

                match api.create(&PostParams::default(), &secret).await {
                    Ok(_) => Ok(Self { key }),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        let secret = api.get(HMAC_KEY_SECRET_NAME).await?;
                        Self::from_secret(&secret)
                    }
                    Err(e) => Err(HmacError::Kube(e)),
                }
            }
            Err(e) => Err(HmacError::Kube(e)),
        }
    }

    fn from_secret(secret: &Secret) -> Result<Self, HmacError> {
        let key = secret
            .data
            .as_ref()
            .and_then(|d| d.get(HMAC_KEY_SECRET_DATA_KEY))
            .map(|b| b.0.clone())
            .ok_or(HmacError::InvalidKeyLength)?;
        if key.len() != HMAC_KEY_LEN_BYTES {
            return Err(HmacError::InvalidKeyLength);
        }
        Ok(Self { key })
    }

    /// Compute the base64-encoded MAC over the canonical byte encoding of
    /// `data` (sorted by key, `=` separating key/value, `\n` separating
    /// pairs — order-independent of map iteration order).
    #[must_use]
    pub fn compute(&self, data: &BTreeMap<String, Vec<u8>>) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("any key length is valid for hmac-sha256");
        for (k, v) in data {
            mac.update(k.as_bytes());
            mac.update(b"=");
            mac.update(v);
            mac.update(b"\n");
        }
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison against a previously stored MAC.
    #[must_use]
    pub fn verify(&self, data: &BTreeMap<String, Vec<u8>>, expected_b64: &str) -> bool {
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(expected_b64) else {
            return false;
        };
        let actual = self.compute(data);
        let Ok(actual_bytes) = base64::engine::general_purpose::STANDARD.decode(&actual) else {
            return false;
        };
        constant_time_eq(&actual_bytes, &expected)
    }
}

/// Manual constant-time byte comparison; avoids branching on the first
/// mismatching byte so the MAC check can't be timed.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Re-patch the key Secret as immutable if an older operator version created
/// it without the flag. No-op once already immutable.
pub async fn ensure_immutable(k8s_client: kube::Client, namespace: &str) -> Result<(), HmacError> {
    let api: Api<Secret> = Api::namespaced(k8s_client, namespace);
    let patch = serde_json::json!({ "immutable": true });
    api.patch(
        HMAC_KEY_SECRET_NAME,
        &PatchParams::default(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> MacValidator {
        MacValidator {
            key: vec![7u8; HMAC_KEY_LEN_BYTES],
        }
    }

    #[test]
    fn same_data_same_mac_regardless_of_insertion_order() {
        let v = validator();
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), b"2".to_vec());
        a.insert("a".to_string(), b"1".to_vec());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), b"1".to_vec());
        b.insert("b".to_string(), b"2".to_vec());

        assert_eq!(v.compute(&a), v.compute(&b));
    }

    #[test]
    fn detects_drift() {
        let v = validator();
        let mut data = BTreeMap::new();
        data.insert("key".to_string(), b"value".to_vec());
        let mac = v.compute(&data);
        assert!(v.verify(&data, &mac));

        data.insert("key".to_string(), b"tampered".to_vec());
        assert!(!v.verify(&data, &mac));
    }

    #[test]
    fn rejects_garbage_mac() {
        let v = validator();
        let data = BTreeMap::new();
        assert!(!v.verify(&data, "not-base64!!"));
    }
}
