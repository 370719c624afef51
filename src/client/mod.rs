//! # Authenticated Client Factory
//!
//! Turns a resolved [`crate::auth::CredentialProvider`] into a live,
//! reusable token, bounded by an LRU keyed on a fingerprint of the
//! credential source's stable identity. At most one login is ever in
//! flight per fingerprint; everyone else waiting on the same fingerprint
//! gets the winner's result instead of hammering the authority.

pub(crate) mod persist;

pub use persist::PersistedClient;

use crate::auth::{AuthError, Credentials, CredentialProvider};
use crate::authority::Authority;
use crate::constants::DEFAULT_CLIENT_CACHE_SIZE;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("client factory is shutting down, no new logins are accepted")]
    ShuttingDown,
}

/// Stable fingerprint of a credential source: the provider's reported
/// identity plus the authority address it logs into. Two managed secret
/// resources whose auth configs resolve to the same fingerprint share a
/// cached client.
#[must_use]
pub fn fingerprint(identity: &str, authority_addr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"@");
    hasher.update(authority_addr.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Everything needed to redo a login for a cached entry without the caller
/// that first created it: carried forward so the background renewal loop
/// can renew on its own schedule, not just opportunistically inside
/// [`ClientCache::get_or_login`].
#[derive(Clone)]
struct RenewalContext {
    provider: Arc<dyn CredentialProvider>,
    k8s_client: kube::Client,
    http: reqwest::Client,
    authority_addr: String,
    namespace: String,
}

struct CachedClient {
    token: crate::auth::SecretString,
    renewable: bool,
    expires_at: Instant,
    lease_duration: Duration,
    /// Set when a renewal attempt against the authority failed (4xx or
    /// otherwise): the token may already be revoked, so the next caller
    /// re-authenticates from scratch instead of reusing it.
    tainted: bool,
    renewal: Option<RenewalContext>,
}

impl CachedClient {
    fn from_creds(creds: Credentials, renewal: Option<RenewalContext>) -> Self {
        let lease_duration = Duration::from_secs(creds.lease_duration_secs.max(0) as u64);
        Self {
            token: creds.token,
            renewable: creds.renewable,
            expires_at: Instant::now() + lease_duration,
            lease_duration,
            tainted: false,
            renewal,
        }
    }

    fn needs_renewal(&self, renewal_percent: f64) -> bool {
        if self.lease_duration.is_zero() {
            return false;
        }
        let elapsed = self
            .lease_duration
            .saturating_sub(self.expires_at.saturating_duration_since(Instant::now()));
        elapsed.as_secs_f64() >= self.lease_duration.as_secs_f64() * renewal_percent
    }
}

type Slot = Arc<Mutex<Option<CachedClient>>>;

/// Bounded, fingerprint-keyed cache of authenticated clients with a
/// background renewal loop.
pub struct ClientCache {
    entries: Mutex<lru::LruCache<String, Slot>>,
    renewal_percent: f64,
    shutting_down: std::sync::atomic::AtomicBool,
    authority: Arc<dyn Authority>,
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache").finish_non_exhaustive()
    }
}

impl ClientCache {
    #[must_use]
    pub fn new(capacity: usize, renewal_percent: f64, authority: Arc<dyn Authority>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CLIENT_CACHE_SIZE).expect("constant is non-zero"));
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            renewal_percent,
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            authority,
        }
    }

    /// Stop accepting new logins. Existing cached tokens remain servable
    /// until [`Self::drain_tokens`] removes them; only [`Self::get_or_login`]
    /// is affected.
    pub fn disable(&self) {
        self.shutting_down.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    async fn slot_for(&self, key: &str) -> Slot {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.get(key) {
            return Arc::clone(slot);
        }
        let slot: Slot = Arc::new(Mutex::new(None));
        let evicted = entries.put(key.to_string(), Arc::clone(&slot));
        drop(entries);
        if let Some(evicted_slot) = evicted {
            self.revoke_evicted(evicted_slot);
        }
        slot
    }

    /// An entry pushed out of the LRU by a fresher one may still hold a live,
    /// renewable token; best-effort revoke it so it can't be replayed.
    /// Runs detached since the caller that triggered the eviction is on the
    /// hot path and must not wait on a network round trip to the authority.
    fn revoke_evicted(&self, slot: Slot) {
        let authority = Arc::clone(&self.authority);
        tokio::spawn(async move {
            let Some(cached) = slot.lock().await.take() else {
                return;
            };
            if !cached.renewable {
                return;
            }
            if let Err(e) = authority.revoke_self(cached.token.expose()).await {
                warn!(error = %e, "best-effort revoke of evicted client cache entry failed");
            }
        });
    }

    /// Return a valid token for `key`, logging in (or renewing) through
    /// `provider` if the cached entry is missing, expired, or due for
    /// renewal. Only one caller per `key` performs the actual network call;
    /// the rest wait on the same slot's mutex and reuse its result.
    pub async fn get_or_login(
        &self,
        key: &str,
        provider: Arc<dyn CredentialProvider>,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<String, ClientError> {
        if self.shutting_down.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(ClientError::ShuttingDown);
        }
        let slot = self.slot_for(key).await;
        let mut guard = slot.lock().await;

        let renewal = RenewalContext {
            provider: Arc::clone(&provider),
            k8s_client: k8s_client.clone(),
            http: http.clone(),
            authority_addr: authority_addr.to_string(),
            namespace: namespace.to_string(),
        };

        // A tainted entry is treated the same as an expired one: the last
        // renewal attempt may have failed because the authority already
        // revoked the token, so the only safe move is a fresh login.
        let needs_login = match guard.as_ref() {
            None => true,
            Some(cached) => cached.tainted || cached.expires_at <= Instant::now(),
        };

        if needs_login {
            debug!(fingerprint = key, "logging in to secret authority");
            let creds = provider
                .get_creds(k8s_client, http, authority_addr, namespace)
                .await?;
            *guard = Some(CachedClient::from_creds(creds, Some(renewal)));
        } else if guard.as_ref().is_some_and(|c| c.renewable && c.needs_renewal(self.renewal_percent)) {
            match provider
                .get_creds(k8s_client, http, authority_addr, namespace)
                .await
            {
                Ok(creds) => *guard = Some(CachedClient::from_creds(creds, Some(renewal))),
                Err(e) => {
                    warn!(fingerprint = key, error = %e, "proactive renewal failed, tainting cached entry");
                    if let Some(c) = guard.as_mut() {
                        c.tainted = true;
                    }
                }
            }
        }

        Ok(guard
            .as_ref()
            .expect("guard populated above")
            .token
            .expose()
            .to_string())
    }

    /// Drop every cached entry whose fingerprint matches no entry in
    /// `live_fingerprints`, invalidating clients whose owning managed secret
    /// resources have all been deleted.
    pub async fn evict_stale(&self, live_fingerprints: &HashMap<String, ()>) {
        let mut entries = self.entries.lock().await;
        let stale: Vec<String> = entries
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| !live_fingerprints.contains_key(k))
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// If nothing is cached yet for `key`, seed it from a value recovered
    /// from the persisted client cache Secret. A concurrent login always
    /// wins; this never clobbers a live entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn seed_if_absent(
        &self,
        key: &str,
        token: crate::auth::SecretString,
        expires_at_unix: i64,
        provider: Arc<dyn CredentialProvider>,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) {
        let remaining = (expires_at_unix - chrono::Utc::now().timestamp()).max(0) as u64;
        let slot = self.slot_for(key).await;
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(CachedClient {
                token,
                renewable: false,
                expires_at: Instant::now() + Duration::from_secs(remaining),
                lease_duration: Duration::from_secs(remaining),
                tainted: false,
                renewal: Some(RenewalContext {
                    provider,
                    k8s_client: k8s_client.clone(),
                    http: http.clone(),
                    authority_addr: authority_addr.to_string(),
                    namespace: namespace.to_string(),
                }),
            });
        }
    }

    /// Snapshot of the currently cached token for `key`, in a form the
    /// persisted client cache Secret can store (a unix timestamp, rather
    /// than the process-local `Instant` the in-memory cache keeps).
    pub async fn snapshot_for_persistence(&self, key: &str) -> Option<(String, i64)> {
        let slot = self.slot_for(key).await;
        let guard = slot.lock().await;
        guard.as_ref().map(|c| {
            let remaining = c.expires_at.saturating_duration_since(Instant::now());
            (c.token.expose().to_string(), chrono::Utc::now().timestamp() + remaining.as_secs() as i64)
        })
    }

    /// Take every cached token out of the cache, clearing it in the
    /// process. Used only by the shutdown coordinator's `revoke` cleanup
    /// model, which needs the raw token values to self-revoke them at the
    /// authority before the process exits.
    pub async fn drain_tokens(&self) -> Vec<(String, crate::auth::SecretString)> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let mut drained = Vec::new();
        for key in keys {
            if let Some(slot) = entries.pop(&key) {
                if let Some(cached) = slot.lock().await.take() {
                    drained.push((key, cached.token));
                }
            }
        }
        drained
    }

    /// Sweep every cache entry and renew whichever have crossed
    /// `token-TTL * renewal_percent`. A renewal that fails taints the entry
    /// instead of leaving the stale token in place, so the next caller
    /// re-authenticates rather than reusing a token the authority may have
    /// already revoked.
    pub async fn renew_due_entries(&self) {
        let slots: Vec<Slot> = {
            let entries = self.entries.lock().await;
            entries.iter().map(|(_, slot)| Arc::clone(slot)).collect()
        };

        for slot in slots {
            let mut guard = slot.lock().await;
            let due = guard
                .as_ref()
                .is_some_and(|c| !c.tainted && c.renewable && c.renewal.is_some() && c.needs_renewal(self.renewal_percent));
            if !due {
                continue;
            }
            let renewal = guard.as_ref().and_then(|c| c.renewal.clone()).expect("checked above");
            match renewal
                .provider
                .get_creds(&renewal.k8s_client, &renewal.http, &renewal.authority_addr, &renewal.namespace)
                .await
            {
                Ok(creds) => {
                    debug!(authority_addr = renewal.authority_addr, "background renewal succeeded");
                    *guard = Some(CachedClient::from_creds(creds, Some(renewal)));
                }
                Err(e) => {
                    warn!(authority_addr = renewal.authority_addr, error = %e, "background renewal failed, tainting cached entry");
                    if let Some(c) = guard.as_mut() {
                        c.tainted = true;
                    }
                }
            }
        }
    }
}

/// Periodically sweep every cache entry and renew tokens that have crossed
/// their renewal threshold. Never exits; intended to be `tokio::spawn`ed
/// once at startup.
pub async fn renewal_loop(cache: Arc<ClientCache>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        cache.renew_due_entries().await;
        let len = cache.len().await;
        crate::observability::metrics::set_client_cache_size(len as i64);
        debug!(cached_clients = len, "client cache renewal sweep tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthorityError, IssuedCertificate, SecretRead};
    use async_trait::async_trait;

    struct NoopAuthority;

    #[async_trait]
    impl Authority for NoopAuthority {
        async fn read_kv(
            &self,
            _token: &str,
            _mount: &str,
            _path: &str,
            _version: Option<u64>,
        ) -> Result<SecretRead, AuthorityError> {
            Err(AuthorityError::NotFound("unused in tests".to_string()))
        }

        async fn read_dynamic(
            &self,
            _token: &str,
            _mount: &str,
            _path: &str,
            _params: &HashMap<String, serde_json::Value>,
        ) -> Result<SecretRead, AuthorityError> {
            Err(AuthorityError::NotFound("unused in tests".to_string()))
        }

        async fn renew_lease(&self, _token: &str, _lease_id: &str) -> Result<i64, AuthorityError> {
            Err(AuthorityError::NotFound("unused in tests".to_string()))
        }

        async fn revoke_lease(&self, _token: &str, _lease_id: &str) -> Result<(), AuthorityError> {
            Ok(())
        }

        async fn issue_certificate(
            &self,
            _token: &str,
            _mount: &str,
            _role: &str,
            _common_name: &str,
            _alt_names: &[String],
            _ip_sans: &[String],
            _other_sans: &[String],
            _ttl: Option<&str>,
        ) -> Result<IssuedCertificate, AuthorityError> {
            Err(AuthorityError::NotFound("unused in tests".to_string()))
        }

        async fn revoke_certificate(&self, _token: &str, _mount: &str, _serial_number: &str) -> Result<(), AuthorityError> {
            Ok(())
        }

        async fn read_app_bundle(&self, _token: &str, _app_name: &str) -> Result<HashMap<String, serde_json::Value>, AuthorityError> {
            Err(AuthorityError::NotFound("unused in tests".to_string()))
        }

        async fn revoke_self(&self, _token: &str) -> Result<(), AuthorityError> {
            Ok(())
        }
    }

    fn test_cache(capacity: usize, renewal_percent: f64) -> ClientCache {
        ClientCache::new(capacity, renewal_percent, Arc::new(NoopAuthority))
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = fingerprint("kubernetes:auth:ns:sa:role", "https://vault:8200");
        let b = fingerprint("kubernetes:auth:ns:sa:role", "https://vault:8200");
        let c = fingerprint("kubernetes:auth:ns:sa:role", "https://vault2:8200");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn cache_reuses_slot_for_same_key() {
        let cache = test_cache(10, 0.67);
        let slot_a = cache.slot_for("fp-1").await;
        let slot_b = cache.slot_for("fp-1").await;
        assert!(Arc::ptr_eq(&slot_a, &slot_b));
    }

    #[tokio::test]
    async fn drain_tokens_empties_the_cache() {
        let cache = test_cache(10, 0.67);
        let slot = cache.slot_for("fp-1").await;
        *slot.lock().await = Some(CachedClient {
            token: crate::auth::SecretString::new("tok".to_string()),
            renewable: true,
            expires_at: Instant::now() + Duration::from_secs(60),
            lease_duration: Duration::from_secs(60),
            tainted: false,
            renewal: None,
        });
        let drained = cache.drain_tokens().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "fp-1");
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn disable_is_reflected_immediately() {
        let cache = test_cache(10, 0.67);
        assert!(!cache.shutting_down.load(std::sync::atomic::Ordering::Relaxed));
        cache.disable();
        assert!(cache.shutting_down.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[tokio::test]
    async fn cache_evicts_entries_not_in_live_set() {
        let cache = test_cache(10, 0.67);
        let _ = cache.slot_for("keep").await;
        let _ = cache.slot_for("drop").await;
        let mut live = HashMap::new();
        live.insert("keep".to_string(), ());
        cache.evict_stale(&live).await;
        assert_eq!(cache.len().await, 1);
    }
}
