//! # Constants
//!
//! Compiled-in defaults for the operator. Every value here can be overridden
//! by a CLI flag or its `VSO_*` environment variable twin (see `config`).

/// Default bind address for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
/// Default bind address for the liveness/readiness probe endpoints.
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default number of entries kept in the authenticated-client LRU.
pub const DEFAULT_CLIENT_CACHE_SIZE: usize = 10_000;
/// Default number of compiled regexes kept in the filter LRU.
pub const DEFAULT_REGEX_CACHE_SIZE: usize = 256;
/// Default number of concurrent reconciles per managed-resource kind.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 100;

/// Default renewal point, as a fraction of a token's remaining TTL.
pub const DEFAULT_RENEWAL_PERCENT: f64 = 0.67;
/// Safety margin subtracted from a dynamic lease's requeue time.
pub const DEFAULT_LEASE_RENEWAL_EPSILON_SECS: i64 = 5;
/// Minimum acceptable TTL returned by a lease renewal before the client
/// gives up renewing and mints a fresh lease instead.
pub const DEFAULT_MIN_LEASE_TTL_SAFETY_MARGIN_SECS: i64 = 10;
/// Default offset subtracted from a PKI certificate's TTL when computing
/// the next requeue time.
pub const DEFAULT_PKI_EXPIRY_OFFSET_SECS: i64 = 60;
/// Default floor under an App-bundle's declared refresh interval.
pub const DEFAULT_MIN_REFRESH_AFTER_SECS: u64 = 60;

/// Default exponential backoff tunables.
pub const DEFAULT_BACKOFF_INITIAL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_INTERVAL_MS: u64 = 5 * 60 * 1_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_BACKOFF_RANDOMIZATION_FACTOR: f64 = 0.5;
/// `0` means "no cap" — a resource will keep backing off forever.
pub const DEFAULT_BACKOFF_MAX_ELAPSED_TIME_SECS: u64 = 0;

/// Default `--pre-delete-hook-timeout-seconds` for the shutdown coordinator.
pub const DEFAULT_PRE_DELETE_HOOK_TIMEOUT_SECS: u64 = 60;

/// Compiled-in finalizer name stamped on every managed resource.
pub const FINALIZER_NAME: &str = "secrets.vso.io/finalizer";

/// Labels the operator stamps on every destination Secret it creates.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_MANAGED_BY_VALUE: &str = "vault-secrets-operator";
pub const LABEL_OWNER_UID: &str = "secrets.vso.io/owner-uid";
pub const LABEL_OWNER_KIND: &str = "secrets.vso.io/owner-kind";

/// Reserved destination key holding the JSON-encoded raw authority response,
/// unless `excludeRaw` is set.
pub const RAW_DATA_KEY: &str = "_raw";

/// Name of the operator-wide Secret holding the HMAC drift-detection key.
pub const HMAC_KEY_SECRET_NAME: &str = "vso-hmac-key";
pub const HMAC_KEY_SECRET_DATA_KEY: &str = "key";
/// HMAC key length in bytes (128 bits).
pub const HMAC_KEY_LEN_BYTES: usize = 16;

/// Prefix for per-fingerprint persisted client-cache Secrets.
pub const CLIENT_CACHE_SECRET_PREFIX: &str = "vso-cc";

/// Name of the operator's shared manager ConfigMap.
pub const MANAGER_CONFIGMAP_NAME: &str = "vso-manager-config";
pub const MANAGER_CONFIGMAP_KEY_SHUTDOWN: &str = "shutdown";
pub const MANAGER_CONFIGMAP_KEY_CLEANUP_MODEL: &str = "vaultTokensCleanupModel";
pub const MANAGER_CONFIGMAP_KEY_TOKENS_REVOKED: &str = "vaultTokensRevoked";

/// Only token accepted by `--global-transformation-options`.
pub const GLOBAL_TRANSFORMATION_OPTION_EXCLUDE_RAW: &str = "exclude-raw";

/// Default mount used when neither an AC nor a GAD names one.
pub const DEFAULT_AUTH_MOUNT: &str = "auth";

/// Compiled-in operator group used for rollout-restart annotations.
pub const ROLLOUT_ANNOTATION_GROUP: &str = "secrets.vso.io";

/// Maximum reference hop count when resolving cross-object auth lookups.
pub const MAX_REFERENCE_HOP_DEPTH: u8 = 1;
