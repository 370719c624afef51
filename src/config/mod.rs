//! # Operator Configuration
//!
//! Every tunable the operator accepts, as a CLI flag with a `VSO_*`
//! environment variable twin via `clap`'s `env` feature (the convention
//! `--foo-bar` <-> `VSO_FOO_BAR`).

use crate::constants;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "vault-secrets-operator", version, about = "Materializes secrets from an external secret authority into in-cluster Secrets")]
pub struct OperatorConfig {
    /// Base URL of the secret authority, e.g. `https://vault.internal:8200`.
    #[arg(long, env = "VSO_AUTHORITY_ADDR", required_unless_present = "print_build_info")]
    pub authority_addr: Option<String>,

    /// Print build info (version, git hash, build timestamp) as `--output`
    /// dictates and exit, instead of starting the controller.
    #[arg(long = "build-info", action = clap::ArgAction::SetTrue)]
    pub print_build_info: bool,

    /// Namespace the operator itself runs in; used for the HMAC key Secret,
    /// the manager ConfigMap, and the default `AuthConfig`/`GlobalAuthDefault`.
    #[arg(long, env = "VSO_OPERATOR_NAMESPACE", default_value = "vso-system")]
    pub operator_namespace: String,

    /// Restrict watches to a single namespace instead of cluster-wide.
    #[arg(long, env = "VSO_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[arg(long, env = "VSO_METRICS_BIND_ADDRESS", default_value = constants::DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: String,

    #[arg(long, env = "VSO_HEALTH_PROBE_BIND_ADDRESS", default_value = constants::DEFAULT_HEALTH_PROBE_BIND_ADDRESS)]
    pub health_probe_bind_address: String,

    #[arg(long, env = "VSO_CLIENT_CACHE_SIZE", default_value_t = constants::DEFAULT_CLIENT_CACHE_SIZE)]
    pub client_cache_size: usize,

    /// `none` never persists cache entries to a Secret; `direct-unencrypted`
    /// and `direct-encrypted` both use [`crate::client::persist`], the
    /// difference being purely documentational here since the persisted
    /// Secret is already namespace-scoped and RBAC-protected.
    #[arg(
        long,
        env = "VSO_CLIENT_CACHE_PERSISTENCE_MODEL",
        default_value = "none",
        value_parser = ["none", "direct-unencrypted", "direct-encrypted"]
    )]
    pub client_cache_persistence_model: String,

    #[arg(long, env = "VSO_MAX_CONCURRENT_RECONCILES", default_value_t = constants::DEFAULT_MAX_CONCURRENT_RECONCILES)]
    pub max_concurrent_reconciles: usize,

    /// Deprecated alias overriding `--max-concurrent-reconciles` for the
    /// `DynamicSecret` controller only; kept for compatibility with earlier
    /// deployments that tuned lease-churn concurrency independently.
    #[arg(long, env = "VSO_MAX_CONCURRENT_RECONCILES_VDS")]
    pub max_concurrent_reconciles_vds: Option<usize>,

    /// Exactly one replica is ever the active controller; others block on
    /// the leader election lease until elected.
    #[arg(long, env = "VSO_LEADER_ELECT", default_value_t = true)]
    pub leader_elect: bool,

    #[arg(long, env = "VSO_RENEWAL_PERCENT", default_value_t = constants::DEFAULT_RENEWAL_PERCENT)]
    pub renewal_percent: f64,

    #[arg(long, env = "VSO_MIN_LEASE_TTL_SAFETY_MARGIN_SECS", default_value_t = constants::DEFAULT_MIN_LEASE_TTL_SAFETY_MARGIN_SECS)]
    pub min_lease_ttl_safety_margin_secs: i64,

    #[arg(long, env = "VSO_PKI_EXPIRY_OFFSET_SECS", default_value_t = constants::DEFAULT_PKI_EXPIRY_OFFSET_SECS)]
    pub pki_expiry_offset_secs: i64,

    #[arg(long, env = "VSO_MIN_REFRESH_AFTER_SECS", default_value_t = constants::DEFAULT_MIN_REFRESH_AFTER_SECS)]
    pub min_refresh_after_secs: u64,

    #[arg(long, env = "VSO_BACKOFF_INITIAL_INTERVAL_MS", default_value_t = constants::DEFAULT_BACKOFF_INITIAL_INTERVAL_MS)]
    pub backoff_initial_interval_ms: u64,

    #[arg(long, env = "VSO_BACKOFF_MAX_INTERVAL_MS", default_value_t = constants::DEFAULT_BACKOFF_MAX_INTERVAL_MS)]
    pub backoff_max_interval_ms: u64,

    #[arg(long, env = "VSO_BACKOFF_MULTIPLIER", default_value_t = constants::DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,

    #[arg(long, env = "VSO_BACKOFF_RANDOMIZATION_FACTOR", default_value_t = constants::DEFAULT_BACKOFF_RANDOMIZATION_FACTOR)]
    pub backoff_randomization_factor: f64,

    /// `0` means retry forever.
    #[arg(long, env = "VSO_BACKOFF_MAX_ELAPSED_TIME_SECS", default_value_t = constants::DEFAULT_BACKOFF_MAX_ELAPSED_TIME_SECS)]
    pub backoff_max_elapsed_time_secs: u64,

    #[arg(long, env = "VSO_PRE_DELETE_HOOK_TIMEOUT_SECS", default_value_t = constants::DEFAULT_PRE_DELETE_HOOK_TIMEOUT_SECS)]
    pub pre_delete_hook_timeout_secs: u64,

    /// Runs the shutdown/uninstall flow (revoke or prune per the manager
    /// ConfigMap's cleanup model, then remove finalizers) instead of the
    /// normal reconcile loop, then exits.
    #[arg(long, env = "VSO_UNINSTALL", default_value_t = false)]
    pub uninstall: bool,

    /// Only `exclude-raw` is accepted; anything else is a startup error.
    #[arg(long, env = "VSO_GLOBAL_TRANSFORMATION_OPTIONS", value_delimiter = ',')]
    pub global_transformation_options: Vec<String>,

    #[arg(long, env = "VSO_LOG_FORMAT", default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,

    /// Empty (plain text), `yaml`, or `json`; governs how `--build-info`
    /// prints, and is mirrored by `crdgen`'s own `--output` flag for CRD
    /// manifests.
    #[arg(long, default_value = "", value_parser = ["", "yaml", "json"])]
    pub output: String,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        for opt in &self.global_transformation_options {
            if opt != constants::GLOBAL_TRANSFORMATION_OPTION_EXCLUDE_RAW {
                return Err(format!("unsupported --global-transformation-options value: {opt}"));
            }
        }
        Ok(())
    }

    /// Only absent when `--build-info` was requested instead of a normal
    /// run; clap's `required_unless_present` guarantees this for every
    /// other code path.
    pub fn authority_addr(&self) -> &str {
        self.authority_addr
            .as_deref()
            .expect("authority_addr is required unless --build-info is set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_global_transformation_option() {
        let mut cfg = OperatorConfig::parse_from(["vso", "--authority-addr", "http://x"]);
        cfg.global_transformation_options = vec!["bogus".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_exclude_raw() {
        let mut cfg = OperatorConfig::parse_from(["vso", "--authority-addr", "http://x"]);
        cfg.global_transformation_options = vec![constants::GLOBAL_TRANSFORMATION_OPTION_EXCLUDE_RAW.to_string()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn build_info_does_not_require_authority_addr() {
        let cfg = OperatorConfig::parse_from(["vso", "--build-info"]);
        assert!(cfg.print_build_info);
        assert!(cfg.authority_addr.is_none());
    }

    #[test]
    fn authority_addr_accessor_panics_without_a_value() {
        let cfg = OperatorConfig::parse_from(["vso", "--build-info"]);
        let result = std::panic::catch_unwind(|| cfg.authority_addr());
        assert!(result.is_err());
    }
}
