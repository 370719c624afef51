//! # vault-secrets-operator
//!
//! Materializes secrets from an external secret authority into in-cluster
//! `Secret` objects. See [`vso`] for the module breakdown.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use kube::runtime::{controller::Action, watcher, Controller};
use kube::Api;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use vso::authority::RestAuthority;
use vso::client::ClientCache;
use vso::config::OperatorConfig;
use vso::crd::msr::{AppSecret, DynamicSecret, PkiSecret, StaticSecret};
use vso::hmac::MacValidator;
use vso::observability::{logging, metrics};
use vso::reconcile::backoff::BackoffRegistry;
use vso::reconcile::{app, dynamic_secret, error_policy, pki, static_secret, Ctx};
use vso::server::{serve_health, serve_metrics, ServerState};
use vso::transform::RegexCache;

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any other operation that touches TLS (the kube
    // client, the authority's reqwest client): rustls 0.23+ has no
    // default crypto provider unless one is installed explicitly.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let config = OperatorConfig::parse();

    if config.print_build_info {
        print_build_info(&config.output);
        return Ok(());
    }

    config.validate().map_err(anyhow::Error::msg)?;

    logging::init(&config.log_format);
    info!(version = env!("CARGO_PKG_VERSION"), "starting vault-secrets-operator");

    metrics::register_metrics()?;

    let k8s_client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build http client")?;

    if config.uninstall {
        return run_uninstall(&k8s_client, &http, &config).await;
    }

    let config = Arc::new(config);
    let authority: Arc<dyn vso::authority::Authority> =
        Arc::new(RestAuthority::new(http.clone(), config.authority_addr().to_string()));
    let client_cache = Arc::new(ClientCache::new(config.client_cache_size, config.renewal_percent, Arc::clone(&authority)));
    let regex_cache = Arc::new(RegexCache::new(vso::constants::DEFAULT_REGEX_CACHE_SIZE));
    let mac = MacValidator::bootstrap(k8s_client.clone(), &config.operator_namespace)
        .await
        .context("failed to bootstrap hmac drift-detection key")?;
    let backoff = Arc::new(BackoffRegistry::new(
        Duration::from_millis(config.backoff_initial_interval_ms),
        Duration::from_millis(config.backoff_max_interval_ms),
        config.backoff_multiplier,
        config.backoff_randomization_factor,
        (config.backoff_max_elapsed_time_secs > 0).then(|| Duration::from_secs(config.backoff_max_elapsed_time_secs)),
    ));

    let ctx = Arc::new(Ctx {
        k8s_client: k8s_client.clone(),
        http,
        authority,
        client_cache: Arc::clone(&client_cache),
        regex_cache,
        mac,
        backoff,
        config: Arc::clone(&config),
    });

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });

    let metrics_addr = config.metrics_bind_address.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(&metrics_addr).await {
            error!(error = %e, "metrics server exited");
        }
    });

    let health_addr = config.health_probe_bind_address.clone();
    let health_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = serve_health(&health_addr, health_state).await {
            error!(error = %e, "health probe server exited");
        }
    });

    tokio::spawn(vso::client::renewal_loop(Arc::clone(&client_cache), Duration::from_secs(30)));

    if config.leader_elect {
        let identity = pod_identity();
        vso::leader::acquire(&k8s_client, &config.operator_namespace, &identity).await;
        tokio::spawn(vso::leader::renew_forever(
            k8s_client.clone(),
            config.operator_namespace.clone(),
            identity,
        ));
    }

    server_state.is_ready.store(true, Ordering::Relaxed);
    info!("controller ready, starting reconcile loops");

    let watch_namespace = config.watch_namespace.clone();
    let max_concurrent = config.max_concurrent_reconciles;
    let vds_concurrent = config.max_concurrent_reconciles_vds.unwrap_or(max_concurrent);

    let static_secrets: Api<StaticSecret> = namespaced_or_all(&ctx.k8s_client, watch_namespace.as_deref());
    let dynamic_secrets: Api<DynamicSecret> = namespaced_or_all(&ctx.k8s_client, watch_namespace.as_deref());
    let pki_secrets: Api<PkiSecret> = namespaced_or_all(&ctx.k8s_client, watch_namespace.as_deref());
    let app_secrets: Api<AppSecret> = namespaced_or_all(&ctx.k8s_client, watch_namespace.as_deref());

    let static_secret_loop = Controller::new(static_secrets, watcher::Config::default())
        .shutdown_on_signal()
        .run(static_secret::reconcile, error_policy, Arc::clone(&ctx))
        .for_each_concurrent(max_concurrent, log_reconcile_stream_error);

    let dynamic_secret_loop = Controller::new(dynamic_secrets, watcher::Config::default())
        .shutdown_on_signal()
        .run(dynamic_secret::reconcile, error_policy, Arc::clone(&ctx))
        .for_each_concurrent(vds_concurrent, log_reconcile_stream_error);

    let pki_secret_loop = Controller::new(pki_secrets, watcher::Config::default())
        .shutdown_on_signal()
        .run(pki::reconcile, error_policy, Arc::clone(&ctx))
        .for_each_concurrent(max_concurrent, log_reconcile_stream_error);

    let app_secret_loop = Controller::new(app_secrets, watcher::Config::default())
        .shutdown_on_signal()
        .run(app::reconcile, error_policy, Arc::clone(&ctx))
        .for_each_concurrent(max_concurrent, log_reconcile_stream_error);

    tokio::join!(static_secret_loop, dynamic_secret_loop, pki_secret_loop, app_secret_loop);

    info!("all controllers stopped");
    Ok(())
}

fn namespaced_or_all<K>(client: &kube::Client, watch_namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn log_reconcile_stream_error<K: std::fmt::Debug>(
    result: Result<(kube::runtime::reflector::ObjectRef<K>, Action), kube::runtime::controller::Error<vso::reconcile::ReconcileError, watcher::Error>>,
) {
    if let Err(e) = result {
        error!(error = %e, "reconcile stream error");
    }
}

async fn run_uninstall(k8s_client: &kube::Client, http: &reqwest::Client, config: &OperatorConfig) -> Result<()> {
    let authority: Arc<dyn vso::authority::Authority> =
        Arc::new(RestAuthority::new(http.clone(), config.authority_addr().to_string()));
    let client_cache = Arc::new(ClientCache::new(config.client_cache_size, config.renewal_percent, Arc::clone(&authority)));

    vso::shutdown::run(
        k8s_client,
        &authority,
        &client_cache,
        &config.operator_namespace,
        config.watch_namespace.as_deref(),
        Duration::from_secs(config.pre_delete_hook_timeout_secs),
    )
    .await
    .context("shutdown coordinator failed")?;

    info!("uninstall cleanup complete");
    Ok(())
}

fn pod_identity() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id()))
}

/// Prints `CARGO_PKG_VERSION` plus the `build.rs`-injected git hash and
/// build timestamp, as `text` (one `key=value` per line) or `json`.
fn print_build_info(output: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let git_hash = env!("BUILD_GIT_HASH");
    let build_datetime = env!("BUILD_DATETIME");

    match output {
        "json" => {
            println!(
                "{}",
                serde_json::json!({
                    "version": version,
                    "gitHash": git_hash,
                    "buildDatetime": build_datetime,
                })
            );
        }
        "yaml" => {
            let info = serde_json::json!({
                "version": version,
                "gitHash": git_hash,
                "buildDatetime": build_datetime,
            });
            print!("{}", serde_yaml::to_string(&info).unwrap_or_default());
        }
        _ => {
            println!("version={version}");
            println!("git_hash={git_hash}");
            println!("build_datetime={build_datetime}");
        }
    }
}
