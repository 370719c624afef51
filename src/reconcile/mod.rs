//! # Reconciler
//!
//! Shared reconcile context and error policy for all four managed secret
//! resource kinds. Each kind's own module (`static_secret`, `dynamic_secret`,
//! `pki`, `app`) drives the per-object state machine; this module holds
//! what's common across them.

pub mod app;
pub mod backoff;
pub mod duration;
pub mod dynamic_secret;
pub mod finalizer;
pub mod pki;
pub mod static_secret;

use crate::auth::{build_provider, merge_with_defaults};
use crate::authority::Authority;
use crate::client::{fingerprint, ClientCache};
use crate::config::OperatorConfig;
use crate::crd::auth::{AuthConfig, AuthConfigRef, AuthConfigSpec, GlobalAuthDefault};
use crate::crd::transformation::{Destination, Transformation};
use crate::hmac::MacValidator;
use crate::observability::metrics;
use crate::sync::{self, Owner, SyncRequest};
use crate::transform::{build_plan, RegexCache, TransformPlan};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, warn};

/// Everything a reconcile function needs, shared across every managed
/// secret resource kind and constructed once at startup.
pub struct Ctx {
    pub k8s_client: kube::Client,
    pub http: reqwest::Client,
    pub authority: Arc<dyn Authority>,
    pub client_cache: Arc<ClientCache>,
    pub regex_cache: Arc<RegexCache>,
    pub mac: MacValidator,
    pub backoff: Arc<backoff::BackoffRegistry>,
    pub config: Arc<OperatorConfig>,
}

/// Errors surfaced from a single reconcile attempt. Every variant maps to
/// a `Status.Conditions` entry and a `BackingOff` requeue in [`error_policy`].
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("auth resolution failed: {0}")]
    Auth(#[from] crate::auth::AuthError),
    #[error("client factory failed: {0}")]
    Client(#[from] crate::client::ClientError),
    #[error("authority request failed: {0}")]
    Authority(#[from] crate::authority::AuthorityError),
    #[error("transformation failed: {0}")]
    Transform(#[from] crate::transform::TransformError),
    #[error("sync failed: {0}")]
    Sync(#[from] crate::sync::SyncError),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("finalizer error: {0}")]
    Finalizer(String),
    /// Terminal: the object cannot proceed without a user edit (namespace
    /// not allow-listed, orphaned destination owned by someone else, ...).
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Shared `error_policy` for every `Controller::new(...).run(...)` in
/// `main.rs`: logs, bumps the error counter, and requeues after the
/// object's own jittered backoff interval (falling back to a minute if the
/// object has exhausted `backoffMaxElapsedTimeSecs`).
pub fn error_policy<K>(obj: Arc<K>, err: &ReconcileError, ctx: Arc<Ctx>) -> Action
where
    K: ResourceExt + kube::Resource<DynamicType = ()> + Send + Sync + 'static,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    error!(name, namespace, error = %err, "reconcile failed");
    metrics::increment_reconcile_errors();

    if matches!(err, ReconcileError::Rejected(_)) {
        // Rejected is terminal until the user edits the object; the
        // controller's own resync (driven by watch events) is what moves it
        // back to `Resolving`, not a tight requeue loop.
        metrics::increment_requeues("rejected");
        let note = err.to_string();
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            record_event(&ctx, obj.as_ref(), EventType::Warning, "Rejected", Some(note)).await;
        });
        return Action::requeue(StdDuration::from_secs(10 * 60));
    }

    let uid = obj.uid().unwrap_or_default();
    let wait = ctx.backoff.advance(&uid).unwrap_or(StdDuration::from_secs(60));
    metrics::increment_requeues("error-backoff");
    Action::requeue(wait)
}

/// Called after a successful reconcile to clear any accumulated backoff so
/// the next failure starts from the initial interval again.
pub fn reset_backoff(ctx: &Ctx, uid: &str) {
    ctx.backoff.reset(uid);
}

/// Records a Kubernetes event against an MSR object for a user-visible state
/// transition (lease renewed, destination written, rejected, ...).
/// Best-effort: a publish failure is logged and otherwise ignored, since it
/// must never affect the reconcile's own outcome.
pub async fn record_event<K>(ctx: &Ctx, obj: &K, type_: EventType, reason: &str, note: Option<String>)
where
    K: kube::Resource<DynamicType = ()>,
{
    let recorder = Recorder::new(ctx.k8s_client.clone(), reporter(), obj.object_ref(&()));
    let event = Event {
        type_,
        reason: reason.to_string(),
        note,
        action: reason.to_string(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(event).await {
        warn!(reason, error = %e, "failed to publish kubernetes event");
    }
}

fn reporter() -> Reporter {
    "vault-secrets-operator".into()
}

/// Wraps a kind's `reconcile` body with the reconciliation-count and
/// duration metrics, so each of the four kinds only has to opt in once.
pub async fn timed<Fut>(kind: &'static str, fut: Fut) -> Result<Action, ReconcileError>
where
    Fut: std::future::Future<Output = Result<Action, ReconcileError>>,
{
    metrics::increment_reconciliations(kind);
    let start = std::time::Instant::now();
    let result = fut.await;
    metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
    result
}

/// Resolve `auth_ref` against `msr_namespace`: an absent ref falls back to
/// the operator namespace's own `default` `AuthConfig`; a present one
/// defaults its own `namespace`/`name` fields the same way. The result is
/// merged with the operator-wide `GlobalAuthDefault` singleton (also always
/// named `default`, in the operator namespace).
pub async fn resolve_auth(
    ctx: &Ctx,
    msr_namespace: &str,
    auth_ref: Option<&AuthConfigRef>,
) -> Result<AuthConfigSpec, ReconcileError> {
    let (ac_namespace, ac_name) = match auth_ref {
        Some(r) => (
            r.namespace.clone().unwrap_or_else(|| msr_namespace.to_string()),
            r.name.clone().unwrap_or_else(|| "default".to_string()),
        ),
        None => (ctx.config.operator_namespace.clone(), "default".to_string()),
    };

    let ac_api: Api<AuthConfig> = Api::namespaced(ctx.k8s_client.clone(), &ac_namespace);
    let ac = ac_api.get(&ac_name).await?;

    if !namespace_allowed(&ac.spec, &ac_namespace, msr_namespace, &ctx.config.operator_namespace) {
        return Err(ReconcileError::Rejected(format!(
            "namespace {msr_namespace} is not permitted to reference AuthConfig {ac_namespace}/{ac_name}"
        )));
    }

    let gad_api: Api<GlobalAuthDefault> = Api::namespaced(ctx.k8s_client.clone(), &ctx.config.operator_namespace);
    let gad = gad_api.get_opt("default").await?;

    Ok(merge_with_defaults(&ac.spec, gad.as_ref().map(|g| &g.spec)))
}

fn namespace_allowed(
    ac: &AuthConfigSpec,
    ac_namespace: &str,
    msr_namespace: &str,
    operator_namespace: &str,
) -> bool {
    if ac_namespace == msr_namespace {
        return true;
    }
    match &ac.allowed_namespaces {
        Some(list) if list.iter().any(|n| n == "*") => true,
        Some(list) => list.iter().any(|n| n == msr_namespace),
        None => ac_namespace == operator_namespace,
    }
}

/// Resolve a credential provider from `auth_spec`, establish its stable
/// identity, and return a live token from the authenticated-client cache
/// (logging in, or renewing, as needed).
pub async fn authenticate(
    ctx: &Ctx,
    msr_namespace: &str,
    auth_spec: &AuthConfigSpec,
) -> Result<String, ReconcileError> {
    let provider: Arc<dyn crate::auth::CredentialProvider> = Arc::from(build_provider(auth_spec)?);
    let identity = provider.init(&ctx.k8s_client, msr_namespace).await?;
    let key = fingerprint(&identity, ctx.config.authority_addr());

    let persistence_enabled = ctx.config.client_cache_persistence_model != "none";
    if persistence_enabled {
        match crate::client::persist::load(&ctx.k8s_client, &ctx.config.operator_namespace, &ctx.mac, &key).await {
            Ok(Some(persisted)) if persisted.expires_at_unix > chrono::Utc::now().timestamp() => {
                ctx.client_cache
                    .seed_if_absent(
                        &key,
                        crate::auth::SecretString::new(persisted.token),
                        persisted.expires_at_unix,
                        Arc::clone(&provider),
                        &ctx.k8s_client,
                        &ctx.http,
                        ctx.config.authority_addr(),
                        msr_namespace,
                    )
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!(fingerprint = %key, error = %e, "failed to read persisted client cache entry"),
        }
    }

    let token = ctx
        .client_cache
        .get_or_login(
            &key,
            Arc::clone(&provider),
            &ctx.k8s_client,
            &ctx.http,
            ctx.config.authority_addr(),
            msr_namespace,
        )
        .await?;

    if persistence_enabled {
        if let Some((cached_token, expires_at_unix)) = ctx.client_cache.snapshot_for_persistence(&key).await {
            let persisted = crate::client::PersistedClient {
                token: cached_token,
                expires_at_unix,
            };
            if let Err(e) = crate::client::persist::save(&ctx.k8s_client, &ctx.config.operator_namespace, &ctx.mac, &key, &persisted).await
            {
                warn!(fingerprint = %key, error = %e, "failed to persist authenticated client cache entry");
            }
        }
    }

    Ok(token)
}

/// Gather every `Transformation` object a destination references (resolving
/// cross-namespace refs) and build its deterministic rendering plan.
pub async fn gather_plan(
    ctx: &Ctx,
    msr_namespace: &str,
    destination: &Destination,
) -> Result<TransformPlan, ReconcileError> {
    let mut resolved = BTreeMap::new();
    let same_ns_api: Api<Transformation> = Api::namespaced(ctx.k8s_client.clone(), msr_namespace);

    for r#ref in &destination.transformation.transformation_refs {
        let ref_namespace = r#ref.namespace.clone().unwrap_or_else(|| msr_namespace.to_string());
        let lookup_key = format!("{ref_namespace}/{}", r#ref.name);
        if resolved.contains_key(&lookup_key) {
            return Err(ReconcileError::Rejected(format!(
                "duplicate transformation reference {lookup_key}"
            )));
        }
        let obj = if ref_namespace == msr_namespace {
            same_ns_api.get(&r#ref.name).await?
        } else {
            let api: Api<Transformation> = Api::namespaced(ctx.k8s_client.clone(), &ref_namespace);
            api.get(&r#ref.name).await?
        };
        if obj.status.as_ref().and_then(|s| s.valid).is_some_and(|valid| !valid) {
            return Err(ReconcileError::Rejected(format!(
                "transformation {lookup_key} is in an invalid validation state"
            )));
        }
        resolved.insert(lookup_key, obj);
    }

    build_plan(&destination.transformation, &resolved)
        .map_err(crate::transform::TransformError::from)
        .map_err(ReconcileError::from)
}

/// Outcome of the Checking/Writing/Rolling phase of the state machine.
pub struct WriteOutcome {
    pub changed: bool,
    pub mac: String,
}

/// `Checking` -> (`Scheduled` | `Writing` -> `Rolling` -> `Scheduled`).
///
/// Compares `data`'s MAC against `previous_mac`; on a match, nothing is
/// written. On a mismatch (or no prior MAC recorded), syncs the destination
/// Secret, prunes orphans if configured, and patches any declared rollout
/// targets. Rollout failures are logged, never propagated: per the state
/// machine, `Rolling` always advances to `Scheduled`.
pub async fn check_and_write(
    ctx: &Ctx,
    msr_namespace: &str,
    destination: &Destination,
    data: BTreeMap<String, Vec<u8>>,
    owner: Owner,
    previous_mac: Option<&str>,
) -> Result<WriteOutcome, ReconcileError> {
    let mac = ctx.mac.compute(&data);
    let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(ctx.k8s_client.clone(), msr_namespace);

    if previous_mac.is_some_and(|m| m == mac) {
        // Upstream source data is unchanged, but the destination itself may
        // have been edited out-of-band; only skip the write if the live
        // Secret's own content still matches what we last wrote.
        let live_mac = match api.get_opt(&destination.name).await? {
            Some(secret) => secret.data.map(|live_data| {
                let live: BTreeMap<String, Vec<u8>> =
                    live_data.into_iter().map(|(k, v)| (k, v.0)).collect();
                ctx.mac.compute(&live)
            }),
            None => None,
        };
        if live_mac.as_deref() == Some(mac.as_str()) {
            metrics::increment_drift_skipped();
            return Ok(WriteOutcome { changed: false, mac });
        }
    }
    let req = SyncRequest {
        namespace: msr_namespace,
        name: &destination.name,
        secret_type: &destination.r#type,
        data,
        labels: &destination.labels,
        annotations: &destination.annotations,
        create: destination.create,
        overwrite: destination.overwrite,
        owner: owner.clone(),
    };
    let written = sync::sync(&api, req).await?;
    if written {
        metrics::increment_destination_writes();
    } else {
        metrics::increment_drift_skipped();
    }

    if destination.prune_orphans {
        if let Err(e) = sync::prune_orphans(&api, &owner.uid, &destination.name).await {
            warn!(namespace = msr_namespace, error = %e, "orphan prune failed");
        }
    }

    if written && !destination.rollout_restart_targets.is_empty() {
        let now = chrono::Utc::now().to_rfc3339();
        crate::rollout::restart_targets(&ctx.k8s_client, msr_namespace, &destination.rollout_restart_targets, &now).await;
    }

    Ok(WriteOutcome { changed: written, mac })
}
