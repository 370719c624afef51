//! `StaticSecret` reconciler.
//!
//! Fetches a versioned KV entry from the authority. The next requeue is
//! driven by `refreshAfter` when the user declared one; otherwise the
//! object simply rides the controller's own resync interval.

use super::duration;
use super::{authenticate, check_and_write, gather_plan, record_event, reset_backoff, resolve_auth, Ctx, ReconcileError};
use crate::crd::msr::{HasConditions, StaticSecret, StaticSecretStatus};
use crate::crd::status::Condition;
use crate::sync::Owner;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::info;

const API_VERSION: &str = "secrets.vso.io/v1alpha1";
const KIND: &str = "StaticSecret";
const DEFAULT_RESYNC: StdDuration = StdDuration::from_secs(10 * 60);

pub async fn reconcile(obj: Arc<StaticSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    super::timed(KIND, async move {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<StaticSecret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
        let ctx_apply = Arc::clone(&ctx);
        let ctx_cleanup = Arc::clone(&ctx);
        super::finalizer::run(
            &api,
            obj,
            move |o| do_apply(o, ctx_apply).boxed(),
            move |o| do_cleanup(o, ctx_cleanup).boxed(),
        )
        .await
        .map_err(|e| ReconcileError::Finalizer(e.to_string()))
    })
    .await
}

async fn do_apply(obj: Arc<StaticSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let uid = obj.uid().unwrap_or_default();
    let spec = &obj.spec;

    let auth_spec = resolve_auth(&ctx, &namespace, spec.auth_ref.as_ref()).await?;
    let token = authenticate(&ctx, &namespace, &auth_spec).await?;

    let read = ctx
        .authority
        .read_kv(&token, &spec.mount, &spec.path, spec.version)
        .await?;

    let plan = gather_plan(&ctx, &namespace, &spec.destination).await?;
    let version = read.version;
    let raw: BTreeMap<String, serde_json::Value> = read.data.into_iter().collect();
    let data = crate::transform::apply(&plan, &raw, &ctx.regex_cache)?;

    let owner = Owner {
        uid: uid.clone(),
        kind: KIND.to_string(),
        name: name.clone(),
        api_version: API_VERSION.to_string(),
        controller: true,
    };
    let previous_mac = obj
        .status
        .as_ref()
        .and_then(|s| s.common.secret_mac.clone());
    let outcome = check_and_write(
        &ctx,
        &namespace,
        &spec.destination,
        data,
        owner,
        previous_mac.as_deref(),
    )
    .await?;

    let mut status = obj.status.clone().unwrap_or_default();
    status.common.observed_generation = obj.meta().generation;
    status.common.secret_mac = Some(outcome.mac);
    status.common.last_sync_time = Some(chrono::Utc::now().to_rfc3339());
    status.last_version = version.or(status.last_version);
    let reason = if outcome.changed { "destination secret written" } else { "no drift detected" };
    status.set_condition(Condition::ready(reason));
    patch_status(&ctx, &namespace, &name, status).await?;

    if outcome.changed {
        record_event(&ctx, obj.as_ref(), EventType::Normal, "Synced", Some(reason.to_string())).await;
    }

    reset_backoff(&ctx, &uid);
    info!(namespace, name, "static secret reconciled");

    let next = match &spec.refresh_after {
        Some(v) => duration::parse(v).unwrap_or(DEFAULT_RESYNC),
        None => DEFAULT_RESYNC,
    };
    Ok(Action::requeue(next))
}

async fn do_cleanup(obj: Arc<StaticSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    if obj.spec.destination.create && obj.spec.destination.delete_on_finalize {
        let api: Api<Secret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
        if let Err(e) = api.delete(&obj.spec.destination.name, &kube::api::DeleteParams::default()).await {
            if !matches!(&e, kube::Error::Api(ae) if ae.code == 404) {
                return Err(ReconcileError::Kube(e));
            }
        }
    }
    Ok(Action::await_change())
}

async fn patch_status(
    ctx: &Ctx,
    namespace: &str,
    name: &str,
    status: StaticSecretStatus,
) -> Result<(), ReconcileError> {
    let api: Api<StaticSecret> = Api::namespaced(ctx.k8s_client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}
