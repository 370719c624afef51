//! `AppSecret` reconciler.
//!
//! Fetches an opaque bundle from an upstream app integration exposed by the
//! authority. There is no lease or certificate to track, so the next
//! requeue is just `max(declared refreshAfter, --min-refresh-after-hvsa)`.

use super::duration;
use super::{authenticate, check_and_write, gather_plan, record_event, reset_backoff, resolve_auth, Ctx, ReconcileError};
use crate::crd::msr::{AppSecret, AppSecretStatus, HasConditions};
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
const KIND: &str = "AppSecret";

pub async fn reconcile(obj: Arc<AppSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    super::timed(KIND, async move {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<AppSecret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
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

async fn do_apply(obj: Arc<AppSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let uid = obj.uid().unwrap_or_default();
    let spec = &obj.spec;

    let auth_spec = resolve_auth(&ctx, &namespace, spec.auth_ref.as_ref()).await?;
    let token = authenticate(&ctx, &namespace, &auth_spec).await?;

    let bundle = ctx.authority.read_app_bundle(&token, &spec.app_name).await?;

    let plan = gather_plan(&ctx, &namespace, &spec.destination).await?;
    let raw: BTreeMap<String, serde_json::Value> = bundle.into_iter().collect();
    let data = crate::transform::apply(&plan, &raw, &ctx.regex_cache)?;

    let owner = Owner {
        uid: uid.clone(),
        kind: KIND.to_string(),
        name: name.clone(),
        api_version: API_VERSION.to_string(),
        controller: true,
    };
    let previous_mac = obj.status.as_ref().and_then(|s| s.common.secret_mac.clone());
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
    let reason = if outcome.changed { "app bundle written" } else { "no drift detected" };
    status.set_condition(Condition::ready(reason));
    patch_status(&ctx, &namespace, &name, status).await?;

    if outcome.changed {
        record_event(&ctx, obj.as_ref(), EventType::Normal, "Synced", Some(reason.to_string())).await;
    }

    reset_backoff(&ctx, &uid);
    info!(namespace, name, "app secret reconciled");

    let declared = spec
        .refresh_after
        .as_deref()
        .and_then(|v| duration::parse(v).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let next = declared.max(ctx.config.min_refresh_after_secs).max(1);
    Ok(Action::requeue(StdDuration::from_secs(next)))
}

async fn do_cleanup(obj: Arc<AppSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
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
    status: AppSecretStatus,
) -> Result<(), ReconcileError> {
    let api: Api<AppSecret> = Api::namespaced(ctx.k8s_client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}
