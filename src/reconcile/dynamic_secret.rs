//! `DynamicSecret` reconciler.
//!
//! Each reconcile either renews the existing lease in place (cheap, no new
//! credential material minted) or, when there is no lease yet or the
//! authority hands back a shortened TTL on renewal, mints a fresh one via
//! [`crate::authority::Authority::read_dynamic`] and rewrites the
//! destination. The next requeue always tracks whichever lease is now live.

use super::{authenticate, check_and_write, gather_plan, record_event, reset_backoff, resolve_auth, Ctx, ReconcileError};
use crate::crd::msr::{DynamicSecret, DynamicSecretStatus, HasConditions};
use crate::crd::status::Condition;
use crate::sync::Owner;
use futures::FutureExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

const API_VERSION: &str = "secrets.vso.io/v1alpha1";
const KIND: &str = "DynamicSecret";

pub async fn reconcile(obj: Arc<DynamicSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    super::timed(KIND, async move {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<DynamicSecret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
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

fn requeue_for(lease_ttl_secs: i64, renewal_percent: f64) -> StdDuration {
    let target = (lease_ttl_secs as f64 * renewal_percent) as i64
        - crate::constants::DEFAULT_LEASE_RENEWAL_EPSILON_SECS;
    StdDuration::from_secs(target.max(1) as u64)
}

async fn do_apply(obj: Arc<DynamicSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let uid = obj.uid().unwrap_or_default();
    let spec = &obj.spec;

    let auth_spec = resolve_auth(&ctx, &namespace, spec.auth_ref.as_ref()).await?;
    let token = authenticate(&ctx, &namespace, &auth_spec).await?;

    let existing_lease = obj.status.as_ref().and_then(|s| s.lease_id.clone());

    if let Some(lease_id) = &existing_lease {
        match ctx.authority.renew_lease(&token, lease_id).await {
            Ok(new_ttl) if new_ttl >= ctx.config.min_lease_ttl_safety_margin_secs => {
                crate::observability::metrics::increment_lease_renewals();
                let mut status = obj.status.clone().unwrap_or_default();
                status.lease_duration_seconds = Some(new_ttl);
                status.common.observed_generation = obj.meta().generation;
                status.set_condition(Condition::ready("lease renewed"));
                patch_status(&ctx, &namespace, &name, status).await?;
                record_event(&ctx, obj.as_ref(), EventType::Normal, "LeaseRenewed", Some(format!("lease {lease_id} renewed, ttl {new_ttl}s"))).await;
                reset_backoff(&ctx, &uid);
                info!(namespace, name, lease_id, new_ttl, "dynamic lease renewed");
                return Ok(Action::requeue(requeue_for(new_ttl, spec.renewal_percent)));
            }
            Ok(shortened) => {
                warn!(
                    namespace,
                    name,
                    lease_id,
                    shortened_ttl = shortened,
                    "renewal returned a shortened ttl, minting new credentials instead"
                );
            }
            Err(e) => {
                warn!(namespace, name, lease_id, error = %e, "lease renewal failed, minting new credentials");
            }
        }
    }

    let params: std::collections::HashMap<String, serde_json::Value> =
        spec.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let read = ctx
        .authority
        .read_dynamic(&token, &spec.mount, &spec.path, &params)
        .await?;

    if read.lease_id.is_none() && !spec.allow_static_creds {
        return Err(ReconcileError::Rejected(
            "authority returned non-leased credentials but allowStaticCreds is false".to_string(),
        ));
    }

    let plan = gather_plan(&ctx, &namespace, &spec.destination).await?;
    let lease_id = read.lease_id.clone();
    let lease_duration = read.lease_duration_secs;
    let renewable = read.renewable;
    let raw: BTreeMap<String, serde_json::Value> = read.data.into_iter().collect();
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
    status.lease_id = lease_id;
    status.lease_duration_seconds = lease_duration;
    status.renewable = Some(renewable);
    let reason = if outcome.changed { "new dynamic credentials written" } else { "no drift detected" };
    status.set_condition(Condition::ready(reason));
    patch_status(&ctx, &namespace, &name, status).await?;

    if outcome.changed {
        record_event(&ctx, obj.as_ref(), EventType::Normal, "Synced", Some(reason.to_string())).await;
    }

    reset_backoff(&ctx, &uid);
    info!(namespace, name, "dynamic secret reconciled");

    let ttl = lease_duration.unwrap_or(3600).max(1);
    Ok(Action::requeue(requeue_for(ttl, spec.renewal_percent)))
}

async fn do_cleanup(obj: Arc<DynamicSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    if obj.spec.revoke {
        if let Some(lease_id) = obj.status.as_ref().and_then(|s| s.lease_id.clone()) {
            let auth_spec = resolve_auth(&ctx, &namespace, obj.spec.auth_ref.as_ref()).await?;
            match authenticate(&ctx, &namespace, &auth_spec).await {
                Ok(token) => {
                    if let Err(e) = ctx.authority.revoke_lease(&token, &lease_id).await {
                        warn!(namespace, lease_id, error = %e, "best-effort lease revoke failed");
                    }
                }
                Err(e) => warn!(namespace, lease_id, error = %e, "could not authenticate to revoke lease"),
            }
        }
    }
    if obj.spec.destination.create && obj.spec.destination.delete_on_finalize {
        let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
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
    status: DynamicSecretStatus,
) -> Result<(), ReconcileError> {
    let api: Api<DynamicSecret> = Api::namespaced(ctx.k8s_client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}
