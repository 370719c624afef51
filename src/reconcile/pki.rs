//! `PkiSecret` reconciler.
//!
//! Issues a certificate from a PKI mount and reschedules the next issuance
//! at `cert_ttl - expiryOffset`. A still-valid certificate recorded in
//! `Status` is left alone; only an expiring one triggers a fresh
//! `issue_certificate` call.

use super::{authenticate, check_and_write, gather_plan, record_event, reset_backoff, resolve_auth, Ctx, ReconcileError};
use crate::crd::msr::{HasConditions, PkiSecret, PkiSecretStatus};
use crate::crd::status::Condition;
use crate::sync::{Owner, SyncRequest};
use futures::FutureExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

const API_VERSION: &str = "secrets.vso.io/v1alpha1";
const KIND: &str = "PkiSecret";

pub async fn reconcile(obj: Arc<PkiSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    super::timed(KIND, async move {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<PkiSecret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
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

fn expiry_offset_secs(ctx: &Ctx, declared: Option<&str>) -> i64 {
    match declared.and_then(|v| super::duration::parse(v).ok()) {
        Some(d) => d.as_secs() as i64,
        None => ctx.config.pki_expiry_offset_secs,
    }
}

async fn do_apply(obj: Arc<PkiSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let uid = obj.uid().unwrap_or_default();
    let spec = &obj.spec;
    let offset = expiry_offset_secs(&ctx, spec.expiry_offset.as_deref());
    let now = chrono::Utc::now().timestamp();

    if let Some(status) = &obj.status {
        if let Some(expiration) = status.expiration {
            if expiration - offset > now {
                reset_backoff(&ctx, &uid);
                let wait = (expiration - offset - now).max(1) as u64;
                return Ok(Action::requeue(StdDuration::from_secs(wait)));
            }
        }
    }

    let auth_spec = resolve_auth(&ctx, &namespace, spec.auth_ref.as_ref()).await?;
    let token = authenticate(&ctx, &namespace, &auth_spec).await?;

    let cert = ctx
        .authority
        .issue_certificate(
            &token,
            &spec.mount,
            &spec.role,
            &spec.common_name,
            &spec.alt_names,
            &spec.ip_sans,
            &spec.other_sans,
            spec.ttl.as_deref(),
        )
        .await?;

    let plan = gather_plan(&ctx, &namespace, &spec.destination).await?;
    let mut raw = BTreeMap::new();
    raw.insert("certificate".to_string(), Value::String(cert.certificate.clone()));
    raw.insert("private_key".to_string(), Value::String(cert.private_key.clone()));
    raw.insert(
        "ca_chain".to_string(),
        Value::Array(cert.ca_chain.iter().cloned().map(Value::String).collect()),
    );
    raw.insert("serial_number".to_string(), Value::String(cert.serial_number.clone()));
    raw.insert("expiration".to_string(), Value::Number(cert.expiration.into()));
    let mut data = crate::transform::apply(&plan, &raw, &ctx.regex_cache)?;

    if spec.destination.r#type == "kubernetes.io/tls" {
        let mut chain = cert.certificate.clone();
        for ca in &cert.ca_chain {
            chain.push('\n');
            chain.push_str(ca);
        }
        data.insert("tls.crt".to_string(), chain.into_bytes());
        data.insert("tls.key".to_string(), cert.private_key.clone().into_bytes());
    }

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
    status.serial_number = Some(cert.serial_number);
    status.expiration = Some(cert.expiration);
    status.set_condition(Condition::ready("certificate issued"));
    patch_status(&ctx, &namespace, &name, status).await?;

    record_event(&ctx, obj.as_ref(), EventType::Normal, "Synced", Some("certificate issued".to_string())).await;

    reset_backoff(&ctx, &uid);
    info!(namespace, name, "pki secret reconciled");

    let wait = (cert.expiration - offset - now).max(1) as u64;
    Ok(Action::requeue(StdDuration::from_secs(wait)))
}

async fn do_cleanup(obj: Arc<PkiSecret>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let serial = obj.status.as_ref().and_then(|s| s.serial_number.clone());

    if obj.spec.revoke {
        if let Some(serial) = &serial {
            let auth_spec = resolve_auth(&ctx, &namespace, obj.spec.auth_ref.as_ref()).await?;
            match authenticate(&ctx, &namespace, &auth_spec).await {
                Ok(token) => {
                    if let Err(e) = ctx.authority.revoke_certificate(&token, &obj.spec.mount, serial).await {
                        warn!(namespace, serial, error = %e, "best-effort certificate revoke failed");
                    }
                }
                Err(e) => warn!(namespace, serial, error = %e, "could not authenticate to revoke certificate"),
            }
        }
    }

    if obj.spec.clear && obj.spec.destination.create {
        let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(ctx.k8s_client.clone(), &namespace);
        let owner = Owner {
            uid: obj.uid().unwrap_or_default(),
            kind: KIND.to_string(),
            name: obj.name_any(),
            api_version: API_VERSION.to_string(),
            controller: true,
        };
        let req = SyncRequest {
            namespace: &namespace,
            name: &obj.spec.destination.name,
            secret_type: &obj.spec.destination.r#type,
            data: BTreeMap::new(),
            labels: &obj.spec.destination.labels,
            annotations: &obj.spec.destination.annotations,
            create: false,
            overwrite: true,
            owner,
        };
        if let Err(e) = crate::sync::sync(&api, req).await {
            warn!(namespace, error = %e, "failed to clear destination secret on finalize");
        }
    } else if obj.spec.destination.create && obj.spec.destination.delete_on_finalize {
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
    status: PkiSecretStatus,
) -> Result<(), ReconcileError> {
    let api: Api<PkiSecret> = Api::namespaced(ctx.k8s_client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}
