//! # Shutdown Coordinator
//!
//! Runs instead of the normal reconcile loop when the operator is started
//! with `--uninstall`. Reads the declared cleanup model from the shared
//! manager `ConfigMap`, stops the client factory from minting new logins,
//! revokes or prunes whatever cached credential material the model calls
//! for, and strips the finalizer from every managed resource so a
//! `kubectl delete` of the CRDs (or the namespaces containing instances of
//! them) is not left hanging.

use crate::client::ClientCache;
use crate::constants::{
    CLIENT_CACHE_SECRET_PREFIX, FINALIZER_NAME, MANAGER_CONFIGMAP_KEY_CLEANUP_MODEL,
    MANAGER_CONFIGMAP_KEY_TOKENS_REVOKED, MANAGER_CONFIGMAP_NAME,
};
use crate::crd::msr::{AppSecret, DynamicSecret, PkiSecret, StaticSecret};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("shutdown did not complete within the {0:?} deadline")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupModel {
    None,
    Revoke,
    Prune,
    All,
}

impl CleanupModel {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("revoke") => Self::Revoke,
            Some("prune") => Self::Prune,
            Some("all") => Self::All,
            _ => Self::None,
        }
    }

    fn revokes(self) -> bool {
        matches!(self, Self::Revoke | Self::All)
    }

    fn prunes(self) -> bool {
        matches!(self, Self::Prune | Self::All)
    }
}

/// Entry point for `--uninstall`. Bounded by `timeout`; a flow that hasn't
/// finished by then returns [`ShutdownError::DeadlineExceeded`] so `main`
/// can exit non-zero rather than hang the pre-delete hook indefinitely.
pub async fn run(
    k8s_client: &kube::Client,
    authority: &Arc<dyn crate::authority::Authority>,
    client_cache: &Arc<ClientCache>,
    operator_namespace: &str,
    watch_namespace: Option<&str>,
    timeout: Duration,
) -> Result<(), ShutdownError> {
    tokio::time::timeout(
        timeout,
        run_inner(k8s_client, authority, client_cache, operator_namespace, watch_namespace),
    )
    .await
    .map_err(|_| ShutdownError::DeadlineExceeded(timeout))?
}

async fn run_inner(
    k8s_client: &kube::Client,
    authority: &Arc<dyn crate::authority::Authority>,
    client_cache: &Arc<ClientCache>,
    operator_namespace: &str,
    watch_namespace: Option<&str>,
) -> Result<(), ShutdownError> {
    let model = read_cleanup_model(k8s_client, operator_namespace).await?;
    info!(?model, "shutdown coordinator starting");

    client_cache.disable();

    if model.revokes() {
        revoke_cached_tokens(authority, client_cache).await;
    }

    if model.prunes() {
        prune_persisted_clients(k8s_client, operator_namespace).await;
    }

    if model.revokes() {
        mark_tokens_revoked(k8s_client, operator_namespace).await?;
    }

    remove_all_finalizers(k8s_client, watch_namespace).await;

    info!("shutdown coordinator finished");
    Ok(())
}

async fn read_cleanup_model(k8s_client: &kube::Client, operator_namespace: &str) -> Result<CleanupModel, ShutdownError> {
    let api: Api<ConfigMap> = Api::namespaced(k8s_client.clone(), operator_namespace);
    let cm = match api.get_opt(MANAGER_CONFIGMAP_NAME).await? {
        Some(cm) => cm,
        None => {
            warn!(
                configmap = MANAGER_CONFIGMAP_NAME,
                "manager configmap not found, defaulting cleanup model to none"
            );
            return Ok(CleanupModel::None);
        }
    };
    let raw = cm
        .data
        .as_ref()
        .and_then(|d| d.get(MANAGER_CONFIGMAP_KEY_CLEANUP_MODEL))
        .map(String::as_str);
    Ok(CleanupModel::parse(raw))
}

/// Drain every in-memory cached token and best-effort revoke it at the
/// authority. A revoke failure is logged and otherwise ignored; the process
/// is exiting regardless.
async fn revoke_cached_tokens(authority: &Arc<dyn crate::authority::Authority>, client_cache: &Arc<ClientCache>) {
    let drained = client_cache.drain_tokens().await;
    info!(count = drained.len(), "revoking in-memory cached tokens");
    for (fingerprint, token) in drained {
        if let Err(e) = authority.revoke_self(token.expose()).await {
            warn!(fingerprint, error = %e, "failed to revoke cached token, continuing");
        }
    }
}

/// Delete every persisted client-cache `Secret` in the operator namespace.
/// Their `OwnerReferences` already point at the operator `Deployment`, so a
/// cascade would eventually remove them even if this step is skipped; this
/// just makes the cleanup immediate rather than waiting on garbage
/// collection.
async fn prune_persisted_clients(k8s_client: &kube::Client, operator_namespace: &str) {
    let api: Api<Secret> = Api::namespaced(k8s_client.clone(), operator_namespace);
    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "failed to list secrets while pruning persisted client cache");
            return;
        }
    };

    let mut pruned = 0;
    for secret in list.items {
        let Some(name) = secret.metadata.name.clone() else {
            continue;
        };
        if !name.starts_with(CLIENT_CACHE_SECRET_PREFIX) {
            continue;
        }
        match api.delete(&name, &kube::api::DeleteParams::default()).await {
            Ok(_) => pruned += 1,
            Err(e) => warn!(name, error = %e, "failed to prune persisted client cache secret"),
        }
    }
    info!(pruned, "pruned persisted client cache secrets");
}

/// One-way `false` -> `true` transition; never reset back to `false` once
/// set, since a cleanup run that revoked tokens can't un-revoke them.
async fn mark_tokens_revoked(k8s_client: &kube::Client, operator_namespace: &str) -> Result<(), ShutdownError> {
    let api: Api<ConfigMap> = Api::namespaced(k8s_client.clone(), operator_namespace);
    let patch = serde_json::json!({
        "data": { MANAGER_CONFIGMAP_KEY_TOKENS_REVOKED: "true" }
    });
    api.patch(
        MANAGER_CONFIGMAP_NAME,
        &PatchParams::apply("vault-secrets-operator").force(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

async fn remove_all_finalizers(k8s_client: &kube::Client, watch_namespace: Option<&str>) {
    strip_finalizer::<StaticSecret>(k8s_client, watch_namespace).await;
    strip_finalizer::<DynamicSecret>(k8s_client, watch_namespace).await;
    strip_finalizer::<PkiSecret>(k8s_client, watch_namespace).await;
    strip_finalizer::<AppSecret>(k8s_client, watch_namespace).await;
}

async fn strip_finalizer<K>(k8s_client: &kube::Client, watch_namespace: Option<&str>)
where
    K: Resource<Scope = kube::core::NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    let api: Api<K> = match watch_namespace {
        Some(ns) => Api::namespaced(k8s_client.clone(), ns),
        None => Api::all(k8s_client.clone()),
    };

    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "failed to list resources while removing finalizers");
            return;
        }
    };

    let mut stripped = 0;
    for obj in list.items {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let remaining: Vec<String> = obj.finalizers().iter().filter(|f| f.as_str() != FINALIZER_NAME).cloned().collect();
        if remaining.len() == obj.finalizers().len() {
            continue;
        }

        let ns_api: Api<K> = Api::namespaced(k8s_client.clone(), &namespace);
        let patch = serde_json::json!({ "metadata": { "finalizers": remaining } });
        match ns_api
            .patch(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => stripped += 1,
            Err(e) => warn!(namespace, name, error = %e, "failed to remove finalizer"),
        }
    }
    if stripped > 0 {
        info!(kind = std::any::type_name::<K>(), stripped, "removed finalizers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_model_parses_known_values() {
        assert_eq!(CleanupModel::parse(Some("revoke")), CleanupModel::Revoke);
        assert_eq!(CleanupModel::parse(Some("prune")), CleanupModel::Prune);
        assert_eq!(CleanupModel::parse(Some("all")), CleanupModel::All);
        assert_eq!(CleanupModel::parse(Some("bogus")), CleanupModel::None);
        assert_eq!(CleanupModel::parse(None), CleanupModel::None);
    }

    #[test]
    fn all_model_both_revokes_and_prunes() {
        assert!(CleanupModel::All.revokes());
        assert!(CleanupModel::All.prunes());
        assert!(CleanupModel::Revoke.revokes());
        assert!(!CleanupModel::Revoke.prunes());
        assert!(CleanupModel::Prune.prunes());
        assert!(!CleanupModel::Prune.revokes());
        assert!(!CleanupModel::None.revokes());
        assert!(!CleanupModel::None.prunes());
    }
}
