//! # Destination Syncer
//!
//! The only component permitted to mutate destination Secrets. Owns the
//! create/overwrite/prune-orphans decision and the label/owner-reference
//! contract that marks a Secret as operator-managed.

use crate::constants::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_OWNER_KIND, LABEL_OWNER_UID};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("destination secret {0} already exists and is not owned by this resource")]
    NotOwned(String),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

/// Identity of the managed secret resource that owns a destination Secret.
#[derive(Debug, Clone)]
pub struct Owner {
    pub uid: String,
    pub kind: String,
    pub name: String,
    pub api_version: String,
    pub controller: bool,
}

/// What to write and how, resolved from a `Destination` block plus a
/// transformed data map.
pub struct SyncRequest<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub secret_type: &'a str,
    pub data: BTreeMap<String, Vec<u8>>,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
    pub create: bool,
    pub overwrite: bool,
    pub owner: Owner,
}

fn owns(secret: &Secret, owner: &Owner) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_OWNER_UID))
        .is_some_and(|uid| uid == &owner.uid)
}

/// Write `req` to the cluster, honoring the create/overwrite/ownership
/// contract:
///
/// - Secret does not exist, `create=true` -> created, owned by `owner`.
/// - Secret does not exist, `create=false` -> no-op (a destination that
///   expects an externally managed Secret).
/// - Secret exists, owned by `owner`, `overwrite=true` -> patched.
/// - Secret exists, owned by `owner`, `overwrite=false` -> no-op (a
///   one-time seed destination).
/// - Secret exists, owned by someone else, or unowned -> [`SyncError::NotOwned`].
pub async fn sync(api: &Api<Secret>, req: SyncRequest<'_>) -> Result<bool, SyncError> {
    let existing = match api.get_opt(req.name).await? {
        Some(s) => Some(s),
        None => None,
    };

    match existing {
        None => {
            if !req.create {
                return Ok(false);
            }
            let secret = build_secret(&req);
            api.create(&kube::api::PostParams::default(), &secret).await?;
            info!(namespace = req.namespace, name = req.name, "created destination secret");
            Ok(true)
        }
        Some(existing) => {
            if !owns(&existing, &req.owner) {
                return Err(SyncError::NotOwned(req.name.to_string()));
            }
            if !req.overwrite {
                return Ok(false);
            }
            let secret = build_secret(&req);
            api.patch(
                req.name,
                &PatchParams::apply("vault-secrets-operator").force(),
                &Patch::Apply(&secret),
            )
            .await?;
            Ok(true)
        }
    }
}

fn build_secret(req: &SyncRequest<'_>) -> Secret {
    let mut labels = req.labels.clone();
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_OWNER_UID.to_string(), req.owner.uid.clone());
    labels.insert(LABEL_OWNER_KIND.to_string(), req.owner.kind.clone());

    let data = req
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(req.name.to_string()),
            namespace: Some(req.namespace.to_string()),
            labels: Some(labels),
            annotations: Some(req.annotations.clone()),
            owner_references: Some(vec![OwnerReference {
                api_version: req.owner.api_version.clone(),
                kind: req.owner.kind.clone(),
                name: req.owner.name.clone(),
                uid: req.owner.uid.clone(),
                controller: Some(req.owner.controller),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        type_: Some(req.secret_type.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// List every Secret this operator manages for `owner_uid` in `namespace`
/// and delete any whose name is not in `keep`. Used to prune orphans left
/// behind when a `Destination.name` changes across reconciles.
pub async fn prune_orphans(
    api: &Api<Secret>,
    owner_uid: &str,
    keep: &str,
) -> Result<usize, SyncError> {
    let list = api
        .list(&kube::api::ListParams::default().labels(&format!("{LABEL_OWNER_UID}={owner_uid}")))
        .await?;

    let mut pruned = 0;
    for secret in list.items {
        let Some(name) = secret.metadata.name.clone() else {
            continue;
        };
        if name == keep {
            continue;
        }
        match api.delete(&name, &kube::api::DeleteParams::default()).await {
            Ok(_) => pruned += 1,
            Err(e) => warn!(name, error = %e, "failed to prune orphaned destination secret"),
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            uid: "uid-1".to_string(),
            kind: "StaticSecret".to_string(),
            name: "my-static".to_string(),
            api_version: "secrets.vso.io/v1alpha1".to_string(),
            controller: true,
        }
    }

    #[test]
    fn owns_matches_only_on_owner_uid_label() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_OWNER_UID.to_string(), "uid-1".to_string());
        let secret = Secret {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(owns(&secret, &owner()));

        let unowned = Secret::default();
        assert!(!owns(&unowned, &owner()));
    }

    #[test]
    fn build_secret_stamps_management_labels_and_owner_reference() {
        let req = SyncRequest {
            namespace: "ns",
            name: "dest",
            secret_type: "Opaque",
            data: BTreeMap::new(),
            labels: &BTreeMap::new(),
            annotations: &BTreeMap::new(),
            create: true,
            overwrite: true,
            owner: owner(),
        };
        let secret = build_secret(&req);
        let labels = secret.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_MANAGED_BY).unwrap(), LABEL_MANAGED_BY_VALUE);
        assert_eq!(labels.get(LABEL_OWNER_UID).unwrap(), "uid-1");
        assert_eq!(secret.metadata.owner_references.unwrap().len(), 1);
    }
}
