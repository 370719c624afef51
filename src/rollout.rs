//! # Rollout Coordinator
//!
//! After a successful sync that actually changed destination data, patch
//! every `rolloutRestartTargets` workload with a `restartedAt` annotation
//! under its pod template, the same mechanism `kubectl rollout restart`
//! uses, so pods pick up the refreshed Secret on their own schedule.

use crate::constants::ROLLOUT_ANNOTATION_GROUP;
use crate::crd::transformation::RolloutRestartTarget;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::{Api, Patch, PatchParams};
use tracing::{info, warn};

const APPS_V1: &str = "apps/v1";

#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("unsupported rollout restart target kind: {0}")]
    UnsupportedKind(String),
    #[error("unrecognized rollout restart target apiVersion {api_version:?} for kind {kind}")]
    UnrecognizedApiVersion { kind: String, api_version: String },
    #[error("rollout restart target {0} is a paused Deployment")]
    Paused(String),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

fn restart_patch(now_rfc3339: &str) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        format!("{ROLLOUT_ANNOTATION_GROUP}/restarted-at"): now_rfc3339
                    }
                }
            }
        }
    })
}

/// Patch every target in `targets`, logging (but not failing the reconcile
/// on) any single target that cannot be found or patched.
pub async fn restart_targets(
    k8s_client: &kube::Client,
    namespace: &str,
    targets: &[RolloutRestartTarget],
    now_rfc3339: &str,
) {
    for target in targets {
        if let Err(e) = restart_one(k8s_client, namespace, target, now_rfc3339).await {
            warn!(
                namespace,
                kind = %target.kind,
                name = %target.name,
                error = %e,
                "rollout restart failed for target"
            );
        } else {
            crate::observability::metrics::increment_rollout_restarts();
            info!(namespace, kind = %target.kind, name = %target.name, "restarted rollout target");
        }
    }
}

/// Validate `target.api_version` against the one CRD-based API group every
/// supported rollout kind (`Deployment`/`StatefulSet`/`DaemonSet`) actually
/// lives in. An explicit, unrecognized `apiVersion` is a configuration
/// error rather than something silently tolerated.
fn check_api_version(target: &RolloutRestartTarget) -> Result<(), RolloutError> {
    match target.api_version.as_deref() {
        None | Some(APPS_V1) => Ok(()),
        Some(other) => Err(RolloutError::UnrecognizedApiVersion {
            kind: target.kind.clone(),
            api_version: other.to_string(),
        }),
    }
}

async fn restart_one(
    k8s_client: &kube::Client,
    namespace: &str,
    target: &RolloutRestartTarget,
    now_rfc3339: &str,
) -> Result<(), RolloutError> {
    check_api_version(target)?;
    let patch = Patch::Merge(restart_patch(now_rfc3339));
    let pp = PatchParams::default();

    match target.kind.as_str() {
        "Deployment" => {
            let api: Api<Deployment> = Api::namespaced(k8s_client.clone(), namespace);
            let current = api.get(&target.name).await?;
            if current.spec.as_ref().and_then(|s| s.paused).unwrap_or(false) {
                return Err(RolloutError::Paused(target.name.clone()));
            }
            api.patch(&target.name, &pp, &patch).await?;
        }
        "StatefulSet" => {
            let api: Api<StatefulSet> = Api::namespaced(k8s_client.clone(), namespace);
            api.patch(&target.name, &pp, &patch).await?;
        }
        "DaemonSet" => {
            let api: Api<DaemonSet> = Api::namespaced(k8s_client.clone(), namespace);
            api.patch(&target.name, &pp, &patch).await?;
        }
        other => return Err(RolloutError::UnsupportedKind(other.to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_patch_sets_the_annotation_under_pod_template() {
        let patch = restart_patch("2026-01-01T00:00:00Z");
        let annotation_key = format!("{ROLLOUT_ANNOTATION_GROUP}/restarted-at");
        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][annotation_key],
            "2026-01-01T00:00:00Z"
        );
    }
}
