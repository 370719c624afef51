//! # Leader Election
//!
//! Exactly one operator replica holds the `vso-leader` `coordination.k8s.io`
//! Lease at a time; every other replica blocks in [`acquire`] until it wins
//! the lease or observes a holder whose lease has expired. Implements the
//! same bare Lease protocol `client-go`'s `leaderelection` package uses,
//! without pulling in a separate crate for it.

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use std::time::Duration;
use tracing::{info, warn};

const LEASE_NAME: &str = "vso-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum LeaderError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lease is no longer held by this replica")]
    Lost,
}

/// Block until `identity` holds the leader lease, then return. Spawn
/// [`renew_forever`] right after to keep holding it.
pub async fn acquire(client: &kube::Client, namespace: &str, identity: &str) {
    let api: Api<Lease> = Api::namespaced(client.clone(), namespace);
    loop {
        match try_claim(&api, identity).await {
            Ok(true) => {
                info!(identity, "acquired leader lease");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "leader lease claim attempt failed"),
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Periodically renew the lease this replica holds. Exits the process if
/// renewal ever fails: a split-brain write (two replicas both believing
/// they're the leader) is worse than a restart.
pub async fn renew_forever(client: kube::Client, namespace: String, identity: String) {
    let api: Api<Lease> = Api::namespaced(client, &namespace);
    let mut ticker = tokio::time::interval(Duration::from_secs((LEASE_DURATION_SECS / 3).max(1) as u64));
    loop {
        ticker.tick().await;
        if let Err(e) = renew(&api, &identity).await {
            tracing::error!(error = %e, "failed to renew leader lease, exiting");
            std::process::exit(1);
        }
    }
}

async fn try_claim(api: &Api<Lease>, identity: &str) -> Result<bool, LeaderError> {
    match api.get_opt(LEASE_NAME).await? {
        None => {
            let lease = build_lease(identity, 1);
            match api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        Some(existing) => {
            let spec = existing.spec.unwrap_or_default();
            if spec.holder_identity.as_deref() == Some(identity) {
                return Ok(true);
            }
            if !lease_expired(&spec) {
                return Ok(false);
            }
            let transitions = spec.lease_transitions.unwrap_or(0) + 1;
            let lease = build_lease(identity, transitions);
            api.patch(
                LEASE_NAME,
                &PatchParams::apply("vault-secrets-operator").force(),
                &Patch::Apply(&lease),
            )
            .await?;
            Ok(true)
        }
    }
}

async fn renew(api: &Api<Lease>, identity: &str) -> Result<(), LeaderError> {
    let existing = api.get(LEASE_NAME).await?;
    let spec = existing.spec.unwrap_or_default();
    if spec.holder_identity.as_deref() != Some(identity) {
        return Err(LeaderError::Lost);
    }
    let transitions = spec.lease_transitions.unwrap_or(0);
    let lease = build_lease(identity, transitions);
    api.patch(
        LEASE_NAME,
        &PatchParams::apply("vault-secrets-operator").force(),
        &Patch::Apply(&lease),
    )
    .await?;
    Ok(())
}

fn lease_expired(spec: &LeaseSpec) -> bool {
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };
    let duration = spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECS);
    let elapsed = chrono::Utc::now().signed_duration_since(renew_time.0);
    elapsed.num_seconds() > i64::from(duration)
}

fn build_lease(identity: &str, transitions: i32) -> Lease {
    let now = MicroTime(chrono::Utc::now());
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            renew_time: Some(now.clone()),
            acquire_time: Some(now),
            lease_transitions: Some(transitions),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_renew_time_counts_as_expired() {
        let spec = LeaseSpec::default();
        assert!(lease_expired(&spec));
    }

    #[test]
    fn fresh_renew_time_is_not_expired() {
        let spec = LeaseSpec {
            renew_time: Some(MicroTime(chrono::Utc::now())),
            lease_duration_seconds: Some(15),
            ..Default::default()
        };
        assert!(!lease_expired(&spec));
    }
}
