//! Thin wrapper over `kube::runtime::finalizer` so every managed secret
//! resource kind drives its delete-vs-apply branch through the same
//! compiled-in finalizer name and the same tracing.

use crate::constants::FINALIZER_NAME;
use futures::future::BoxFuture;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Error as FinalizerError, Event};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error};

/// Run `apply` on a live object and `cleanup` once it is marked for
/// deletion and every other finalizer has already run, adding/removing
/// [`FINALIZER_NAME`] as kube-runtime drives the state machine.
pub async fn run<K, E>(
    api: &Api<K>,
    obj: Arc<K>,
    apply: impl FnOnce(Arc<K>) -> BoxFuture<'static, Result<Action, E>> + Send,
    cleanup: impl FnOnce(Arc<K>) -> BoxFuture<'static, Result<Action, E>> + Send,
) -> Result<Action, FinalizerError<E>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    E: std::error::Error + 'static,
{
    let name = obj.name_any();
    kube::runtime::finalizer::finalizer(api, FINALIZER_NAME, obj, |event| async move {
        match event {
            Event::Apply(obj) => {
                debug!(name, "applying managed secret resource");
                apply(obj).await
            }
            Event::Cleanup(obj) => {
                debug!(name, "cleaning up managed secret resource");
                cleanup(obj).await
            }
        }
    })
    .await
    .inspect_err(|e| error!(error = %e, "finalizer-driven reconcile failed"))
}
