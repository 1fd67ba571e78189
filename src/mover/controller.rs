// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes controller wiring for the holder reconciler.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use super::holder::is_holder_pod_on_node;
use super::reconciler::HolderReconciler;
use super::MoverError;
use crate::constants::{HOLDER_NOT_READY_REQUEUE, MOVER_CONTROLLER_NAME};
use crate::labels::{app_selector, HOLDER_APP_LABEL_VALUE};
use crate::net::{NetExecutor, NetNsProvider};
use crate::rate_limiter::ItemExponentialFailureRateLimiter;

/// Controller context.
pub struct MoverContext<P, E> {
    pub reconciler: HolderReconciler<P, E>,
    pub rate_limiter: ItemExponentialFailureRateLimiter,
    pub node_name: String,
}

/// Turn a reconcile outcome into a controller action.
///
/// Not-ready holders are requeued at a fixed short delay and are not counted as failures.
///
/// # Errors
///
/// Any failure other than not-ready is returned for [`error_policy`] to back off.
pub fn reconcile_result<P, E>(
    result: Result<(), MoverError>,
    name: &str,
    ctx: &MoverContext<P, E>,
) -> Result<Action, MoverError> {
    match result {
        Ok(()) => {
            ctx.rate_limiter.forget(name);
            Ok(Action::await_change())
        }
        Err(e @ MoverError::NotReady { .. }) => {
            info!(pod = %name, reason = %e, "holder pod is not ready; requeueing");
            Ok(Action::requeue(HOLDER_NOT_READY_REQUEUE))
        }
        Err(e) => {
            error!(pod = %name, error = %e, "reconcile failed for holder pod");
            Err(e)
        }
    }
}

/// Reconcile one holder pod.
///
/// # Errors
///
/// See [`reconcile_result`].
pub async fn reconcile_holder_pod<P: NetNsProvider, E: NetExecutor>(
    pod: Arc<Pod>,
    ctx: Arc<MoverContext<P, E>>,
) -> Result<Action, MoverError> {
    let name = pod.name_any();
    let result = ctx.reconciler.reconcile(&name, Some(&pod)).await;
    reconcile_result(result, &name, &ctx)
}

/// Exponential per-pod backoff for failed reconciles.
pub fn error_policy<P, E>(pod: Arc<Pod>, err: &MoverError, ctx: Arc<MoverContext<P, E>>) -> Action {
    let name = pod.name_any();
    let delay = ctx.rate_limiter.when(&name);
    debug!(pod = %name, error = %err, delay_ms = delay.as_millis(), "backing off holder pod reconcile");
    Action::requeue(delay)
}

/// Remove the clone of a holder pod that no longer exists.
///
/// Failures are retried with the pod's exponential backoff until cleanup succeeds, a pod
/// with the same name shows up in `store` again (the controller owns it from then on), or
/// the mover is stopping.
pub async fn clean_up_deleted_holder<P: NetNsProvider, E: NetExecutor>(
    pod: ObjectRef<Pod>,
    store: Store<Pod>,
    ctx: Arc<MoverContext<P, E>>,
) {
    let token = ctx.reconciler.token().clone();
    loop {
        let result = ctx.reconciler.reconcile(&pod.name, None).await;
        let Err(e) = reconcile_result(result, &pod.name, &ctx) else {
            return;
        };

        let delay = ctx.rate_limiter.when(&pod.name);
        warn!(
            pod = %pod.name,
            error = %e,
            delay_ms = delay.as_millis(),
            "failed to clean up after deleted holder pod; retrying"
        );
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        if store.get(&pod).is_some() {
            debug!(pod = %pod.name, "holder pod was recreated; leaving cleanup to the controller");
            ctx.rate_limiter.forget(&pod.name);
            return;
        }
    }
}

/// Watch holder pods on this node and reconcile them until the mover's token is canceled.
///
/// A watched pod that disappears from the cache before it is reconciled shows up as
/// `ObjectNotFound`; its clone is cleaned up by [`clean_up_deleted_holder`].
///
/// # Errors
///
/// Currently always `Ok`; watch errors are logged and retried by the watcher's backoff.
pub async fn run_controller<P: NetNsProvider, E: NetExecutor>(
    client: Client,
    namespace: &str,
    ctx: Arc<MoverContext<P, E>>,
) -> Result<(), MoverError> {
    info!(controller = MOVER_CONTROLLER_NAME, namespace, node = %ctx.node_name, "starting holder pod controller");

    let api = Api::<Pod>::namespaced(client, namespace);
    let watcher_config = watcher::Config::default()
        .labels(&app_selector(HOLDER_APP_LABEL_VALUE))
        .fields(&format!("spec.nodeName={}", ctx.node_name));

    let (reader, writer) = reflector::store();
    let node_name = ctx.node_name.clone();
    let holder_pods = reflector(writer, watcher(api, watcher_config).default_backoff())
        .touched_objects()
        .try_filter(move |pod| futures::future::ready(is_holder_pod_on_node(pod, &node_name)));

    let shutdown = ctx.reconciler.token().clone().cancelled_owned();
    let cleanup_ctx = ctx.clone();

    let store = reader.clone();
    Controller::for_stream(holder_pods, reader)
        .with_config(controller::Config::default().concurrency(1))
        .graceful_shutdown_on(shutdown)
        .run(reconcile_holder_pod, error_policy, ctx)
        .for_each(|res| {
            let ctx = cleanup_ctx.clone();
            let store = store.clone();
            async move {
                match res {
                    Ok((obj, _)) => debug!(pod = %obj.name, "reconciled holder pod"),
                    Err(controller::Error::ObjectNotFound(obj)) => {
                        let mut pod = ObjectRef::<Pod>::new(&obj.name);
                        if let Some(ns) = &obj.namespace {
                            pod = pod.within(ns);
                        }
                        tokio::spawn(clean_up_deleted_holder(pod, store, ctx));
                    }
                    Err(e) => warn!(error = %e, "holder pod controller error"),
                }
            }
        })
        .await;

    info!(controller = MOVER_CONTROLLER_NAME, "holder pod controller stopped");
    Ok(())
}
