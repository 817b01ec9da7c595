use crate::crd::DBHubInstance;
use crate::reconcile::reconcile_gateway;

use dbhub_database::crd::Database;
use dbhub_k8s_util::types::short_type_name;
use dbhub_operator::backoff_reconciler;
use dbhub_operator::controller::context::BackoffContext;
use dbhub_operator::controller::{ControllerId, State, check_api_queryable, create_subscriber, error_policy};

use std::fmt::Debug;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::Lookup;
use kube::runtime::{Controller, WatchStreamExt, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{error, info, trace};

pub const CONTROLLER_ID: ControllerId = "dbhubinstance";

const SUBSCRIBE_BUFFER_SIZE: usize = 256;
const RELOAD_BUFFER_SIZE: usize = 16;

/// Feed a shared reflector `writer` from a watch on `K`, nudging `reload_tx` on every
/// event. `owns_shared_stream` correlates owned kinds by owner reference and can miss
/// delete events (kube-rs#1590); `reload_tx` also doubles as the `Database` cross-kind
/// trigger, since a `DBHubInstance`'s selector can match databases it does not own.
fn create_watch<K>(api: Api<K>, writer: Writer<K>, reload_tx: mpsc::Sender<()>) -> BoxFuture<'static, ()>
where
    K: Resource + Lookup + Clone + DeserializeOwned + Send + Sync + Debug + 'static,
    <K as Lookup>::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
{
    let resource_name = short_type_name::<K>().unwrap_or("Unknown");
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect_shared(writer)
        .for_each(move |res| {
            let mut reload_tx_clone = reload_tx.clone();
            async move {
                match res {
                    Ok(event) => {
                        trace!(msg = format!("watched {resource_name} event"), ?event);
                        let _ignore_errors = reload_tx_clone
                            .try_send(())
                            .map_err(|e| error!(msg = "failed to trigger gateway rescan", %e));
                    }
                    Err(e) => {
                        error!(msg = format!("unexpected error watching {resource_name}"), %e);
                    }
                }
            }
        })
        .boxed()
}

/// Run the gateway reconciler (spec §4.3, §4.4). Owns ConfigMap/Secret/Deployment/
/// Service by owner reference and rescans every `DBHubInstance` whenever any of those,
/// or any `Database`, changes.
pub async fn run(state: State, client: Client) {
    let instance_api = check_api_queryable::<DBHubInstance>(client.clone()).await;
    let configmap_api = check_api_queryable::<ConfigMap>(client.clone()).await;
    let secret_api = check_api_queryable::<Secret>(client.clone()).await;
    let deployment_api = check_api_queryable::<Deployment>(client.clone()).await;
    let service_api = check_api_queryable::<Service>(client.clone()).await;
    let database_api = check_api_queryable::<Database>(client.clone()).await;

    let configmap_r = create_subscriber::<ConfigMap>(SUBSCRIBE_BUFFER_SIZE);
    let secret_r = create_subscriber::<Secret>(SUBSCRIBE_BUFFER_SIZE);
    let deployment_r = create_subscriber::<Deployment>(SUBSCRIBE_BUFFER_SIZE);
    let service_r = create_subscriber::<Service>(SUBSCRIBE_BUFFER_SIZE);
    let database_r = create_subscriber::<Database>(SUBSCRIBE_BUFFER_SIZE);

    let (reload_tx, reload_rx) = mpsc::channel(RELOAD_BUFFER_SIZE);

    let configmap_watch = create_watch(configmap_api, configmap_r.writer, reload_tx.clone());
    let secret_watch = create_watch(secret_api, secret_r.writer, reload_tx.clone());
    let deployment_watch = create_watch(deployment_api, deployment_r.writer, reload_tx.clone());
    let service_watch = create_watch(service_api, service_r.writer, reload_tx.clone());
    let database_watch = create_watch(database_api, database_r.writer, reload_tx.clone());

    let ctx = Arc::new(state.to_context::<DBHubInstance>(client, CONTROLLER_ID));

    info!(msg = "starting gateway controller");
    let gateway_controller = Controller::new(instance_api, watcher::Config::default())
        .owns_shared_stream(configmap_r.subscriber)
        .owns_shared_stream(secret_r.subscriber)
        .owns_shared_stream(deployment_r.subscriber)
        .owns_shared_stream(service_r.subscriber)
        .reconcile_all_on(reload_rx.map(|_| ()))
        .shutdown_on_signal()
        .run(backoff_reconciler!(reconcile_gateway), error_policy, ctx.clone())
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics().ready_set(1);
    tokio::select! {
        _ = gateway_controller => {},
        _ = configmap_watch => {},
        _ = secret_watch => {},
        _ = deployment_watch => {},
        _ = service_watch => {},
        _ = database_watch => {},
    }
}
