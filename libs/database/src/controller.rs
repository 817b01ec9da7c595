use crate::crd::Database;
use crate::reconcile::reconcile_database;

use std::sync::Arc;

use dbhub_operator::backoff_reconciler;
use dbhub_operator::controller::context::BackoffContext;
use dbhub_operator::controller::{ControllerId, State, check_api_queryable, error_policy};

use futures::StreamExt;
use kube::Client;
use kube::runtime::{Controller, watcher};
use tracing::info;

pub const CONTROLLER_ID: ControllerId = "database";

/// Run the database reconciler (spec §4.2, §4.4). The only watch is the primary one
/// on `Database` itself; re-checks are driven by the reconcile function's own 5-minute
/// `Action::requeue`, not by a secondary watch.
pub async fn run(state: State, client: Client) {
    let database = check_api_queryable::<Database>(client.clone()).await;
    let ctx = Arc::new(state.to_context::<Database>(client, CONTROLLER_ID));

    info!(msg = "starting database controller");
    ctx.metrics().ready_set(1);

    Controller::new(database, watcher::Config::default())
        .shutdown_on_signal()
        .run(backoff_reconciler!(reconcile_database), error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
