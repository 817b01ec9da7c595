mod status;

pub use status::GATEWAY_OPERATOR_NAME;

use crate::crd::DBHubInstance;
use crate::error::{Error, Result};
use crate::render;
use crate::resources::{configmap, deployment, secret, service};
use crate::selector;

use std::sync::Arc;

use dbhub_k8s_util::events::{Event, EventType};
use dbhub_operator::controller::DEFAULT_RECONCILE_INTERVAL;
use dbhub_operator::controller::context::{Context, KubeOperations};

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{Span, debug, field, info, instrument, warn};

/// Gateway reconciler (spec §4.3). Resolves matching `Database` resources, renders the
/// gateway's TOML config and credentials, and drives the four owned child resources in
/// the order the spec lays out: connected-list status first (so it's visible even if a
/// later step fails), then ConfigMap, Secret, Deployment, Service, then final status.
#[instrument(skip(ctx, instance), fields(namespace, name))]
pub async fn reconcile_gateway(instance: Arc<DBHubInstance>, ctx: Arc<Context<DBHubInstance>>) -> Result<Action> {
    let namespace = instance.namespace().unwrap();
    let name = instance.name_any();
    Span::current().record("namespace", field::display(&namespace));
    Span::current().record("name", field::display(&name));
    let _timer = ctx.metrics.reconcile_count_and_measure();

    info!(msg = "reconciling gateway");
    let generation = instance.metadata.generation;

    match run(&instance, &ctx, generation).await {
        Ok(()) => {
            debug!(msg = "gateway reconciled");
            Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
        }
        Err(error) => {
            warn!(msg = "gateway reconcile failed", %error);
            let failed_status = status::generate_failed_status(instance.status.as_ref(), generation, error.to_string());
            if let Err(e) = status::patch_status(&ctx.client, &instance, &failed_status).await {
                warn!(msg = "failed to patch DBHubInstance status after a failed reconcile", %e);
                ctx.metrics.status_update_errors_inc();
            }
            publish_event(&instance, &ctx, EventType::Warning, "ReconcileFailed", error.to_string()).await;
            Err(error)
        }
    }
}

async fn run(instance: &DBHubInstance, ctx: &Arc<Context<DBHubInstance>>, generation: Option<i64>) -> Result<()> {
    let databases = selector::resolve(&ctx.client, instance).await?;
    let connected = selector::names(&databases);

    patch_connected_databases(&ctx.client, instance, &connected).await?;

    let rendered = render::render(&ctx.client, instance, &databases).await?;

    let cm = configmap::build(instance, &rendered.toml);
    instance
        .kube_patch(ctx.client.clone(), &ctx.metrics, cm, GATEWAY_OPERATOR_NAME)
        .await?;

    let creds_secret = secret::build(instance, &rendered.credentials);
    instance
        .kube_patch(ctx.client.clone(), &ctx.metrics, creds_secret, GATEWAY_OPERATOR_NAME)
        .await?;

    let desired_deployment = deployment::build(instance, &rendered.hash);
    let applied_deployment = instance
        .kube_patch(ctx.client.clone(), &ctx.metrics, desired_deployment, GATEWAY_OPERATOR_NAME)
        .await?;

    let desired_service = service::build(instance);
    instance
        .kube_patch(ctx.client.clone(), &ctx.metrics, desired_service, GATEWAY_OPERATOR_NAME)
        .await?;

    let endpoint = service::endpoint(instance);
    let new_status = status::generate_status(
        instance.status.as_ref(),
        generation,
        connected,
        rendered.hash,
        endpoint,
        applied_deployment.status.as_ref(),
    );
    status::patch_status(&ctx.client, instance, &new_status).await?;
    publish_event(instance, ctx, EventType::Normal, "Reconciled", "gateway reconciled".to_string()).await;

    Ok(())
}

/// Write `status.connectedDatabases` alone (spec §4.3 step 3), so operators can see
/// what was selected even if config rendering or a later child-resource apply fails.
async fn patch_connected_databases(
    client: &kube::Client,
    instance: &DBHubInstance,
    connected: &[String],
) -> Result<()> {
    use kube::api::{Api, Patch, PatchParams};

    let name = instance.name_any();
    // safe unwrap: DBHubInstance is namespace scoped
    let namespace = instance.namespace().unwrap();
    let patch = Patch::Apply(json!({
        "apiVersion": "dbhub.tas.io/v1alpha1",
        "kind": "DBHubInstance",
        "status": { "connectedDatabases": connected },
    }));
    let api: Api<DBHubInstance> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(&name, &PatchParams::apply(GATEWAY_OPERATOR_NAME).force(), &patch)
        .await
        .map_err(|e| {
            Error::KubeError(
                format!("failed to patch DBHubInstance/status (connectedDatabases) {namespace}/{name}"),
                Box::new(e),
            )
        })?;
    Ok(())
}

async fn publish_event(
    instance: &DBHubInstance,
    ctx: &Arc<Context<DBHubInstance>>,
    type_: EventType,
    reason: &str,
    note: String,
) {
    let result = ctx
        .recorder
        .publish(
            Event {
                type_,
                reason: reason.to_string(),
                note: Some(note),
                action: "Reconcile".to_string(),
                secondary: None,
            },
            &instance.object_ref(&()),
        )
        .await;
    if let Err(e) = result {
        warn!(msg = "failed to publish gateway reconcile event", %e);
    }
}
