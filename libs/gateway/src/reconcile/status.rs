use crate::crd::{DBHubInstance, DBHubInstanceStatus, GatewayPhase};
use crate::error::{Error, Result};

use chrono::Utc;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, trace};

pub const TYPE_AVAILABLE: &str = "Available";

const CONDITION_TRUE: &str = "True";
const CONDITION_FALSE: &str = "False";

pub const GATEWAY_OPERATOR_NAME: &str = "dbhubinstances.dbhub.tas.io";

/// Derive `phase` from the child Deployment's observed availability (spec §4.3 step
/// 10, §9): this is recomputed from scratch every reconcile, never persisted-and-diffed.
fn phase_from_deployment(deployment_status: Option<&DeploymentStatus>) -> GatewayPhase {
    let available = deployment_status.and_then(|s| s.available_replicas).unwrap_or(0);
    let unavailable = deployment_status.and_then(|s| s.unavailable_replicas).unwrap_or(0);

    if available > 0 {
        GatewayPhase::Running
    } else if unavailable > 0 {
        GatewayPhase::Degraded
    } else {
        GatewayPhase::Pending
    }
}

/// Build the next `status` for a reconcile that ran every step successfully.
pub fn generate_status(
    previous: Option<&DBHubInstanceStatus>,
    generation: Option<i64>,
    connected_databases: Vec<String>,
    config_hash: String,
    endpoint: String,
    deployment_status: Option<&DeploymentStatus>,
) -> DBHubInstanceStatus {
    let now = Time(Utc::now());
    let phase = phase_from_deployment(deployment_status);
    let available_replicas = deployment_status.and_then(|s| s.available_replicas);

    let previous_conditions = previous.and_then(|s| s.conditions.clone()).unwrap_or_default();
    let (status, reason, message) = match phase {
        GatewayPhase::Running => (CONDITION_TRUE, "DeploymentAvailable", "gateway deployment has available replicas".to_string()),
        GatewayPhase::Degraded => (CONDITION_FALSE, "DeploymentUnavailable", "gateway deployment has no available replicas".to_string()),
        GatewayPhase::Pending => (CONDITION_FALSE, "DeploymentPending", "gateway deployment is not yet available".to_string()),
        GatewayPhase::Failed => unreachable!("phase_from_deployment never returns Failed"),
    };
    let condition = build_condition(&previous_conditions, status, reason, message, generation, &now);

    DBHubInstanceStatus {
        phase: Some(phase),
        available_replicas,
        connected_databases: Some(connected_databases),
        endpoint: Some(endpoint),
        config_hash: Some(config_hash),
        last_config_update: Some(now),
        observed_generation: generation,
        conditions: Some(vec![condition]),
    }
}

/// Build the status for a reconcile that failed before it could render or apply child
/// resources. Previously observed `connectedDatabases`/`configHash`/`endpoint` are
/// preserved so operators retain the last known-good view.
pub fn generate_failed_status(
    previous: Option<&DBHubInstanceStatus>,
    generation: Option<i64>,
    message: String,
) -> DBHubInstanceStatus {
    let now = Time(Utc::now());
    let previous_conditions = previous.and_then(|s| s.conditions.clone()).unwrap_or_default();
    let condition = build_condition(&previous_conditions, CONDITION_FALSE, "ReconcileFailed", message.clone(), generation, &now);

    DBHubInstanceStatus {
        phase: Some(GatewayPhase::Failed),
        available_replicas: previous.and_then(|s| s.available_replicas),
        connected_databases: previous.and_then(|s| s.connected_databases.clone()),
        endpoint: previous.and_then(|s| s.endpoint.clone()),
        config_hash: previous.and_then(|s| s.config_hash.clone()),
        last_config_update: previous.and_then(|s| s.last_config_update.clone()),
        observed_generation: generation,
        conditions: Some(vec![condition]),
    }
}

fn build_condition(
    previous: &[Condition],
    status: &str,
    reason: &str,
    message: String,
    generation: Option<i64>,
    now: &Time,
) -> Condition {
    let last_transition_time = previous
        .iter()
        .find(|c| c.type_ == TYPE_AVAILABLE && c.status == status)
        .map(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.clone());

    Condition {
        type_: TYPE_AVAILABLE.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message,
        last_transition_time,
        observed_generation: generation,
    }
}

/// Persist `status` to the `DBHubInstance`'s status subresource via server-side apply.
pub async fn patch_status(client: &Client, instance: &DBHubInstance, status: &DBHubInstanceStatus) -> Result<()> {
    let name = instance.name_any();
    // safe unwrap: DBHubInstance is namespace scoped
    let namespace = instance.namespace().unwrap();
    let patch = Patch::Apply(json!({
        "apiVersion": "dbhub.tas.io/v1alpha1",
        "kind": "DBHubInstance",
        "status": status,
    }));
    debug!(msg = "updating DBHubInstance status", %namespace, %name, phase = ?status.phase);
    trace!(msg = "new status patch", ?patch);
    let api: Api<DBHubInstance> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(&name, &PatchParams::apply(GATEWAY_OPERATOR_NAME).force(), &patch)
        .await
        .map_err(|e| {
            Error::KubeError(
                format!("failed to patch DBHubInstance/status {namespace}/{name}"),
                Box::new(e),
            )
        })?;
    Ok(())
}
