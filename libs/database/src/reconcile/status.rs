use crate::crd::{Database, DatabasePhase, DatabaseStatus};
use crate::error::{Error, Result};

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, trace};

pub const TYPE_READY: &str = "Ready";
pub const TYPE_CONNECTED: &str = "Connected";

const CONDITION_TRUE: &str = "True";
const CONDITION_FALSE: &str = "False";

pub const DATABASE_OPERATOR_NAME: &str = "databases.dbhub.tas.io";

/// Outcome of a single health-check attempt, used to derive phase + conditions.
pub enum Outcome {
    Connected,
    Failed { reason: &'static str, message: String },
}

/// Build the next `status` for `database` given this reconcile's `outcome` and the
/// credential-stripped DSN to publish for display.
pub fn generate_status(
    previous: Option<&DatabaseStatus>,
    generation: Option<i64>,
    outcome: &Outcome,
    redacted_dsn: Option<String>,
) -> DatabaseStatus {
    let now = Time(Utc::now());
    let previous_conditions = previous
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();

    let (phase, message, connected_status, connected_reason, connected_message) = match outcome {
        Outcome::Connected => (
            DatabasePhase::Connected,
            "successfully connected".to_string(),
            CONDITION_TRUE,
            "PingSucceeded",
            "liveness probe succeeded".to_string(),
        ),
        Outcome::Failed { reason, message } => (
            DatabasePhase::Failed,
            message.clone(),
            CONDITION_FALSE,
            *reason,
            message.clone(),
        ),
    };

    let ready_status = match phase {
        DatabasePhase::Connected => CONDITION_TRUE,
        _ => CONDITION_FALSE,
    };

    let conditions = vec![
        build_condition(
            &previous_conditions,
            TYPE_READY,
            ready_status,
            connected_reason,
            message.clone(),
            generation,
            &now,
        ),
        build_condition(
            &previous_conditions,
            TYPE_CONNECTED,
            connected_status,
            connected_reason,
            connected_message,
            generation,
            &now,
        ),
    ];

    DatabaseStatus {
        phase: Some(phase),
        last_checked: Some(now),
        message: Some(message),
        dsn: redacted_dsn,
        observed_generation: generation,
        conditions: Some(conditions),
    }
}

fn build_condition(
    previous: &[Condition],
    type_: &str,
    status: &str,
    reason: &str,
    message: String,
    generation: Option<i64>,
    now: &Time,
) -> Condition {
    let last_transition_time = previous
        .iter()
        .find(|c| c.type_ == type_ && c.status == status)
        .map(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.clone());

    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message,
        last_transition_time,
        observed_generation: generation,
    }
}

/// Persist `status` to the `Database`'s status subresource via server-side apply.
pub async fn patch_status(client: &Client, database: &Database, status: &DatabaseStatus) -> Result<()> {
    let name = database.name_any();
    // safe unwrap: Database is namespace scoped
    let namespace = database.namespace().unwrap();
    let patch = Patch::Apply(json!({
        "apiVersion": "dbhub.tas.io/v1alpha1",
        "kind": "Database",
        "status": status,
    }));
    debug!(msg = "updating Database status", %namespace, %name, phase = ?status.phase);
    trace!(msg = "new status patch", ?patch);
    let api: Api<Database> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(&name, &PatchParams::apply(DATABASE_OPERATOR_NAME).force(), &patch)
        .await
        .map_err(|e| {
            Error::KubeError(
                format!("failed to patch Database/status {namespace}/{name}"),
                Box::new(e),
            )
        })?;
    Ok(())
}
