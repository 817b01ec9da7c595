mod status;

pub use status::{DATABASE_OPERATOR_NAME, TYPE_CONNECTED, TYPE_READY};

use crate::credentials;
use crate::crd::{Database, DatabaseType};
use crate::dsn;
use crate::error::{Error, Result};
use crate::health;
use status::Outcome;

use std::sync::Arc;

use dbhub_k8s_util::events::{Event, EventType};
use dbhub_operator::controller::DEFAULT_RECONCILE_INTERVAL;
use dbhub_operator::controller::context::Context;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{Span, debug, field, info, instrument, warn};

/// Database reconciler (spec §4.2). Validates connectivity, derives a DSN, opens a
/// short-lived health probe, and publishes phase/conditions. Every reconcile that
/// reaches the probe step returns success regardless of the probe's own outcome: a
/// `Failed` phase is a recorded, retried observation, not a controller error.
#[instrument(skip(ctx, database), fields(namespace, name))]
pub async fn reconcile_database(database: Arc<Database>, ctx: Arc<Context<Database>>) -> Result<Action> {
    let namespace = database.namespace().unwrap();
    let name = database.name_any();
    Span::current().record("namespace", field::display(&namespace));
    Span::current().record("name", field::display(&name));
    let _timer = ctx.metrics.reconcile_count_and_measure();

    info!(msg = "reconciling database");
    let generation = database.metadata.generation;

    let outcome = probe(&database, &ctx).await;
    let redacted_dsn = dsn::redacted(&database.spec).ok();

    let new_status = status::generate_status(database.status.as_ref(), generation, &outcome, redacted_dsn);

    publish_event(&database, &ctx, &outcome).await;

    status::patch_status(&ctx.client, &database, &new_status)
        .await
        .map_err(|e| {
            warn!(msg = "failed to patch Database status", %e);
            ctx.metrics.status_update_errors_inc();
            e
        })?;

    debug!(msg = "re-queueing in 5 minutes");
    Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
}

async fn probe(database: &Database, ctx: &Arc<Context<Database>>) -> Outcome {
    if database.spec.type_ == DatabaseType::Sqlite {
        let built = match dsn::build(&database.spec, None) {
            Ok(d) => d,
            Err(e) => return failure_from_error(e),
        };
        return match health::test_connection(DatabaseType::Sqlite, &built.full).await {
            Ok(()) => Outcome::Connected,
            Err(e) => failure_from_error(e),
        };
    }

    let credentials = match credentials::resolve(&ctx.client, database).await {
        Ok(c) => c,
        Err(e) => return failure_from_error(e),
    };

    let built = match dsn::build(&database.spec, Some(&credentials)) {
        Ok(d) => d,
        Err(e) => return failure_from_error(e),
    };

    match health::test_connection(database.spec.type_, &built.full).await {
        Ok(()) => Outcome::Connected,
        Err(e) => failure_from_error(e),
    }
}

fn failure_from_error(error: Error) -> Outcome {
    let reason = match &error {
        Error::SecretNotFound { .. } => "SecretNotFound",
        Error::SecretKeyMissing { .. } => "SecretKeyMissing",
        Error::UnsupportedType(_) => "UnsupportedType",
        Error::PingTimeout(_) => "PingTimeout",
        Error::PingRefused(_) => "PingRefused",
        Error::DriverOpenError(_) => "DriverOpenError",
        Error::KubeError(_, _) | Error::SerializationError(_, _) => "DriverOpenError",
    };
    Outcome::Failed {
        reason,
        message: error.to_string(),
    }
}

async fn publish_event(database: &Database, ctx: &Arc<Context<Database>>, outcome: &Outcome) {
    let (type_, reason, note) = match outcome {
        Outcome::Connected => (
            EventType::Normal,
            "Connected".to_string(),
            "database ping succeeded".to_string(),
        ),
        Outcome::Failed { reason, message } => {
            (EventType::Warning, reason.to_string(), message.clone())
        }
    };
    let result = ctx
        .recorder
        .publish(
            Event {
                type_,
                reason,
                note: Some(note),
                action: "Reconcile".to_string(),
                secondary: None,
            },
            &database.object_ref(&()),
        )
        .await;
    if let Err(e) = result {
        warn!(msg = "failed to publish database reconcile event", %e);
    }
}
