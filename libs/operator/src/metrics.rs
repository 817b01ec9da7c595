use crate::controller::ControllerId;

use std::collections::HashMap;
use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(mut registry: Registry, controller_names: &[&'static str]) -> Self {
        let controllers = controller_names
            .iter()
            .map(|&id| (id, Arc::new(ControllerMetrics::new(id, &mut registry))))
            .collect::<HashMap<ControllerId, Arc<ControllerMetrics>>>();

        Self {
            registry: Arc::new(registry),
            controllers,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ControllerLabel {
    controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TriggeredLabel {
    controller: String,
    action: String,
    triggered_by: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReplicasLabel {
    controller: String,
    namespace: String,
    name: String,
}

#[derive(Clone)]
pub struct ControllerMetrics {
    label: ControllerLabel,
    pub reconcile: ReconcileMetrics,
    spec_replicas: Family<ReplicasLabel, Gauge>,
    status_update_errors: Family<ControllerLabel, Counter>,
    triggered: Family<TriggeredLabel, Counter>,
    watch_operations_failed: Family<ControllerLabel, Counter>,
    ready: Family<ControllerLabel, Gauge>,
}

impl ControllerMetrics {
    pub fn new(controller: &str, registry: &mut Registry) -> Self {
        let reconcile = ReconcileMetrics::new(registry);

        let spec_replicas = Family::<ReplicasLabel, Gauge>::default();
        registry.register(
            "spec_replicas",
            "Number of expected replicas for the object",
            spec_replicas.clone(),
        );

        let status_update_errors = Family::<ControllerLabel, Counter>::default();
        registry.register(
            "status_update_errors",
            "Number of errors that occurred during update operations to status subresources",
            status_update_errors.clone(),
        );

        let triggered = Family::<TriggeredLabel, Counter>::default();
        registry.register(
            "triggered",
            "Number of times a Kubernetes object applied or delete event triggered a reconcile of an object",
            triggered.clone(),
        );

        let watch_operations_failed = Family::<ControllerLabel, Counter>::default();
        registry.register(
            "watch_operations_failed",
            "Total number of watch operations that failed",
            watch_operations_failed.clone(),
        );

        let ready = Family::<ControllerLabel, Gauge>::default();
        registry.register(
            "ready",
            "1 when the controller is ready to reconcile resources, 0 otherwise",
            ready.clone(),
        );

        Self {
            label: ControllerLabel {
                controller: controller.to_string(),
            },
            reconcile,
            spec_replicas,
            status_update_errors,
            triggered,
            watch_operations_failed,
            ready,
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile
            .failures
            .get_or_create(&self.label)
            .inc();
    }

    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.reconcile.operations.get_or_create(&self.label).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            label: self.label.clone(),
            metric: self.reconcile.duration.clone(),
        }
    }

    pub fn reconcile_deploy_delete_create_inc(&self) {
        self.reconcile
            .deploy_delete_create
            .get_or_create(&self.label)
            .inc();
    }

    pub fn spec_replicas_set(&self, namespace: &str, name: &str, replicas: i32) {
        self.spec_replicas
            .get_or_create(&ReplicasLabel {
                controller: self.label.controller.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
            .set(replicas.into());
    }

    pub fn status_update_errors_inc(&self) {
        self.status_update_errors.get_or_create(&self.label).inc();
    }

    pub fn triggered_inc(&self, action: Action, triggered_by: &str) {
        self.triggered
            .get_or_create(&TriggeredLabel {
                controller: self.label.controller.clone(),
                action: action.as_str().to_string(),
                triggered_by: triggered_by.to_string(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch_operations_failed
            .get_or_create(&self.label)
            .inc();
    }

    pub fn ready_set(&self, status: i64) {
        self.ready.get_or_create(&self.label).set(status);
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub operations: Family<ControllerLabel, Counter>,
    pub failures: Family<ControllerLabel, Counter>,
    pub duration: Family<ControllerLabel, Histogram>,
    pub deploy_delete_create: Family<ControllerLabel, Counter>,
}

impl ReconcileMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let operations = Family::<ControllerLabel, Counter>::default();
        registry.register(
            "reconcile_operations",
            "Total number of reconcile operations",
            operations.clone(),
        );

        let failures = Family::<ControllerLabel, Counter>::default();
        registry.register(
            "reconcile_failures",
            "Number of errors that occurred during reconcile operations",
            failures.clone(),
        );

        let duration = Family::<ControllerLabel, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0].into_iter())
        });
        registry.register(
            "reconcile_duration_seconds",
            "Histogram of reconcile operation durations",
            duration.clone(),
        );

        let deploy_delete_create = Family::<ControllerLabel, Counter>::default();
        registry.register(
            "reconcile_deploy_delete_create",
            "Number of times reconciling a child resource required deleting and re-creating it",
            deploy_delete_create.clone(),
        );

        Self {
            operations,
            failures,
            duration,
            deploy_delete_create,
        }
    }
}

/// Measures a reconcile's wall time and records it to the duration histogram on drop.
pub struct ReconcileMeasurer {
    start: Instant,
    label: ControllerLabel,
    metric: Family<ControllerLabel, Histogram>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.get_or_create(&self.label).observe(duration);
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    Apply,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Delete => "delete",
        }
    }
}
