//! Publishes Kubernetes events (`events.k8s.io/v1`) against a reconciled object.
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::events::v1::{Event as K8sEvent, EventSeries};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::chrono::{Duration, Utc};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tokio::sync::RwLock;

const EVENT_FINISH_TIME: Duration = Duration::minutes(6);

/// Minimal event type for publishing through [`Recorder::publish`].
///
/// All string fields must be human readable.
pub struct Event {
    /// The event severity. Shows up in `kubectl describe` as `Type`.
    pub type_: EventType,
    /// The short reason explaining why `action` was taken. At most 128 characters,
    /// generally `PascalCase`. Shows up in `kubectl describe` as `Reason`.
    pub reason: String,
    /// An optional description of the outcome of `action`. At most 1kB. Shows up
    /// in `kubectl describe` as `Message`.
    pub note: Option<String>,
    /// The action taken against the main object. At most 128 characters,
    /// usually `PascalCase`.
    pub action: String,
    /// Optional secondary object related to the main object, mapped to `related`
    /// in the Events API.
    pub secondary: Option<ObjectReference>,
}

/// The event severity or type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventType {
    /// An event took place - nothing to worry about.
    Normal,
    /// Something is not working as expected - it might be worth a look.
    Warning,
}

/// `ObjectReference` with `Hash`/`Eq` implementations for use as a cache key.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference(ObjectReference);

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.api_version.hash(state);
        self.0.kind.hash(state);
        self.0.name.hash(state);
        self.0.namespace.hash(state);
        self.0.uid.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct EventKey {
    event_type: EventType,
    action: String,
    reason: String,
    reporting_controller: String,
    reporting_instance: Option<String>,
    regarding: Reference,
    related: Option<Reference>,
}

/// Information about the reporting controller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reporter {
    /// The name of the reporting controller publishing the event, likely the
    /// controller's Deployment name.
    pub controller: String,
    /// The id of the controller publishing the event, likely the pod name.
    /// Falls back to the hostname, then to `controller`, if unset.
    pub instance: Option<String>,
}

impl From<String> for Reporter {
    fn from(controller: String) -> Self {
        Self {
            controller,
            instance: None,
        }
    }
}

impl From<&str> for Reporter {
    fn from(controller: &str) -> Self {
        let instance = hostname::get().ok().and_then(|h| h.into_string().ok());
        Self {
            controller: controller.into(),
            instance,
        }
    }
}

/// A publisher abstraction to emit Kubernetes events.
///
/// RBAC: publishing requires `create`/`patch` on `events.k8s.io/events`.
#[derive(Clone)]
pub struct Recorder {
    client: Client,
    reporter: Reporter,
    events_cache: Arc<RwLock<HashMap<EventKey, K8sEvent>>>,
}

impl Recorder {
    /// Create a new recorder. Cluster scoped objects publish in the "default"
    /// namespace.
    #[must_use]
    pub fn new(client: Client, reporter: impl Into<Reporter>) -> Self {
        Self {
            client,
            reporter: reporter.into(),
            events_cache: Arc::default(),
        }
    }

    fn get_event_key(&self, ev: &Event, regarding: &ObjectReference) -> EventKey {
        EventKey {
            event_type: ev.type_,
            action: ev.action.clone(),
            reason: ev.reason.clone(),
            reporting_controller: self.reporter.controller.clone(),
            reporting_instance: self.reporter.instance.clone(),
            regarding: Reference(regarding.clone()),
            related: ev.secondary.clone().map(Reference),
        }
    }

    fn generate_event(&self, ev: &Event, reference: &ObjectReference) -> K8sEvent {
        let now = Utc::now();
        K8sEvent {
            action: Some(ev.action.clone()),
            reason: Some(ev.reason.clone()),
            event_time: Some(MicroTime(now)),
            regarding: Some(reference.clone()),
            note: ev.note.clone(),
            metadata: ObjectMeta {
                namespace: reference.namespace.clone(),
                name: Some(format!(
                    "{}.{}",
                    reference.name.as_ref().unwrap_or(&self.reporter.controller),
                    now.timestamp()
                )),
                ..Default::default()
            },
            reporting_controller: Some(self.reporter.controller.clone()),
            reporting_instance: Some(
                self.reporter
                    .instance
                    .clone()
                    .unwrap_or_else(|| self.reporter.controller.clone()),
            ),
            series: None,
            type_: match ev.type_ {
                EventType::Normal => Some("Normal".into()),
                EventType::Warning => Some("Warning".into()),
            },
            related: ev.secondary.clone(),
            ..K8sEvent::default()
        }
    }

    /// Publish a new Kubernetes event for `reference`, coalescing repeated
    /// identical events into a series rather than spamming new objects.
    pub async fn publish(&self, ev: Event, reference: &ObjectReference) -> Result<(), kube::Error> {
        let now = Utc::now();
        let key = self.get_event_key(&ev, reference);
        let event = match self.events_cache.read().await.get(&key) {
            Some(e) => {
                let series = match &e.series {
                    Some(series) => EventSeries {
                        count: series.count + 1,
                        last_observed_time: MicroTime(now),
                    },
                    None => EventSeries {
                        count: 2,
                        last_observed_time: MicroTime(now),
                    },
                };
                let mut event = e.clone();
                event.series = Some(series);
                event
            }
            None => self.generate_event(&ev, reference),
        };

        let events: Api<K8sEvent> = Api::namespaced(
            self.client.clone(),
            reference.namespace.as_deref().unwrap_or("default"),
        );
        if event.series.is_some() {
            events
                .patch(
                    &event.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&event),
                )
                .await?;
        } else {
            events.create(&PostParams::default(), &event).await?;
        }

        {
            let mut cache = self.events_cache.write().await;
            cache.insert(key, event);
            cache.retain(|_, v| {
                let expired = v
                    .series
                    .as_ref()
                    .map(|s| s.last_observed_time.0 < now - EVENT_FINISH_TIME)
                    .or_else(|| {
                        v.event_time
                            .as_ref()
                            .map(|t| t.0 < now - EVENT_FINISH_TIME)
                    })
                    .unwrap_or(false);
                !expired
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Event, EventType, Recorder};
    use k8s_openapi::api::{core::v1::Service, events::v1::Event as K8sEvent};
    use kube::{Api, Client, Resource};

    #[tokio::test]
    #[ignore = "needs a cluster (creates an event for the default kubernetes service)"]
    async fn event_recorder_attaches_events() -> Result<(), Box<dyn std::error::Error>> {
        let client = Client::try_default().await?;
        let svcs: Api<Service> = Api::namespaced(client.clone(), "default");
        let s = svcs.get("kubernetes").await?;
        let recorder = Recorder::new(client.clone(), "dbhub-operator");
        recorder
            .publish(
                Event {
                    type_: EventType::Normal,
                    reason: "TestEvent".into(),
                    note: Some("recorder smoke test".into()),
                    action: "Test".into(),
                    secondary: None,
                },
                &s.object_ref(&()),
            )
            .await?;
        let events: Api<K8sEvent> = Api::namespaced(client, "default");
        let found = events
            .list(&Default::default())
            .await?
            .into_iter()
            .any(|e| e.reason.as_deref() == Some("TestEvent"));
        assert!(found);
        Ok(())
    }
}
