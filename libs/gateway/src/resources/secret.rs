//! Child Secret (spec §4.3 step 7): the `<ENV>_DSN` map consumed by the init
//! container's `envFrom`. Holds every substitutable value; the ConfigMap holds none.

use crate::crd::DBHubInstance;
use crate::resources::configmap::COMPONENT;

use std::collections::BTreeMap;

use dbhub_operator::labels::canonical_labels;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

pub fn name(instance_name: &str) -> String {
    format!("{instance_name}-creds")
}

/// Build the desired credentials `Secret` for `instance` carrying `dsn_by_env`.
pub fn build(instance: &DBHubInstance, dsn_by_env: &BTreeMap<String, String>) -> Secret {
    let instance_name = instance.name_any();
    let labels = canonical_labels(&instance_name, COMPONENT);

    Secret {
        metadata: ObjectMeta {
            name: Some(name(&instance_name)),
            namespace: instance.namespace(),
            labels: Some(labels),
            owner_references: instance.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..ObjectMeta::default()
        },
        string_data: Some(dsn_by_env.clone().into_iter().collect()),
        ..Secret::default()
    }
}
