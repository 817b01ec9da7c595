//! Child ConfigMap (spec §4.3 step 6): the rendered TOML template, no credentials.

use crate::crd::DBHubInstance;

use std::collections::BTreeMap;

use dbhub_operator::labels::canonical_labels;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

pub const CONFIG_KEY: &str = "dbhub.toml";
pub const COMPONENT: &str = "database-mcp";

pub fn name(instance_name: &str) -> String {
    format!("{instance_name}-config")
}

/// Build the desired `ConfigMap` for `instance` carrying `rendered_toml`.
pub fn build(instance: &DBHubInstance, rendered_toml: &str) -> ConfigMap {
    let instance_name = instance.name_any();
    let labels = canonical_labels(&instance_name, COMPONENT);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name(&instance_name)),
            namespace: instance.namespace(),
            labels: Some(labels),
            owner_references: instance.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), rendered_toml.to_string())])),
        ..ConfigMap::default()
    }
}
