//! Child Service (spec §4.3 step 9): ClusterIP, single TCP port mapping `port→port`.
//! The desired object never sets `spec.clusterIP`, so server-side apply never claims
//! that field and the cluster-assigned IP survives repeated reconciles untouched.

use crate::crd::DBHubInstance;
use crate::resources::configmap::COMPONENT;
use crate::resources::deployment;

use dbhub_operator::labels::canonical_labels;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

pub fn name(instance_name: &str) -> String {
    deployment::name(instance_name)
}

/// Build the desired `Service` for `instance`.
pub fn build(instance: &DBHubInstance) -> Service {
    let instance_name = instance.name_any();
    let labels = canonical_labels(&instance_name, COMPONENT);
    let port = instance.spec.port.unwrap_or(8080);

    Service {
        metadata: ObjectMeta {
            name: Some(name(&instance_name)),
            namespace: instance.namespace(),
            labels: Some(labels.clone()),
            owner_references: instance.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                ..ServicePort::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// `<name>.<namespace>.svc.cluster.local:<port>` (spec §3.2).
pub fn endpoint(instance: &DBHubInstance) -> String {
    let instance_name = instance.name_any();
    // safe unwrap: DBHubInstance is namespace scoped
    let namespace = instance.namespace().unwrap();
    let port = instance.spec.port.unwrap_or(8080);
    format!("{}.{namespace}.svc.cluster.local:{port}", name(&instance_name))
}
