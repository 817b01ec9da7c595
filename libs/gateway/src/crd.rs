use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::{Affinity, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A `DBHubInstance` is a gateway deployment that exposes a selected set of `Database`
/// resources over an HTTP/SSE protocol. The operator never proxies traffic itself; it
/// only renders the gateway's configuration and drives the Deployment/Service/ConfigMap/
/// Secret that run the upstream gateway image. More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "dbhub.tas.io",
    version = "v1alpha1",
    kind = "DBHubInstance",
    plural = "dbhubinstances",
    singular = "dbhubinstance",
    shortname = "dbhi",
    namespaced,
    status = "DBHubInstanceStatus",
    doc = "The `DBHubInstance` custom resource definition (CRD) defines an MCP gateway deployment over a selected set of `Database` resources.",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.availableReplicas"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct DBHubInstanceSpec {
    /// Desired pod replica count, 0-10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Container image for the main gateway container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Pull policy for `image`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Wire protocol the gateway serves.
    #[serde(default)]
    pub transport: Transport,

    /// TCP port the main container listens on and the Service forwards to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Selects which `Database` resources in this instance's namespace are exposed.
    /// An absent selector matches every `Database` in the namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_selector: Option<DatabaseSelector>,

    /// Policy applied to every rendered tool unless a source overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_policy: Option<DefaultPolicy>,

    /// CPU/memory requests and limits for the main container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Wire protocol exposed by the gateway's main container.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Sse,
    Stdio,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Sse => "sse",
            Transport::Stdio => "stdio",
        }
    }
}

/// Selects a subset of `Database` resources in the instance's namespace. An absent
/// selector, or one with both fields empty, matches every `Database` in the namespace.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_names: Option<Vec<String>>,
}

/// Default per-source tool policy, unless overridden.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DefaultPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_operations: Option<Vec<String>>,
}

/// Recognized tool operation tokens (spec §4.1). Unrecognized tokens are accepted with
/// an admission warning, not rejected, so this list is advisory, not exhaustive.
pub const KNOWN_OPERATIONS: &[&str] = &["execute_sql", "search_objects", "list_tables", "describe_table"];

/// Most recently observed status of the `DBHubInstance`. Read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DBHubInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<GatewayPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,

    /// Sorted, distinct names of selected `Database` resources currently `Connected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_databases: Option<Vec<String>>,

    /// `<name>.<namespace>.svc.cluster.local:<port>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// First 8 bytes of the SHA-256 of the rendered TOML, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_config_update: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

/// Coarse health of a `DBHubInstance`, recomputed from observed sub-state every
/// reconcile rather than persisted and diffed (spec §9).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum GatewayPhase {
    #[default]
    Pending,
    Running,
    Failed,
    Degraded,
}

impl std::fmt::Display for GatewayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayPhase::Pending => "Pending",
            GatewayPhase::Running => "Running",
            GatewayPhase::Failed => "Failed",
            GatewayPhase::Degraded => "Degraded",
        };
        f.write_str(s)
    }
}
