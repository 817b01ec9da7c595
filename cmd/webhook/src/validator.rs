//! Validating-admission checks (spec §4.1 "Validator"). Returns a structured list of
//! field-path errors plus optional warnings; errors fail admission, warnings don't.

use dbhub_database::crd::{DatabaseSpec, DatabaseType, SslMode};
use dbhub_gateway::crd::{DBHubInstanceSpec, KNOWN_OPERATIONS, Transport};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const MAX_ROWS_SOFT_CAP: u32 = 100_000;
const PRIVILEGED_PORT: u16 = 1024;

/// A single field-path validation failure, rendered into the admission deny message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Accumulated validation outcome for one admission request.
#[derive(Debug, Default)]
pub struct Validation {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
}

impl Validation {
    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(path, message));
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Render every field error into one admission-denial message.
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a `Database` spec. `old` is `Some` on UPDATE, `None` on CREATE.
pub fn validate_database(spec: &DatabaseSpec, old: Option<&DatabaseSpec>) -> Validation {
    let mut v = Validation::default();

    if spec.type_.requires_host() {
        if spec.host.as_deref().unwrap_or_default().is_empty() {
            v.error("spec.host", "host is required for this database type");
        }
        let credentials_ref = spec.credentials_ref.as_ref();
        if credentials_ref.is_none() {
            v.error("spec.credentialsRef", "credentialsRef is required for this database type");
        } else if credentials_ref.unwrap().name.is_empty() {
            v.error("spec.credentialsRef.name", "credentialsRef.name must not be empty");
        }
    }
    if spec.database.is_empty() {
        v.error("spec.database", "database must not be empty");
    }

    if let Some(port) = spec.port {
        if port != 0 && port < PRIVILEGED_PORT {
            v.warn(format!("port {port} is a privileged port"));
        }
    }
    if let Some(timeout) = spec.connection_timeout {
        if (timeout as i64) < 0 {
            v.error("spec.connectionTimeout", "connectionTimeout must be non-negative");
        }
    }
    if let Some(timeout) = spec.query_timeout {
        if (timeout as i64) < 0 {
            v.error("spec.queryTimeout", "queryTimeout must be non-negative");
        }
    }
    if let Some(max_rows) = spec.max_rows {
        if max_rows > MAX_ROWS_SOFT_CAP {
            v.warn(format!("maxRows {max_rows} exceeds the soft cap of {MAX_ROWS_SOFT_CAP}"));
        }
    }

    if spec.ssl_mode == SslMode::Disable {
        v.warn("sslMode is disable: traffic to this database is unencrypted");
    }

    if let Some(old) = old {
        if old.host != spec.host {
            v.warn("host changed: will trigger reconnection");
        }
        if old.type_ != spec.type_ {
            v.warn("type changed: may require credential updates");
        }
    }

    v
}

/// Validate a `DBHubInstance` spec. `old` is `Some` on UPDATE, `None` on CREATE.
pub fn validate_instance(spec: &DBHubInstanceSpec, old: Option<&DBHubInstanceSpec>) -> Validation {
    let mut v = Validation::default();

    if let Some(replicas) = spec.replicas {
        if !(0..=10).contains(&replicas) {
            v.error("spec.replicas", "replicas must be between 0 and 10");
        }
    }
    if let Some(policy) = spec.image_pull_policy.as_deref() {
        if !["Always", "IfNotPresent", "Never"].contains(&policy) {
            v.error(
                "spec.imagePullPolicy",
                format!("imagePullPolicy must be one of Always, IfNotPresent, Never, got \"{policy}\""),
            );
        }
    }
    if let Some(port) = spec.port {
        if !(0..=65535).contains(&port) {
            v.error("spec.port", "port must be between 0 and 65535");
        } else if port != 0 && (port as u16) < PRIVILEGED_PORT {
            v.warn(format!("port {port} is a privileged port"));
        }
    }

    if let Some(selector) = spec.database_selector.as_ref() {
        if selector.match_labels.is_none() && selector.match_names.is_none() {
            v.error(
                "spec.databaseSelector",
                "databaseSelector must set at least one of matchLabels or matchNames",
            );
        }
    }

    if let Some(policy) = spec.default_policy.as_ref() {
        if let Some(max_rows) = policy.max_rows {
            if max_rows > MAX_ROWS_SOFT_CAP {
                v.warn(format!(
                    "defaultPolicy.maxRows {max_rows} exceeds the soft cap of {MAX_ROWS_SOFT_CAP}"
                ));
            }
        }
        if let Some(operations) = policy.allowed_operations.as_ref() {
            for op in operations {
                if !KNOWN_OPERATIONS.contains(&op.as_str()) {
                    v.warn(format!("defaultPolicy.allowedOperations contains unrecognized token \"{op}\""));
                }
            }
        }
        if policy.read_only == Some(false) {
            v.warn("defaultPolicy.readOnly is false: the gateway will accept mutating operations by default");
        }
    }

    if let Some(resources) = spec.resources.as_ref() {
        validate_resource_coherence(resources, &mut v);
    }

    if let Some(old) = old {
        if old.transport != spec.transport {
            v.warn(format!(
                "transport changed from {:?} to {:?}: will restart pods",
                old.transport, spec.transport
            ));
        }
        if old.port != spec.port {
            v.warn("port changed: may require service reconfiguration");
        }
    }

    v
}

fn validate_resource_coherence(resources: &k8s_openapi::api::core::v1::ResourceRequirements, v: &mut Validation) {
    let Some(requests) = resources.requests.as_ref() else {
        return;
    };
    let Some(limits) = resources.limits.as_ref() else {
        return;
    };
    for key in ["cpu", "memory"] {
        let (Some(request), Some(limit)) = (requests.get(key), limits.get(key)) else {
            continue;
        };
        match (parse_quantity(request), parse_quantity(limit)) {
            (Some(r), Some(l)) if r > l => {
                v.error(
                    format!("spec.resources.requests.{key}"),
                    format!("request ({request:?}) exceeds limit ({limit:?})"),
                );
            }
            _ => {}
        }
    }
}

/// Parse a Kubernetes `Quantity` string into a comparable base-unit `f64`. Supports the
/// decimal SI suffixes (`m`, `k`, `M`, `G`, `T`) and binary ones (`Ki`, `Mi`, `Gi`,
/// `Ti`) that CPU/memory requests and limits use; anything else falls back to a bare
/// numeric parse.
fn parse_quantity(q: &Quantity) -> Option<f64> {
    let s = q.0.trim();
    const BINARY: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0f64.powi(2)),
        ("Gi", 1024.0f64.powi(3)),
        ("Ti", 1024.0f64.powi(4)),
    ];
    for (suffix, factor) in BINARY {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return stripped.parse::<f64>().ok().map(|v| v * factor);
        }
    }
    const DECIMAL: &[(&str, f64)] = &[("m", 0.001), ("k", 1e3), ("M", 1e6), ("G", 1e9), ("T", 1e12)];
    for (suffix, factor) in DECIMAL {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return stripped.parse::<f64>().ok().map(|v| v * factor);
        }
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbhub_database::crd::CredentialsRef;
    use k8s_openapi::api::core::v1::ResourceRequirements;

    fn valid_database() -> DatabaseSpec {
        DatabaseSpec {
            type_: DatabaseType::Postgres,
            host: Some("10.0.0.1".to_string()),
            port: Some(5432),
            database: "appdb".to_string(),
            credentials_ref: Some(CredentialsRef {
                name: "creds".to_string(),
                namespace: None,
                user_key: None,
                password_key: None,
            }),
            ssl_mode: SslMode::Require,
            connection_timeout: Some(30),
            query_timeout: Some(60),
            max_rows: Some(1000),
            read_only: false,
            description: None,
        }
    }

    #[test]
    fn missing_host_is_an_error_for_non_sqlite() {
        let mut spec = valid_database();
        spec.host = None;
        let v = validate_database(&spec, None);
        assert!(!v.is_valid());
        assert!(v.errors.iter().any(|e| e.path == "spec.host"));
    }

    #[test]
    fn sqlite_needs_no_host_or_credentials() {
        let spec = DatabaseSpec {
            type_: DatabaseType::Sqlite,
            host: None,
            port: None,
            database: "/data/app.db".to_string(),
            credentials_ref: None,
            ssl_mode: SslMode::Disable,
            connection_timeout: None,
            query_timeout: None,
            max_rows: None,
            read_only: false,
            description: None,
        };
        let v = validate_database(&spec, None);
        assert!(v.is_valid());
    }

    #[test]
    fn max_rows_above_soft_cap_is_a_warning_not_an_error() {
        let mut spec = valid_database();
        spec.max_rows = Some(200_000);
        let v = validate_database(&spec, None);
        assert!(v.is_valid());
        assert!(!v.warnings.is_empty());
    }

    #[test]
    fn resources_invariant_request_must_not_exceed_limit() {
        let mut instance = DBHubInstanceSpec::default();
        instance.resources = Some(ResourceRequirements {
            requests: Some([("cpu".to_string(), Quantity("500m".to_string()))].into_iter().collect()),
            limits: Some([("cpu".to_string(), Quantity("200m".to_string()))].into_iter().collect()),
            ..ResourceRequirements::default()
        });
        let v = validate_instance(&instance, None);
        assert!(!v.is_valid());
        assert_eq!(v.errors[0].path, "spec.resources.requests.cpu");
    }

    #[test]
    fn selector_with_neither_field_is_rejected() {
        let mut instance = DBHubInstanceSpec::default();
        instance.database_selector = Some(dbhub_gateway::crd::DatabaseSelector::default());
        let v = validate_instance(&instance, None);
        assert!(!v.is_valid());
    }

    #[test]
    fn unrecognized_operation_token_is_a_warning() {
        let mut instance = DBHubInstanceSpec::default();
        instance.default_policy = Some(dbhub_gateway::crd::DefaultPolicy {
            read_only: Some(true),
            max_rows: None,
            allowed_operations: Some(vec!["delete_everything".to_string()]),
        });
        let v = validate_instance(&instance, None);
        assert!(v.is_valid());
        assert!(v.warnings.iter().any(|w| w.contains("delete_everything")));
    }

    #[test]
    fn unrecognized_image_pull_policy_is_an_error() {
        let mut instance = DBHubInstanceSpec::default();
        instance.image_pull_policy = Some("Sometimes".to_string());
        let v = validate_instance(&instance, None);
        assert!(!v.is_valid());
        assert!(v.errors.iter().any(|e| e.path == "spec.imagePullPolicy"));
    }

    #[test]
    fn transport_change_on_update_is_a_warning() {
        let mut old = DBHubInstanceSpec::default();
        old.transport = Transport::Http;
        let mut new = old.clone();
        new.transport = Transport::Sse;
        let v = validate_instance(&new, Some(&old));
        assert!(v.is_valid());
        assert!(v.warnings.iter().any(|w| w.contains("transport changed")));
    }
}
