use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A `Database` is a reference to an external SQL server reachable from the cluster: its
/// address, driver type and the secret holding its credentials. The operator never runs
/// queries against it; it only validates reachability and republishes a credential-stripped
/// connection string for display. More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "dbhub.tas.io",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    singular = "database",
    shortname = "db",
    namespaced,
    status = "DatabaseStatus",
    doc = "The `Database` custom resource definition (CRD) references a reachable external SQL server and its credentials.",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// The SQL driver used to connect to this database.
    #[serde(rename = "type")]
    pub type_: DatabaseType,

    /// Hostname or IP address of the database server. Required for every type except
    /// `sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// TCP port of the database server. Defaulted per `type` by the admission layer if
    /// unset: 5432 for postgres, 3306 for mysql/mariadb, 1433 for sqlserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name. For `sqlite`, this is used verbatim as a filesystem path.
    pub database: String,

    /// Reference to the secret holding the database credentials. Not required for
    /// `sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<CredentialsRef>,

    /// TLS/SSL negotiation mode.
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Timeout, in seconds, for establishing the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout: Option<u32>,

    /// Timeout, in seconds, applied by the gateway to queries issued against this
    /// source. The operator only forwards this value into the rendered config; it is
    /// never enforced by the operator itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<u32>,

    /// Soft cap on rows returned per query, forwarded into the rendered config.
    /// Values above 100000 are accepted but generate an admission warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,

    /// Marks this source as read-only for tool rendering. Does not affect the
    /// operator's own health check, which only ever issues a read-only ping.
    #[serde(default)]
    pub read_only: bool,

    /// Free-form human description, surfaced verbatim in status messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The SQL dialect/driver to use when connecting.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Postgres,
    Mysql,
    Mariadb,
    Sqlserver,
    Sqlite,
}

impl DatabaseType {
    /// Driver-default port, used by the admission layer's defaulter.
    pub fn default_port(self) -> Option<u16> {
        match self {
            DatabaseType::Postgres => Some(5432),
            DatabaseType::Mysql | DatabaseType::Mariadb => Some(3306),
            DatabaseType::Sqlserver => Some(1433),
            DatabaseType::Sqlite => None,
        }
    }

    pub fn requires_host(self) -> bool {
        !matches!(self, DatabaseType::Sqlite)
    }
}

/// TLS negotiation mode for the connection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    #[default]
    Disable,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// Whether this mode implies a TLS-wrapped connection, used by the mysql/mariadb
    /// DSN's `tls=` query parameter.
    pub fn requires_tls(self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Pointer to the secret backing a `Database`'s credentials.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRef {
    /// Name of the secret.
    pub name: String,

    /// Namespace of the secret. Defaults to the `Database`'s own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key inside the secret's `data`/`stringData` holding the username. Defaults to
    /// `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,

    /// Key inside the secret's `data`/`stringData` holding the password. Defaults to
    /// `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_key: Option<String>,
}

impl CredentialsRef {
    pub fn resolved_namespace<'a>(&'a self, database_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(database_namespace)
    }

    pub fn resolved_user_key(&self) -> &str {
        self.user_key.as_deref().unwrap_or("username")
    }

    pub fn resolved_password_key(&self) -> &str {
        self.password_key.as_deref().unwrap_or("password")
    }
}

/// Most recently observed status of the `Database`. Read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Credential-stripped connection string, safe to display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

/// Coarse reachability state of a `Database`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum DatabasePhase {
    #[default]
    Pending,
    Connected,
    Failed,
    Degraded,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatabasePhase::Pending => "Pending",
            DatabasePhase::Connected => "Connected",
            DatabasePhase::Failed => "Failed",
            DatabasePhase::Degraded => "Degraded",
        };
        f.write_str(s)
    }
}
