use thiserror::Error;

/// Failure taxonomy for the database reconciler (spec §4.2, §7). Each variant is
/// mapped to a `status.conditions` reason by `reconcile::status`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1:?}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} is missing key {key}")]
    SecretKeyMissing {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("unsupported database type {0:?}")]
    UnsupportedType(crate::crd::DatabaseType),

    #[error("failed to open connection: {0}")]
    DriverOpenError(String),

    #[error("ping timed out after {0:?}")]
    PingTimeout(std::time::Duration),

    #[error("connection refused: {0}")]
    PingRefused(String),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
