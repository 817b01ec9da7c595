use thiserror::Error;

/// Failure taxonomy for the gateway reconciler (spec §4.3, §7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1:?}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("selector resolution failed: {0}")]
    SelectorError(String),

    #[error("config render failed: {0}")]
    RenderError(String),

    #[error("a selected database's credentials could not be read: {0}")]
    SecretReadError(#[source] dbhub_database::error::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `KubeOperations::kube_patch`/`kube_delete` (used to apply the four child resources)
/// return `dbhub_operator`'s own error type; fold it into ours so reconcile code can
/// keep using `?`.
impl From<dbhub_operator::error::Error> for Error {
    fn from(error: dbhub_operator::error::Error) -> Self {
        match error {
            dbhub_operator::error::Error::KubeError(msg, source) => Error::KubeError(msg, source),
            other => Error::RenderError(other.to_string()),
        }
    }
}
