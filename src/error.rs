use crate::store::Artifact;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("artifact {artifact} not found")]
    NotFound { artifact: Artifact },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render template {template}: {reason}")]
    Template { template: String, reason: String },
    #[error("signing backend failed")]
    SigningFailed,
    #[error("signing backend timed out")]
    BackendTimeout,
    #[error("invalid common name: {reason}")]
    Validation { reason: String },
    #[error("CA state is inconsistent, missing or malformed: {}", .missing.join(", "))]
    InconsistentState { missing: Vec<String> },
    #[error("failed to compute CA certificate digest")]
    Digest,
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the error means the CA has not been (completely) bootstrapped yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
