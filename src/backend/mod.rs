//! Signing backends.
//!
//! A [`SigningBackend`] performs the actual key generation and X.509 signing. The CA orchestration
//! only ever hands it paths to rendered request documents and persisted root artifacts, so a
//! backend may equally be an external program or an in-process library.

mod cfssl;
#[cfg(feature = "rcgen-backend")]
mod document;
#[cfg(feature = "rcgen-backend")]
mod rcgen_backend;

use crate::command::CommandError;
use serde::Deserialize;
use std::{future::Future, path::Path};
use thiserror::Error;

pub use cfssl::*;
#[cfg(feature = "rcgen-backend")]
pub use rcgen_backend::*;

/// Certificate, private key and signing request produced by a backend, all PEM-encoded.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct CertKeyCsr {
    pub cert: String,
    pub key: String,
    #[serde(default)]
    pub csr: String,
}

impl std::fmt::Debug for CertKeyCsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertKeyCsr")
            .field("cert", &self.cert)
            .field("key", &"<redacted>")
            .field("csr", &self.csr)
            .finish()
    }
}

impl CertKeyCsr {
    /// Parses the JSON object `{"cert": ..., "key": ..., "csr": ...}`.
    pub fn from_json(output: &[u8]) -> Result<Self, BackendError> {
        let triple: Self = serde_json::from_slice(output)
            .map_err(|e| BackendError::InvalidOutput(e.to_string()))?;

        if triple.cert.trim().is_empty() || triple.key.trim().is_empty() {
            return Err(BackendError::InvalidOutput(
                "certificate or key is empty".to_owned(),
            ));
        }

        Ok(triple)
    }
}

/// Parameters for signing a leaf certificate against the persisted root.
#[derive(Clone, Copy, Debug)]
pub struct SignRequest<'a> {
    pub ca_certificate: &'a Path,
    pub ca_key: &'a Path,
    pub signing_config: &'a Path,
    pub profile: &'a str,
    pub host_name: &'a str,
    pub request: &'a Path,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{diagnostic}")]
    Failed { diagnostic: String },
    #[error("invalid backend output: {0}")]
    InvalidOutput(String),
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "rcgen-backend")]
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
}

impl BackendError {
    pub(crate) fn failed(diagnostic: impl Into<String>) -> Self {
        Self::Failed {
            diagnostic: diagnostic.into(),
        }
    }
}

impl From<CommandError> for BackendError {
    fn from(err: CommandError) -> Self {
        Self::failed(err.to_string())
    }
}

/// Generates and signs certificates on behalf of the CA.
pub trait SigningBackend: Send + Sync + 'static {
    /// Creates a fresh self-signed root from the rendered CSR request document.
    fn self_sign(
        &self,
        csr_request: &Path,
    ) -> impl Future<Output = Result<CertKeyCsr, BackendError>> + Send;

    /// Creates a leaf certificate and key signed by the persisted root.
    fn sign(
        &self,
        request: SignRequest<'_>,
    ) -> impl Future<Output = Result<CertKeyCsr, BackendError>> + Send;
}
