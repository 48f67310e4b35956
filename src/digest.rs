//! Fingerprints of the root certificate.

use crate::command::{self, CommandError};
use sha2::{Digest, Sha256};
use std::{
    ffi::OsStr,
    future::Future,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("{diagnostic}")]
    Failed { diagnostic: String },
    #[error("cannot read certificate: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate is not valid PEM: {0}")]
    Pem(String),
}

impl From<CommandError> for DigestError {
    fn from(err: CommandError) -> Self {
        Self::Failed {
            diagnostic: err.to_string(),
        }
    }
}

/// Computes a stable textual fingerprint of a PEM certificate file.
pub trait DigestCapability: Send + Sync + 'static {
    fn digest(&self, certificate: &Path) -> impl Future<Output = Result<String, DigestError>> + Send;
}

fn first_certificate_der(pem: &[u8]) -> Result<Vec<u8>, DigestError> {
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(pem).map_err(|e| DigestError::Pem(e.to_string()))?;
    if pem.label != "CERTIFICATE" {
        return Err(DigestError::Pem(format!("unexpected PEM label {}", pem.label)));
    }
    Ok(pem.contents)
}

/// Lowercase hex SHA-256 over the DER encoding of the certificate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Fingerprint;

impl DigestCapability for Sha256Fingerprint {
    async fn digest(&self, certificate: &Path) -> Result<String, DigestError> {
        let der = first_certificate_der(&fs::read(certificate).await?)?;
        Ok(hex::encode(Sha256::digest(&der)))
    }
}

/// OpenSSL subject-name hash, obtained by running `openssl x509 -hash -noout -in <file>`.
///
/// This is the value used to name certificates in OpenSSL `c_rehash` style trust directories.
#[derive(Clone, Debug)]
pub struct SubjectHashCommand {
    program: PathBuf,
}

impl SubjectHashCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DigestCapability for SubjectHashCommand {
    async fn digest(&self, certificate: &Path) -> Result<String, DigestError> {
        let args = [
            OsStr::new("x509"),
            OsStr::new("-hash"),
            OsStr::new("-noout"),
            OsStr::new("-in"),
            certificate.as_os_str(),
        ];
        let output = command::run(&self.program, args).await?;
        Ok(String::from_utf8_lossy(&output).trim_end().to_owned())
    }
}

/// OpenSSL subject-name hash computed in-process with the `openssl` crate.
#[cfg(feature = "openssl-digest")]
#[cfg_attr(docsrs, doc(cfg(feature = "openssl-digest")))]
#[derive(Clone, Copy, Debug, Default)]
pub struct OpensslSubjectHash;

#[cfg(feature = "openssl-digest")]
impl DigestCapability for OpensslSubjectHash {
    async fn digest(&self, certificate: &Path) -> Result<String, DigestError> {
        let pem = fs::read(certificate).await?;
        let cert = openssl::x509::X509::from_pem(&pem).map_err(|e| DigestError::Pem(e.to_string()))?;
        Ok(format!("{:08x}", cert.subject_name_hash()))
    }
}
