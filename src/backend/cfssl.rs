use crate::{
    backend::{BackendError, CertKeyCsr, SignRequest, SigningBackend},
    command,
};
use std::{ffi::OsString, path::Path, path::PathBuf};
use tracing::debug;

/// Signs certificates by running the `cfssl` command line tool.
///
/// `cfssl genkey -initca` creates the root and `cfssl gencert` issues leaf certificates. Both
/// print a JSON object holding the certificate, key and CSR on standard output.
#[derive(Clone, Debug)]
pub struct CfsslBackend {
    program: PathBuf,
}

impl CfsslBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn gencert_args(request: &SignRequest<'_>) -> Vec<OsString> {
        let flag = |name: &str, value: &Path| {
            let mut arg = OsString::from(format!("-{name}="));
            arg.push(value);
            arg
        };

        vec![
            OsString::from("gencert"),
            OsString::from("-loglevel=0"),
            flag("ca", request.ca_certificate),
            flag("ca-key", request.ca_key),
            flag("config", request.signing_config),
            OsString::from(format!("-profile={}", request.profile)),
            OsString::from(format!("-hostname={}", request.host_name)),
            request.request.as_os_str().to_owned(),
        ]
    }
}

impl SigningBackend for CfsslBackend {
    async fn self_sign(&self, csr_request: &Path) -> Result<CertKeyCsr, BackendError> {
        debug!(request = %csr_request.display(), "running cfssl genkey -initca");
        let args = [
            OsString::from("genkey"),
            OsString::from("-initca"),
            csr_request.as_os_str().to_owned(),
        ];
        let output = command::run(&self.program, args).await?;
        CertKeyCsr::from_json(&output)
    }

    async fn sign(&self, request: SignRequest<'_>) -> Result<CertKeyCsr, BackendError> {
        debug!(host = request.host_name, profile = request.profile, "running cfssl gencert");
        let output = command::run(&self.program, Self::gencert_args(&request)).await?;
        CertKeyCsr::from_json(&output)
    }
}
