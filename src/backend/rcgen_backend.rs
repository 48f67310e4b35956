use crate::backend::{
    BackendError, CertKeyCsr, SignRequest, SigningBackend,
    document::{CsrRequest, SigningConfig},
};
use rand::{Rng, rng};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair, KeyUsagePurpose};
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tracing::{debug, instrument};

/// Certificates are back-dated by this many seconds to tolerate clock skew between hosts.
const NOT_BEFORE_OFFSET: i64 = 60;

/// Signs certificates in-process using the `rcgen` crate.
///
/// Reads the same rendered request documents and signing configuration as
/// [`CfsslBackend`](crate::backend::CfsslBackend), so switching between the two does not require
/// different templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct RcgenBackend(());

impl RcgenBackend {
    pub fn new() -> Self {
        Self(())
    }
}

fn validity(params: &mut CertificateParams, lifetime: std::time::Duration) {
    let not_before = OffsetDateTime::now_utc() - Duration::seconds(NOT_BEFORE_OFFSET);
    params.not_before = not_before;
    params.not_after = not_before + lifetime;
    params.serial_number = Some(rng().random::<u64>().into());
}

/// Serializes a CSR carrying only the subject and SANs of `params`.
///
/// CSRs cannot hold CA constraints, serial numbers or authority key identifiers, so those are
/// left out.
fn signing_request(params: &CertificateParams, key_pair: &KeyPair) -> Result<String, BackendError> {
    let mut request = CertificateParams::default();
    request.distinguished_name = params.distinguished_name.clone();
    request.subject_alt_names = params.subject_alt_names.clone();
    Ok(request.serialize_request(key_pair)?.pem()?)
}

fn build_root(request: CsrRequest) -> Result<CertKeyCsr, BackendError> {
    let key_pair = KeyPair::generate_for(request.key.algorithm()?)?;

    let mut params = CertificateParams::new(request.hosts.clone())?;
    params.distinguished_name = request.distinguished_name();
    let csr = signing_request(&params, &key_pair)?;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    validity(&mut params, request.ca_expiry()?);

    let cert = params.self_signed(&key_pair)?;

    Ok(CertKeyCsr {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
        csr,
    })
}

struct LeafInputs {
    ca_certificate: String,
    ca_key: String,
    config: SigningConfig,
    request: CsrRequest,
    profile: String,
    host_name: String,
}

fn build_leaf(inputs: LeafInputs) -> Result<CertKeyCsr, BackendError> {
    let profile = inputs.config.profile(&inputs.profile)?;

    let ca_key = KeyPair::from_pem(&inputs.ca_key)?;
    let issuer = CertificateParams::from_ca_cert_pem(&inputs.ca_certificate)?.self_signed(&ca_key)?;

    // An explicit host name replaces the hosts listed in the request document.
    let hosts: Vec<String> = if inputs.host_name.is_empty() {
        inputs.request.hosts.clone()
    } else {
        inputs
            .host_name
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_owned)
            .collect()
    };

    let key_pair = KeyPair::generate_for(inputs.request.key.algorithm()?)?;

    let mut params = CertificateParams::new(hosts)?;
    params.distinguished_name = inputs.request.distinguished_name();
    let csr = signing_request(&params, &key_pair)?;

    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = profile.key_usages;
    params.extended_key_usages = profile.extended_key_usages;
    params.use_authority_key_identifier_extension = true;
    validity(&mut params, profile.expiry);

    let cert = params.signed_by(&key_pair, &issuer, &ca_key)?;

    Ok(CertKeyCsr {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
        csr,
    })
}

async fn blocking<F>(f: F) -> Result<CertKeyCsr, BackendError>
where
    F: FnOnce() -> Result<CertKeyCsr, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::failed(format!("signing task failed: {e}")))?
}

impl SigningBackend for RcgenBackend {
    #[instrument(skip_all, fields(request = %csr_request.display()))]
    async fn self_sign(&self, csr_request: &Path) -> Result<CertKeyCsr, BackendError> {
        let request = CsrRequest::parse(&fs::read(csr_request).await?)?;
        debug!(cn = %request.common_name, "generating self-signed root");
        blocking(move || build_root(request)).await
    }

    #[instrument(skip_all, fields(host = request.host_name, profile = request.profile))]
    async fn sign(&self, request: SignRequest<'_>) -> Result<CertKeyCsr, BackendError> {
        let inputs = LeafInputs {
            ca_certificate: fs::read_to_string(request.ca_certificate).await?,
            ca_key: fs::read_to_string(request.ca_key).await?,
            config: SigningConfig::parse(&fs::read(request.signing_config).await?)?,
            request: CsrRequest::parse(&fs::read(request.request).await?)?,
            profile: request.profile.to_owned(),
            host_name: request.host_name.to_owned(),
        };

        blocking(move || build_leaf(inputs)).await
    }
}
