//! CA lifecycle and issuance.
//!
//! [`CertificateAuthority`] ties the [`ArtifactStore`], the [`TemplateRenderer`], a
//! [`SigningBackend`] and a [`DigestCapability`] together. It bootstraps the root exactly once
//! and afterwards serves leaf certificates and root information without mutating any shared
//! state, so it can be shared freely between concurrent requests.

use crate::{
    Error,
    backend::{BackendError, CertKeyCsr, SignRequest, SigningBackend},
    config::CaSettings,
    digest::DigestCapability,
    store::{Artifact, ArtifactStore, Permissions},
    template::{TemplateRenderer, TemplateValues},
};
use std::{future::Future, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Longest accepted common name, the maximum length of a DNS name.
const MAX_COMMON_NAME_LEN: usize = 253;

/// Artifacts that must all be present for issuance and info reads.
const SIGNING_MATERIAL: [Artifact; 3] = [
    Artifact::RootCertificate,
    Artifact::RootKey,
    Artifact::SigningConfig,
];

/// Result of [`CertificateAuthority::initialize`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootstrapOutcome {
    /// A new root was created and persisted.
    Created,
    /// A complete root already existed; nothing was changed.
    AlreadyInitialized,
}

/// A leaf certificate and its private key, both PEM-encoded.
#[derive(Clone, Eq, PartialEq)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub key: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate", &self.certificate)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Operations the HTTP API needs from a CA.
pub trait CaEngine: Send + Sync + 'static {
    /// Issues a leaf certificate and key for `common_name`.
    fn issue(
        &self,
        common_name: &str,
    ) -> impl Future<Output = Result<IssuedCertificate, Error>> + Send;

    /// Returns the PEM-encoded root certificate.
    fn ca_certificate(&self) -> impl Future<Output = Result<String, Error>> + Send;

    /// Returns the fingerprint of the root certificate.
    fn ca_certificate_fingerprint(&self) -> impl Future<Output = Result<String, Error>> + Send;

    /// Returns the trust bundle clients should install.
    fn trust_bundle(&self) -> impl Future<Output = Result<String, Error>> + Send;
}

/// Checks a caller supplied common name before it is rendered into a request document.
pub fn validate_common_name(common_name: &str) -> Result<(), Error> {
    let invalid = |reason: &str| {
        Err(Error::Validation {
            reason: reason.to_owned(),
        })
    };

    if common_name.is_empty() {
        return invalid("common name is empty");
    }
    if common_name.len() > MAX_COMMON_NAME_LEN {
        return invalid("common name is too long");
    }
    if !common_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '*' | ':'))
    {
        return invalid("common name contains characters not allowed in a host name");
    }

    Ok(())
}

/// A certificate authority backed by a directory of persisted artifacts.
pub struct CertificateAuthority<B, D> {
    settings: CaSettings,
    store: ArtifactStore,
    renderer: TemplateRenderer,
    backend: B,
    digest: D,
    bootstrap: Mutex<()>,
}

impl<B, D> CertificateAuthority<B, D>
where
    B: SigningBackend,
    D: DigestCapability,
{
    pub fn new(settings: &CaSettings, backend: B, digest: D) -> Self {
        Self {
            store: ArtifactStore::new(&settings.data_dir),
            renderer: TemplateRenderer::new(&settings.templates_dir),
            settings: settings.clone(),
            backend,
            digest,
            bootstrap: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn settings(&self) -> &CaSettings {
        &self.settings
    }

    fn values(&self, common_name: &str, ca_certificate: &str) -> TemplateValues {
        TemplateValues {
            organization: self.settings.organization.clone(),
            common_name: common_name.to_owned(),
            ca_certificate: ca_certificate.to_owned(),
        }
    }

    async fn bounded<T, E>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<Result<T, E>, Error> {
        let timeout: Duration = self.settings.backend_timeout;
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            error!(?timeout, "{what} timed out");
            Error::BackendTimeout
        })
    }

    async fn call_backend(
        &self,
        fut: impl Future<Output = Result<CertKeyCsr, BackendError>>,
    ) -> Result<CertKeyCsr, Error> {
        self.bounded("signing backend", fut).await?.map_err(|e| {
            error!(error = %e, "signing backend failed");
            Error::SigningFailed
        })
    }

    /// Creates the root CA unless it already exists.
    ///
    /// The presence of the rendered leaf request template marks a bootstrapped CA; it is written
    /// only after every other root artifact has been persisted. If the marker exists the
    /// remaining root artifacts are checked and a missing or malformed one is reported as
    /// [`Error::InconsistentState`] instead of being regenerated.
    ///
    /// Must complete before any issuance is attempted. Concurrent calls on the same authority are
    /// serialized.
    #[instrument(skip(self), fields(data_dir = %self.store.root().display()))]
    pub async fn initialize(&self) -> Result<BootstrapOutcome, Error> {
        let _guard = self.bootstrap.lock().await;

        self.store.ensure_dir().await.inspect_err(|e| {
            error!(error = %e, "cannot create data directory");
        })?;

        if self.store.exists(Artifact::LeafRequest).await? {
            self.verify_root().await?;
            info!("CA was already created");
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }

        if self.store.exists(Artifact::RootKey).await? {
            error!("root key exists without a completed bootstrap, refusing to replace it");
            return Err(Error::InconsistentState {
                missing: vec![Artifact::LeafRequest.to_string()],
            });
        }

        let values = self.values("", "");
        for artifact in [Artifact::RootCsrRequest, Artifact::SigningConfig] {
            let document = self.renderer.render(artifact.file_name(), &values).await?;
            self.store
                .write(artifact, document.as_bytes(), artifact.permissions())
                .await?;
        }
        let leaf_request = self
            .renderer
            .render(Artifact::LeafRequest.file_name(), &values)
            .await?;

        let csr_request = self.store.path(Artifact::RootCsrRequest);
        let root = self
            .call_backend(self.backend.self_sign(&csr_request))
            .await?;

        let bundle = self
            .renderer
            .render(
                Artifact::TrustBundle.file_name(),
                &self.values("", &root.cert),
            )
            .await?;

        self.store
            .write(Artifact::RootKey, root.key.as_bytes(), Permissions::Private)
            .await?;
        self.store
            .write(
                Artifact::RootCertificate,
                root.cert.as_bytes(),
                Permissions::Public,
            )
            .await?;
        self.store
            .write(Artifact::RootCsr, root.csr.as_bytes(), Permissions::Public)
            .await?;
        self.store
            .write(Artifact::TrustBundle, bundle.as_bytes(), Permissions::Public)
            .await?;
        self.store
            .write(
                Artifact::LeafRequest,
                leaf_request.as_bytes(),
                Permissions::Public,
            )
            .await?;

        info!("Initialize OK");
        Ok(BootstrapOutcome::Created)
    }

    /// Checks that every root artifact needed to serve requests is present and well formed.
    async fn verify_root(&self) -> Result<(), Error> {
        let mut missing = Vec::new();

        let pem_checks = [
            (Artifact::RootCertificate, "CERTIFICATE"),
            (Artifact::RootKey, "PRIVATE KEY"),
        ];
        for (artifact, label) in pem_checks {
            match self.store.read(artifact).await {
                Ok(bytes) => {
                    let well_formed = x509_parser::pem::parse_x509_pem(&bytes)
                        .is_ok_and(|(_, pem)| pem.label.ends_with(label));
                    if !well_formed {
                        missing.push(format!("{artifact} (malformed)"));
                    }
                }
                Err(Error::NotFound { .. }) => missing.push(artifact.to_string()),
                Err(e) => return Err(e),
            }
        }

        for artifact in [Artifact::SigningConfig, Artifact::TrustBundle] {
            if !self.store.exists(artifact).await? {
                missing.push(artifact.to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            error!(?missing, "CA state is inconsistent");
            Err(Error::InconsistentState { missing })
        }
    }

    /// Fails unless the root certificate, key and signing config are all present.
    ///
    /// Checked first by every issuance and info operation.
    async fn require_signing_material(&self) -> Result<(), Error> {
        let mut missing = Vec::new();
        for artifact in SIGNING_MATERIAL {
            if !self.store.exists(artifact).await? {
                missing.push(artifact);
            }
        }

        match missing.as_slice() {
            [] => Ok(()),
            all if all.len() == SIGNING_MATERIAL.len() => Err(Error::NotFound {
                artifact: Artifact::RootCertificate,
            }),
            some => Err(Error::InconsistentState {
                missing: some.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// Issues a leaf certificate signed by the root.
    ///
    /// The request document is rendered into a uniquely named temporary file which is removed
    /// when this returns, whatever the outcome.
    #[instrument(skip(self))]
    pub async fn issue(&self, common_name: &str) -> Result<IssuedCertificate, Error> {
        validate_common_name(common_name)?;
        self.require_signing_material().await?;

        let request = self
            .renderer
            .render_to_temp(
                Artifact::LeafRequest.file_name(),
                &self.values(common_name, ""),
            )
            .await?;

        let ca_certificate = self.store.path(Artifact::RootCertificate);
        let ca_key = self.store.path(Artifact::RootKey);
        let signing_config = self.store.path(Artifact::SigningConfig);

        let triple = self
            .call_backend(self.backend.sign(SignRequest {
                ca_certificate: &ca_certificate,
                ca_key: &ca_key,
                signing_config: &signing_config,
                profile: &self.settings.profile,
                host_name: common_name,
                request: request.path(),
            }))
            .await?;

        debug!("issued certificate");
        Ok(IssuedCertificate {
            certificate: triple.cert,
            key: triple.key,
        })
    }

    #[instrument(skip(self))]
    pub async fn ca_certificate(&self) -> Result<String, Error> {
        self.require_signing_material().await?;
        self.store.read_to_string(Artifact::RootCertificate).await
    }

    #[instrument(skip(self))]
    pub async fn ca_certificate_fingerprint(&self) -> Result<String, Error> {
        self.require_signing_material().await?;

        let path = self.store.path(Artifact::RootCertificate);
        let fingerprint = self
            .bounded("digest", self.digest.digest(&path))
            .await?
            .map_err(|e| {
                error!(error = %e, "digest failed");
                Error::Digest
            })?;

        Ok(fingerprint.trim_end().to_owned())
    }

    #[instrument(skip(self))]
    pub async fn trust_bundle(&self) -> Result<String, Error> {
        self.require_signing_material().await?;
        self.store.read_to_string(Artifact::TrustBundle).await
    }
}

impl<B, D> CaEngine for CertificateAuthority<B, D>
where
    B: SigningBackend,
    D: DigestCapability,
{
    async fn issue(&self, common_name: &str) -> Result<IssuedCertificate, Error> {
        CertificateAuthority::issue(self, common_name).await
    }

    async fn ca_certificate(&self) -> Result<String, Error> {
        CertificateAuthority::ca_certificate(self).await
    }

    async fn ca_certificate_fingerprint(&self) -> Result<String, Error> {
        CertificateAuthority::ca_certificate_fingerprint(self).await
    }

    async fn trust_bundle(&self) -> Result<String, Error> {
        CertificateAuthority::trust_bundle(self).await
    }
}
