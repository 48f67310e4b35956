//! On-disk layout of the persisted CA state.
//!
//! Every piece of state lives in a single directory which is created with owner-only
//! permissions. Artifacts are addressed by their logical name ([`Artifact`]) rather than by path
//! so that callers never build file names by hand.

use crate::Error;
use std::{
    fmt,
    io::ErrorKind,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

const DIR_MODE: u32 = 0o700;
const PRIVATE_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// A named unit of persisted CA state.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Artifact {
    /// PEM-encoded root certificate, the trust anchor.
    RootCertificate,
    /// PEM-encoded root private key.
    RootKey,
    /// PEM-encoded CSR the root certificate was produced from.
    RootCsr,
    /// Rendered request document used to self-sign the root.
    RootCsrRequest,
    /// Rendered signing configuration (profiles and usages).
    SigningConfig,
    /// Rendered leaf request template. Its presence marks a bootstrapped CA.
    LeafRequest,
    /// Trust bundle handed out to clients.
    TrustBundle,
}

impl Artifact {
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::RootCertificate => "ca.pem",
            Self::RootKey => "ca-key.pem",
            Self::RootCsr => "ca-csr.pem",
            Self::RootCsrRequest => "ca-csr.json",
            Self::SigningConfig => "config.json",
            Self::LeafRequest => "req.json",
            Self::TrustBundle => "ca-certificates.crt",
        }
    }

    /// Permissions the artifact is written with.
    pub const fn permissions(self) -> Permissions {
        match self {
            Self::RootKey => Permissions::Private,
            _ => Permissions::Public,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// File permissions for a written artifact.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Permissions {
    /// Owner read/write only. The file is created exclusively and never overwritten.
    Private,
    /// World readable, owner writable.
    Public,
}

impl Permissions {
    const fn mode(self) -> u32 {
        match self {
            Self::Private => PRIVATE_MODE,
            Self::Public => PUBLIC_MODE,
        }
    }
}

/// Directory-backed store for [`Artifact`]s.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an artifact inside the store. The file may not exist.
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    /// Creates the backing directory. Calling this on an existing directory is not an error.
    pub async fn ensure_dir(&self) -> Result<(), Error> {
        match fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&self.root)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::io(
                format!("cannot create data directory {}", self.root.display()),
                e,
            )),
        }
    }

    pub async fn exists(&self, artifact: Artifact) -> Result<bool, Error> {
        fs::try_exists(self.path(artifact))
            .await
            .map_err(|e| Error::io(format!("cannot stat {artifact}"), e))
    }

    /// Reads an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the artifact has not been written yet.
    pub async fn read(&self, artifact: Artifact) -> Result<Vec<u8>, Error> {
        fs::read(self.path(artifact)).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound { artifact },
            _ => Error::io(format!("cannot read {artifact}"), e),
        })
    }

    pub async fn read_to_string(&self, artifact: Artifact) -> Result<String, Error> {
        let bytes = self.read(artifact).await?;
        String::from_utf8(bytes).map_err(|e| {
            Error::io(
                format!("{artifact} is not valid UTF-8"),
                std::io::Error::new(ErrorKind::InvalidData, e),
            )
        })
    }

    /// Writes an artifact with the given permissions.
    ///
    /// [`Permissions::Private`] artifacts are created exclusively: writing one that already
    /// exists fails instead of replacing it.
    pub async fn write(
        &self,
        artifact: Artifact,
        data: &[u8],
        permissions: Permissions,
    ) -> Result<(), Error> {
        let path = self.path(artifact);
        let mut options = fs::OpenOptions::new();
        options.write(true).mode(permissions.mode());

        match permissions {
            Permissions::Private => options.create_new(true),
            Permissions::Public => options.create(true).truncate(true),
        };

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| Error::io(format!("cannot create {artifact}"), e))?;

        // The mode passed to open only applies to newly created files.
        fs::set_permissions(&path, std::fs::Permissions::from_mode(permissions.mode()))
            .await
            .map_err(|e| Error::io(format!("cannot set permissions on {artifact}"), e))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::io(format!("cannot write {artifact}"), e))?;
        file.flush()
            .await
            .map_err(|e| Error::io(format!("cannot write {artifact}"), e))?;

        debug!(%artifact, bytes = data.len(), "wrote artifact");
        Ok(())
    }
}
