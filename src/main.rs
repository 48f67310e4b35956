use clap::Parser;
use keystone_ca::{
    ApiServer, CertificateAuthority, Config, Error,
    backend::{CfsslBackend, SigningBackend},
    config::{BackendKind, DigestKind, LogFormat},
    digest::{DigestCapability, Sha256Fingerprint, SubjectHashCommand},
};
use std::{process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: Config) -> Result<(), Error> {
    match config.backend {
        #[cfg(feature = "rcgen-backend")]
        BackendKind::Rcgen => with_backend(&config, keystone_ca::backend::RcgenBackend::new()).await,
        #[cfg(not(feature = "rcgen-backend"))]
        BackendKind::Rcgen => Err(Error::Validation {
            reason: "the rcgen backend is not compiled in, use --backend cfssl".to_owned(),
        }),
        BackendKind::Cfssl => with_backend(&config, CfsslBackend::new(&config.cfssl_path)).await,
    }
}

async fn with_backend<B: SigningBackend>(config: &Config, backend: B) -> Result<(), Error> {
    match config.digest {
        DigestKind::Sha256 => serve(config, backend, Sha256Fingerprint).await,
        DigestKind::SubjectHash => {
            serve(config, backend, SubjectHashCommand::new(&config.openssl_path)).await
        }
        #[cfg(feature = "openssl-digest")]
        DigestKind::Openssl => {
            serve(config, backend, keystone_ca::digest::OpensslSubjectHash).await
        }
        #[cfg(not(feature = "openssl-digest"))]
        DigestKind::Openssl => Err(Error::Validation {
            reason: "the openssl digest is not compiled in, use --digest subject-hash".to_owned(),
        }),
    }
}

async fn serve<B, D>(config: &Config, backend: B, digest: D) -> Result<(), Error>
where
    B: SigningBackend,
    D: DigestCapability,
{
    let ca = CertificateAuthority::new(&config.ca_settings(), backend, digest);
    let outcome = ca.initialize().await?;
    info!(?outcome, "CA ready");

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::io(format!("cannot bind {addr}"), e))?;

    ApiServer::new(Arc::new(ca), config.api_settings())
        .serve(listener, tokio_graceful::default_signal())
        .await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}
