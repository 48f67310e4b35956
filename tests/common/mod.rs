#![allow(dead_code)]

use keystone_ca::{ApiServer, ApiSettings, CaEngine, Error, IssuedCertificate};
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::oneshot::Sender;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

pub const CA_CERT: &str = "-----BEGIN CERTIFICATE-----\nY2E=\n-----END CERTIFICATE-----\n";
pub const CA_HASH: &str = "f124a60a";

pub fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

pub fn api_settings() -> ApiSettings {
    ApiSettings {
        username: USERNAME.to_owned(),
        password: PASSWORD.to_owned(),
    }
}

pub async fn start_server<E: CaEngine>(
    engine: Arc<E>,
) -> Result<(SocketAddr, Sender<()>), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;

    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(ApiServer::new(engine, api_settings()).serve(listener, async {
        rx.await.unwrap_or_default()
    }));

    Ok((addr, tx))
}

pub fn build_client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

pub async fn get_authorized(
    client: &reqwest::Client,
    addr: SocketAddr,
    path: &str,
) -> reqwest::Response {
    client
        .get(url(addr, path))
        .basic_auth(USERNAME, Some(PASSWORD))
        .send()
        .await
        .unwrap()
}

/// Engine returning canned answers, optionally failing every operation.
#[derive(Default)]
pub struct StubEngine {
    pub fail: bool,
    pub issue_counter: AtomicUsize,
}

impl StubEngine {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn result<T>(&self, value: T) -> Result<T, Error> {
        if self.fail {
            Err(Error::InconsistentState {
                missing: vec!["ca-key.pem".to_owned()],
            })
        } else {
            Ok(value)
        }
    }
}

impl CaEngine for StubEngine {
    async fn issue(&self, common_name: &str) -> Result<IssuedCertificate, Error> {
        self.issue_counter.fetch_add(1, Ordering::Relaxed);
        keystone_ca::authority::validate_common_name(common_name)?;
        self.result(IssuedCertificate {
            certificate: format!("cert for {common_name}"),
            key: format!("key for {common_name}"),
        })
    }

    async fn ca_certificate(&self) -> Result<String, Error> {
        self.result(CA_CERT.to_owned())
    }

    async fn ca_certificate_fingerprint(&self) -> Result<String, Error> {
        self.result(CA_HASH.to_owned())
    }

    async fn trust_bundle(&self) -> Result<String, Error> {
        self.result(CA_CERT.to_owned())
    }
}
