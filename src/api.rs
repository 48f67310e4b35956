//! Authenticated HTTP/1 API in front of a [`CaEngine`].

use crate::{CaEngine, Error, config::ApiSettings};
use base64::{Engine, engine::general_purpose::STANDARD};
use http::{
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode,
    header::{ALLOW, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
};
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::{
    borrow::Cow, convert::Infallible, future::Future, net::SocketAddr, pin::pin, sync::Arc,
};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const HEALTH_OK: &str = "Health OK";

const REALM: &str = r#"Basic realm="Authorization Required""#;
const CERTKEY_PREFIX: &str = "/api/v1/certkey/";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaResponse {
    pub ca_certificate_content: String,
    pub hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertKeyResponse {
    pub certificate_content: String,
    pub key_content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaBundleResponse {
    pub ca_bundle_content: String,
}

#[derive(Serialize)]
struct MessageResponse<'a> {
    message: &'a str,
}

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Health,
    Ca,
    CertKey(Cow<'a, str>),
    CaBundle,
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        match path {
            "/healthz" => Some(Self::Health),
            "/api/v1/ca" => Some(Self::Ca),
            "/api/v1/ca-bundle" => Some(Self::CaBundle),
            _ => path
                .strip_prefix(CERTKEY_PREFIX)
                .filter(|name| !name.is_empty() && !name.contains('/'))
                .map(|name| Self::CertKey(percent_decode_str(name).decode_utf8_lossy())),
        }
    }

    fn requires_auth(&self) -> bool {
        !matches!(self, Self::Health)
    }
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(body));
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", body.into()),
        Err(e) => {
            error!(error = %e, "cannot serialize response");
            let mut res = Response::new(Full::default());
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            res
        }
    }
}

fn message(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json(status, &MessageResponse { message })
}

fn unauthorized() -> Response<Full<Bytes>> {
    let mut res = message(StatusCode::UNAUTHORIZED, "unauthorized");
    res.headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
    res
}

/// Logs `err` and turns it into the generic response for a failed route.
fn failure(err: &Error, generic: &'static str) -> Response<Full<Bytes>> {
    match err {
        Error::Validation { .. } => {
            warn!(error = %err, "rejected request");
            message(StatusCode::BAD_REQUEST, "invalid subhostname!")
        }
        _ => {
            error!(error = %err, "{generic}");
            message(StatusCode::INTERNAL_SERVER_ERROR, generic)
        }
    }
}

/// Checks HTTP basic credentials. The scheme is matched case-insensitively and the username
/// and password are compared in constant time.
fn authorized(headers: &HeaderMap, settings: &ApiSettings) -> bool {
    let Some(credentials) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("basic"))
        .and_then(|(_, encoded)| STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
    else {
        return false;
    };

    let Some((user, pass)) = credentials.split_once(':') else {
        return false;
    };

    let user_ok = user.as_bytes().ct_eq(settings.username.as_bytes());
    let pass_ok = pass.as_bytes().ct_eq(settings.password.as_bytes());
    (user_ok & pass_ok).into()
}

/// Serves the CA over HTTP until the shutdown signal resolves.
pub struct ApiServer<E> {
    engine: Arc<E>,
    settings: Arc<ApiSettings>,
}

impl<E> Clone for ApiServer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<E: CaEngine> ApiServer<E> {
    pub fn new(engine: Arc<E>, settings: ApiSettings) -> Self {
        Self {
            engine,
            settings: Arc::new(settings),
        }
    }

    /// Answers a single request. Never fails; every error becomes a response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let (parts, _) = req.into_parts();

        let Some(route) = Route::parse(parts.uri.path()) else {
            return message(StatusCode::NOT_FOUND, "not found");
        };

        if parts.method != Method::GET {
            let mut res = message(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            res.headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET"));
            return res;
        }

        if route.requires_auth() && !authorized(&parts.headers, &self.settings) {
            warn!("missing or invalid credentials");
            return unauthorized();
        }

        match route {
            Route::Health => response(
                StatusCode::OK,
                "text/plain; charset=utf-8",
                Bytes::from_static(HEALTH_OK.as_bytes()),
            ),
            Route::Ca => self.ca().await,
            Route::CertKey(name) => self.cert_key(&name).await,
            Route::CaBundle => self.ca_bundle().await,
        }
    }

    async fn ca(&self) -> Response<Full<Bytes>> {
        let ca_certificate_content = match self.engine.ca_certificate().await {
            Ok(cert) => cert,
            Err(e) => return failure(&e, "cannot get ca certificate!"),
        };
        let hash = match self.engine.ca_certificate_fingerprint().await {
            Ok(hash) => hash,
            Err(e) => return failure(&e, "couldn't get ca certificate's hash!"),
        };

        json(
            StatusCode::OK,
            &CaResponse {
                ca_certificate_content,
                hash,
            },
        )
    }

    async fn cert_key(&self, name: &str) -> Response<Full<Bytes>> {
        match self.engine.issue(name).await {
            Ok(issued) => {
                info!(common_name = name, "issued certificate");
                json(
                    StatusCode::OK,
                    &CertKeyResponse {
                        certificate_content: issued.certificate,
                        key_content: issued.key,
                    },
                )
            }
            Err(e) => failure(&e, "cannot get certificate and key for service!"),
        }
    }

    async fn ca_bundle(&self) -> Response<Full<Bytes>> {
        match self.engine.trust_bundle().await {
            Ok(ca_bundle_content) => json(StatusCode::OK, &CaBundleResponse { ca_bundle_content }),
            Err(e) => failure(&e, "cannot get ca certificates bundle!"),
        }
    }

    async fn serve_connection(self, stream: TcpStream, guard: ShutdownGuard) {
        let service = service_fn(move |req: Request<Incoming>| {
            let api = self.clone();
            let span = info_span!("request", method = %req.method(), path = %req.uri().path());
            async move {
                let res = api.handle(req).await;
                debug!(status = %res.status(), "responded");
                Ok::<_, Infallible>(res)
            }
            .instrument(span)
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        let mut conn = pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = guard.cancelled() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(e) = result {
            debug!(error = %e, "connection closed with error");
        }
    }

    /// Accepts connections on `listener` until `shutdown_signal` resolves, then waits for open
    /// connections to finish their in-flight requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown_signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Shutdown::new(shutdown_signal);
        let guard = shutdown.guard_weak();

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }

        loop {
            tokio::select! {
                res = listener.accept() => {
                    match res {
                        Ok((stream, client_addr)) => self.spawn_connection(&shutdown, stream, client_addr),
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                _ = guard.cancelled() => break,
            }
        }

        let elapsed = shutdown.shutdown().await;
        info!(?elapsed, "server stopped");
    }

    fn spawn_connection(&self, shutdown: &Shutdown, stream: TcpStream, client_addr: SocketAddr) {
        let api = self.clone();
        let span = info_span!("connection", %client_addr);
        shutdown.spawn_task_fn(move |guard| api.serve_connection(stream, guard).instrument(span));
    }
}
