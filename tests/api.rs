use common::StubEngine;
use reqwest::{StatusCode, header::WWW_AUTHENTICATE};
use serde_json::{Value, json};
use std::sync::{Arc, atomic::Ordering};

mod common;

#[tokio::test]
async fn health_needs_no_credentials() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();

    let res = common::build_client()
        .get(common::url(addr, "/healthz"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "Health OK");

    stop.send(()).unwrap();
}

#[tokio::test]
async fn rejects_missing_and_wrong_credentials() {
    let engine = Arc::new(StubEngine::default());
    let (addr, stop) = common::start_server(Arc::clone(&engine)).await.unwrap();
    let client = common::build_client();

    for path in ["/api/v1/ca", "/api/v1/ca-bundle", "/api/v1/certkey/svc1.internal"] {
        let res = client.get(common::url(addr, path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(
            res.headers()[WWW_AUTHENTICATE],
            r#"Basic realm="Authorization Required""#
        );

        let res = client
            .get(common::url(addr, path))
            .basic_auth(common::USERNAME, Some("wrong"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
    }

    assert_eq!(engine.issue_counter.load(Ordering::Relaxed), 0);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn returns_ca_and_hash() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();

    let res = common::get_authorized(&common::build_client(), addr, "/api/v1/ca").await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "caCertificateContent": common::CA_CERT, "hash": common::CA_HASH })
    );

    stop.send(()).unwrap();
}

#[tokio::test]
async fn issues_certificate_for_subhostname() {
    let engine = Arc::new(StubEngine::default());
    let (addr, stop) = common::start_server(Arc::clone(&engine)).await.unwrap();

    let res = common::get_authorized(
        &common::build_client(),
        addr,
        "/api/v1/certkey/svc1.internal",
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({
            "certificateContent": "cert for svc1.internal",
            "keyContent": "key for svc1.internal"
        })
    );
    assert_eq!(engine.issue_counter.load(Ordering::Relaxed), 1);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn percent_encoded_subhostname_is_decoded() {
    let engine = Arc::new(StubEngine::default());
    let (addr, stop) = common::start_server(Arc::clone(&engine)).await.unwrap();

    let res = common::get_authorized(
        &common::build_client(),
        addr,
        "/api/v1/certkey/svc1%2Einternal",
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.json::<Value>().await.unwrap()["certificateContent"],
        "cert for svc1.internal"
    );
    assert_eq!(engine.issue_counter.load(Ordering::Relaxed), 1);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn lowercase_basic_scheme_is_accepted() {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();
    let credentials = STANDARD.encode(format!("{}:{}", common::USERNAME, common::PASSWORD));

    let res = common::build_client()
        .get(common::url(addr, "/api/v1/ca-bundle"))
        .header(reqwest::header::AUTHORIZATION, format!("basic {credentials}"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn empty_subhostname_is_not_found() {
    let engine = Arc::new(StubEngine::default());
    let (addr, stop) = common::start_server(Arc::clone(&engine)).await.unwrap();
    let client = common::build_client();

    for path in ["/api/v1/certkey/", "/api/v1/certkey"] {
        let res = common::get_authorized(&client, addr, path).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
    assert_eq!(engine.issue_counter.load(Ordering::Relaxed), 0);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn invalid_subhostname_is_bad_request() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();

    let res = common::get_authorized(
        &common::build_client(),
        addr,
        "/api/v1/certkey/svc%22name",
    )
    .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    stop.send(()).unwrap();
}

#[tokio::test]
async fn returns_ca_bundle() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();

    let res = common::get_authorized(&common::build_client(), addr, "/api/v1/ca-bundle").await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "caBundleContent": common::CA_CERT })
    );

    stop.send(()).unwrap();
}

#[tokio::test]
async fn failures_return_generic_messages() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::failing()))
        .await
        .unwrap();
    let client = common::build_client();

    let cases = [
        ("/api/v1/ca", "cannot get ca certificate!"),
        (
            "/api/v1/certkey/svc1.internal",
            "cannot get certificate and key for service!",
        ),
        ("/api/v1/ca-bundle", "cannot get ca certificates bundle!"),
    ];

    for (path, message) in cases {
        let res = common::get_authorized(&client, addr, path).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR, "{path}");

        let body = res.text().await.unwrap();
        assert!(!body.contains("ca-key.pem"), "{path} leaked {body}");
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({ "message": message })
        );
    }

    stop.send(()).unwrap();
}

#[tokio::test]
async fn unknown_paths_and_methods() {
    let (addr, stop) = common::start_server(Arc::new(StubEngine::default()))
        .await
        .unwrap();
    let client = common::build_client();

    let res = common::get_authorized(&client, addr, "/api/v2/ca").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(common::url(addr, "/api/v1/ca"))
        .basic_auth(common::USERNAME, Some(common::PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    stop.send(()).unwrap();
}
