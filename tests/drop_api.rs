/// End-to-end tests against the HTTP router
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use dropkeep::{
    api::drop::CreateDropResponse, config::ServerConfig, context::AppContext, drop_store::DropId,
    janitor::Janitor, server::build_router,
};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery staple";
const BOUNDARY: &str = "dropkeep-test-boundary";

struct TestServer {
    ctx: AppContext,
    router: Router,
    _dir: TempDir,
}

async fn test_server(overrides: &[(&str, &str)]) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut vars: HashMap<String, String> = HashMap::from([
        ("DROP_PASSWORD".to_string(), PASSWORD.to_string()),
        (
            "DROP_DATA_DIRECTORY".to_string(),
            dir.path().to_string_lossy().into_owned(),
        ),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    let config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    let ctx = AppContext::new(config).await.unwrap();
    let router = build_router(ctx.clone());

    TestServer {
        ctx,
        router,
        _dir: dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn upload_request(query: &str, password: Option<&str>, body: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/drop{}", query))
        .header(header::CONTENT_TYPE, "text/plain");
    if let Some(password) = password {
        builder = builder.header("x-drop-password", password);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

fn request(method: Method, uri: &str, password: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(password) = password {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", password));
    }
    builder.body(Body::empty()).unwrap()
}

async fn upload(router: &Router, query: &str, body: &[u8]) -> CreateDropResponse {
    let response = send(router, upload_request(query, Some(PASSWORD), body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn multipart_body(fields: &[(&str, Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (name, filename, value) in fields {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match filename {
            Some(filename) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/markdown\r\n\r\n",
                name, filename
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                name
            )),
        }
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

fn multipart_request(body: String) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/drop")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_then_download_returns_same_bytes() {
    let server = test_server(&[]).await;

    let created = upload(&server.router, "", b"hello, drop").await;
    assert_eq!(created.size, 11);
    assert_eq!(created.url, format!("/drop/{}", created.id));
    assert!(created.expires_at.is_some());

    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(body_bytes(response).await, b"hello, drop");
}

#[tokio::test]
async fn test_ids_are_unique() {
    let server = test_server(&[]).await;

    let mut ids = HashSet::new();
    for i in 0..50 {
        let created = upload(&server.router, "", format!("payload {}", i).as_bytes()).await;
        assert_eq!(created.id.len(), 32);
        assert!(ids.insert(created.id), "duplicate drop id");
    }
}

#[tokio::test]
async fn test_expired_drop_is_not_served_before_sweep() {
    let server = test_server(&[]).await;

    let created = upload(&server.router, "?ttl=1", b"short lived").await;
    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // No janitor is running; the read path alone must hide it
    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&server.router, request(Method::HEAD, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_janitor_reclaims_expired_drop_within_two_intervals() {
    let server = test_server(&[("DROP_SWEEP_INTERVAL_SECS", "1")]).await;
    let janitor = Janitor::new(server.ctx.clone()).start();

    let created = upload(&server.router, "?ttl=1", b"sweep me").await;
    let id = DropId::parse(&created.id).unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert!(!server.ctx.drops.store().contains(&id).await.unwrap());
    assert!(!server.ctx.drops.blobs().exists(&id).await.unwrap());

    janitor.shutdown().await;
}

#[tokio::test]
async fn test_delete_is_idempotent_from_the_callers_view() {
    let server = test_server(&[]).await;
    let created = upload(&server.router, "", b"delete me").await;

    let response = send(
        &server.router,
        request(Method::DELETE, &created.url, Some(PASSWORD)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &server.router,
        request(Method::DELETE, &created.url, Some(PASSWORD)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = test_server(&[]).await;
    let created = upload(&server.router, "", b"guarded").await;

    let response = send(&server.router, upload_request("", Some("wrong"), b"x")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&server.router, upload_request("", None, b"x")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unauthorized regardless of whether the id exists or is even valid
    for uri in [created.url.as_str(), "/drop/not-a-real-id"] {
        let response = send(&server.router, request(Method::DELETE, uri, Some("wrong"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = send(&server.router, request(Method::DELETE, uri, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Reads need no password
    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    let server = test_server(&[]).await;

    for uri in ["/drop/short", "/drop/AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"] {
        let response = send(&server.router, request(Method::GET, uri, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = send(
        &server.router,
        request(Method::DELETE, "/drop/short", Some(PASSWORD)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_one_time_download() {
    let server = test_server(&[]).await;
    let created = upload(&server.router, "?max_downloads=1", b"read once").await;
    assert_eq!(created.max_downloads, Some(1));

    // HEAD does not use up the download
    for _ in 0..2 {
        let response = send(&server.router, request(Method::HEAD, &created.url, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"read once");

    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ttl_validation() {
    let server = test_server(&[("DROP_MAX_TTL", "1d")]).await;

    for query in ["?ttl=2d", "?ttl=never", "?ttl=0", "?ttl=soon"] {
        let response = send(&server.router, upload_request(query, Some(PASSWORD), b"x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {}", query);
    }

    let created = upload(&server.router, "?ttl=2h", b"x").await;
    let expires_at = created.expires_at.unwrap();
    let ttl = expires_at - created.created_at;
    assert_eq!(ttl.num_seconds(), 2 * 3600);
}

#[tokio::test]
async fn test_never_expiring_drop_when_unbounded() {
    let server = test_server(&[("DROP_MAX_TTL", "none")]).await;

    let created = upload(&server.router, "?ttl=never", b"forever").await;
    assert!(created.expires_at.is_none());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let server = test_server(&[("DROP_MAX_UPLOAD_BYTES", "16")]).await;

    let response = send(
        &server.router,
        upload_request("", Some(PASSWORD), &[b'x'; 17]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    upload(&server.router, "", &[b'x'; 16]).await;
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let server = test_server(&[]).await;

    let response = send(&server.router, upload_request("", Some(PASSWORD), b"")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_file_upload() {
    let server = test_server(&[]).await;

    let body = multipart_body(&[
        ("password", None, PASSWORD),
        ("ttl", None, "1h"),
        ("file", Some("notes.md"), "# shopping\n- milk"),
    ]);
    let response = send(&server.router, multipart_request(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: CreateDropResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();

    let response = send(&server.router, request(Method::GET, &created.url, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/markdown");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.md\""
    );
    assert_eq!(body_bytes(response).await, b"# shopping\n- milk");
}

#[tokio::test]
async fn test_multipart_text_requires_password() {
    let server = test_server(&[]).await;

    let body = multipart_body(&[("text", None, "no password here")]);
    let response = send(&server.router, multipart_request(body)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = multipart_body(&[("password", None, PASSWORD), ("text", None, "pasted")]);
    let response = send(&server.router, multipart_request(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_multipart_rejects_two_payloads() {
    let server = test_server(&[]).await;

    let body = multipart_body(&[
        ("password", None, PASSWORD),
        ("text", None, "one"),
        ("file", Some("two.txt"), "two"),
    ]);
    let response = send(&server.router, multipart_request(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_wrong_password_wins_over_form_errors() {
    let server = test_server(&[("DROP_MAX_UPLOAD_BYTES", "16")]).await;

    let two_payloads = multipart_body(&[
        ("password", None, "wrong"),
        ("text", None, "one"),
        ("file", Some("two.txt"), "two"),
    ]);
    let no_payload = multipart_body(&[("password", None, "wrong"), ("ttl", None, "soon")]);
    let oversized = "x".repeat(128 * 1024);
    let oversized = multipart_body(&[("password", None, "wrong"), ("text", None, &oversized)]);
    let truncated = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\nwrong",
        BOUNDARY
    );

    for body in [two_payloads, no_payload, oversized, truncated] {
        let response = send(&server.router, multipart_request(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let mut invalid_utf8 = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\nwrong\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n",
        b = BOUNDARY
    )
    .into_bytes();
    invalid_utf8.extend_from_slice(&[0xff, 0xfe, 0xfd]);
    invalid_utf8.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/drop")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(invalid_utf8))
        .unwrap();
    let response = send(&server.router, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With the right password the same oversized form is a validation error
    let oversized = "x".repeat(128 * 1024);
    let body = multipart_body(&[("password", None, PASSWORD), ("text", None, &oversized)]);
    let response = send(&server.router, multipart_request(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_and_deletes_leave_no_orphans() {
    let server = test_server(&[]).await;

    let mut first = Vec::new();
    for i in 0..50 {
        first.push(upload(&server.router, "", format!("first {}", i).as_bytes()).await);
    }

    let mut tasks = Vec::new();
    for i in 0..50 {
        let router = server.router.clone();
        tasks.push(tokio::spawn(async move {
            let created = upload(&router, "", format!("second {}", i).as_bytes()).await;
            Some(created.url)
        }));
    }
    for created in &first {
        let router = server.router.clone();
        let url = created.url.clone();
        tasks.push(tokio::spawn(async move {
            let response = send(&router, request(Method::DELETE, &url, Some(PASSWORD))).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            None
        }));
    }

    let mut survivors = Vec::new();
    for task in tasks {
        if let Some(url) = task.await.unwrap() {
            survivors.push(url);
        }
    }
    assert_eq!(survivors.len(), 50);

    for created in &first {
        let response = send(&server.router, request(Method::GET, &created.url, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    for url in &survivors {
        let response = send(&server.router, request(Method::GET, url, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Every blob on disk belongs to a live row and vice versa
    let usage = server.ctx.drops.store().usage().await.unwrap();
    assert_eq!(usage.drops, 50);
    let blobs = server
        .ctx
        .drops
        .blobs()
        .list_older_than(SystemTime::now() + Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(blobs.len(), 50);
    for id in &blobs {
        assert!(server.ctx.drops.store().contains(id).await.unwrap());
    }
}

#[tokio::test]
async fn test_health_and_metrics() {
    let server = test_server(&[]).await;
    upload(&server.router, "", b"counted").await;

    let response = send(&server.router, request(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "healthy");

    let response = send(&server.router, request(Method::GET, "/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("drops_created_total"));
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let server = test_server(&[]).await;

    let response = send(&server.router, request(Method::GET, "/nowhere", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"], "NotFound");
}
