use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use signup::{
    build_app,
    config::AppConfig,
    registration::{
        repo::{Directory, DirectoryError},
        repo_types::Identity,
    },
    AppState,
};
use tower::ServiceExt;

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl TestResponse {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

async fn send(app: &Router, req: Request<Body>) -> TestResponse {
    let res = app.clone().oneshot(req).await.expect("infallible");
    let status = res.status();
    let headers = res.headers().clone();
    let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

fn json_request(path: &str, body: Value) -> Request<Body> {
    Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn post(app: &Router, path: &str, body: Value) -> TestResponse {
    send(app, json_request(path, body)).await
}

fn app() -> Router {
    build_app(AppState::fake())
}

fn app_with(config: AppConfig) -> Router {
    build_app(AppState::fake_with(config))
}

fn new_user() -> Value {
    json!({ "username": "newuser1", "email": "a@b.com", "password": "longenough" })
}

#[tokio::test]
async fn availability_reflects_directory() {
    let app = app();

    let res = post(&app, "/validate-username", json!({ "username": "newuser1" })).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json(), json!({ "available": true }));

    assert_eq!(post(&app, "/submit-form", new_user()).await.status, StatusCode::CREATED);

    for candidate in ["newuser1", "NEWUSER1", "NewUser1"] {
        let res = post(&app, "/validate-username", json!({ "username": candidate })).await;
        assert_eq!(res.json(), json!({ "available": false }), "{candidate}");
    }
}

#[tokio::test]
async fn seeded_username_is_unavailable() {
    let res = post(&app(), "/validate-username", json!({ "username": "ExistingUser" })).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["available"], false);
}

#[tokio::test]
async fn availability_requires_username() {
    let app = app();
    let expected = json!({ "available": false, "message": "Username is required." });

    for body in [json!({}), json!({ "username": "" }), json!({ "username": "   " }), json!({ "username": 42 })] {
        let res = post(&app, "/validate-username", body.clone()).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(res.json(), expected);
    }

    let res = send(&app, Request::post("/validate-username").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), expected);
}

#[tokio::test]
async fn invalid_submission_lists_every_error() {
    let res = post(
        &app(),
        "/submit-form",
        json!({ "username": "ab", "email": "bad", "password": "short" }),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let body = res.json();
    assert_eq!(body["success"], false);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0], json!({ "field": "username", "message": "Username must be at least 3 characters long." }));
    assert_eq!(errors[1], json!({ "field": "email", "message": "Please provide a valid email address." }));
    assert_eq!(errors[2], json!({ "field": "password", "message": "Password must be at least 8 characters long." }));
}

#[tokio::test]
async fn single_rule_failures_cite_their_rule() {
    let app = app();
    let cases = [
        (json!({ "username": " x ", "email": "a@b.com", "password": "longenough" }), "username", "3 characters"),
        (json!({ "username": "someone", "email": "a@b", "password": "longenough" }), "email", "valid email"),
        (json!({ "username": "someone", "email": "a@b.com", "password": "1234567" }), "password", "8 characters"),
    ];
    for (body, field, fragment) in cases {
        let res = post(&app, "/submit-form", body).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let errors = res.json()["errors"].as_array().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["field"], field);
        assert!(errors[0]["message"].as_str().unwrap().contains(fragment));
    }
}

#[tokio::test]
async fn successful_registration_hides_password() {
    let app = app();
    let res = post(&app, "/submit-form", new_user()).await;
    assert_eq!(res.status, StatusCode::CREATED);

    let body = res.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Registration successful!");
    let user = &body["user"];
    assert_eq!(user["username"], "newuser1");
    assert_eq!(user["email"], "a@b.com");
    assert!(user["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(user["registeredAt"].as_str().is_some());
    assert!(user.get("password").is_none());
    assert!(!res.text().contains("longenough"));
    assert!(!res.text().contains("$argon2"));
}

#[tokio::test]
async fn duplicate_submission_is_taken() {
    let app = app();
    assert_eq!(post(&app, "/submit-form", new_user()).await.status, StatusCode::CREATED);

    let res = post(&app, "/submit-form", new_user()).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json()["errors"],
        json!([{ "field": "username", "message": "Username is already taken." }])
    );
}

#[tokio::test]
async fn email_is_normalized_before_storage() {
    let res = post(
        &app(),
        "/submit-form",
        json!({ "username": "mixedcase", "email": "  Someone@Example.COM ", "password": "longenough" }),
    )
    .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.json()["user"]["email"], "someone@example.com");
}

#[tokio::test]
async fn only_allow_listed_extra_fields_are_stored() {
    let res = post(
        &app(),
        "/submit-form",
        json!({
            "username": "extras",
            "email": "x@y.org",
            "password": "longenough",
            "firstName": "Ada",
            "isAdmin": true,
            "id": "chosen-by-client",
            "registeredAt": "1970-01-01T00:00:00Z",
        }),
    )
    .await;
    assert_eq!(res.status, StatusCode::CREATED);

    let user = res.json()["user"].clone();
    assert_eq!(user["firstName"], "Ada");
    assert!(user.get("isAdmin").is_none());
    assert_ne!(user["id"], "chosen-by-client");
    assert_ne!(user["registeredAt"], "1970-01-01T00:00:00Z");
}

#[tokio::test]
async fn malformed_submission_is_a_validation_error() {
    let app = app();
    let bodies = [
        Request::post("/submit-form").body(Body::from("not json")).unwrap(),
        json_request("/submit-form", json!({ "username": ["array"], "email": "a@b.com", "password": "longenough" })),
    ];
    for req in bodies {
        let res = send(&app, req).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let body = res.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["errors"][0]["field"], "body");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_have_one_winner() {
    let app = app();
    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let app = app.clone();
            let username = if i % 2 == 0 { "racer" } else { "Racer" };
            tokio::spawn(async move {
                post(
                    &app,
                    "/submit-form",
                    json!({ "username": username, "email": format!("r{i}@example.com"), "password": "longenough" }),
                )
                .await
            })
        })
        .collect();

    let mut created = 0;
    let mut taken = 0;
    for attempt in attempts {
        let res = attempt.await.unwrap();
        match res.status {
            StatusCode::CREATED => created += 1,
            StatusCode::BAD_REQUEST => {
                assert_eq!(res.json()["errors"][0]["message"], "Username is already taken.");
                taken += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(taken, 7);
}

#[tokio::test]
async fn rate_limit_rejects_over_quota() {
    let mut config = AppConfig::default();
    config.rate_limit.max_requests = 3;
    let app = app_with(config);

    for expected_remaining in ["2", "1", "0"] {
        let res = post(&app, "/validate-username", json!({ "username": "someone" })).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.headers["ratelimit-limit"], "3");
        assert_eq!(res.headers["ratelimit-remaining"], expected_remaining);
        assert_eq!(res.headers["ratelimit-policy"], "3;w=900");
    }

    let res = post(&app, "/submit-form", new_user()).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.text(), "Too many requests, please try again later.");
    assert!(res.headers.contains_key(header::RETRY_AFTER));
    assert_eq!(res.headers["ratelimit-remaining"], "0");
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn rate_limit_is_per_client_behind_trusted_proxy() {
    let mut config = AppConfig::default();
    config.rate_limit.max_requests = 1;
    config.rate_limit.trust_proxy = true;
    let app = app_with(config);

    let from = |ip: &str| {
        Request::post("/validate-username")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(json!({ "username": "someone" }).to_string()))
            .unwrap()
    };

    assert_eq!(send(&app, from("198.51.100.1")).await.status, StatusCode::OK);
    assert_eq!(send(&app, from("198.51.100.2")).await.status, StatusCode::OK);
    assert_eq!(send(&app, from("198.51.100.1")).await.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn routes_honour_mount_prefix() {
    let mut config = AppConfig::default();
    config.api_prefix = "/api".into();
    let app = app_with(config);

    let res = post(&app, "/api/validate-username", json!({ "username": "someone" })).await;
    assert_eq!(res.status, StatusCode::OK);
    let res = post(&app, "/validate-username", json!({ "username": "someone" })).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn responses_carry_security_and_cors_headers() {
    let app = app();
    let req = Request::get("/health")
        .header(header::ORIGIN, "https://frontend.example")
        .body(Body::empty())
        .unwrap();
    let res = send(&app, req).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.text(), "ok");
    assert_eq!(res.headers["access-control-allow-origin"], "*");
    assert_eq!(res.headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(res.headers["strict-transport-security"], "max-age=15552000; includeSubDomains");
    assert!(res.headers.contains_key("content-security-policy"));
}

#[tokio::test]
async fn preflight_is_answered() {
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/submit-form")
        .header(header::ORIGIN, "https://frontend.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let res = send(&app(), req).await;
    assert!(res.status.is_success());
    assert!(res.headers.contains_key("access-control-allow-methods"));
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
    assert!(res.headers.contains_key("content-security-policy"));
}

struct BrokenDirectory;

#[async_trait]
impl Directory for BrokenDirectory {
    async fn get(&self, _username: &str) -> Result<Option<Identity>, DirectoryError> {
        Err(DirectoryError::Backend(anyhow::anyhow!("connection refused to db-primary:5432")))
    }

    async fn contains(&self, _username: &str) -> Result<bool, DirectoryError> {
        Err(DirectoryError::Backend(anyhow::anyhow!("connection refused to db-primary:5432")))
    }

    async fn insert_if_absent(&self, _identity: Identity) -> Result<Identity, DirectoryError> {
        Err(DirectoryError::Backend(anyhow::anyhow!("connection refused to db-primary:5432")))
    }

    async fn count(&self) -> Result<usize, DirectoryError> {
        Err(DirectoryError::Backend(anyhow::anyhow!("connection refused to db-primary:5432")))
    }
}

#[tokio::test]
async fn directory_failure_returns_generic_error() {
    let state = AppState::fake();
    let state = AppState::from_parts(state.config.clone(), Arc::new(BrokenDirectory)).unwrap();
    let app = build_app(state);
    let expected = json!({ "success": false, "message": "An internal server error occurred." });

    let responses = [
        post(&app, "/submit-form", new_user()).await,
        post(&app, "/validate-username", json!({ "username": "someone" })).await,
    ];
    for res in responses {
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.json(), expected);
        assert!(!res.text().contains("db-primary"));
        assert!(!res.text().contains("directory access failed"));
    }
}
