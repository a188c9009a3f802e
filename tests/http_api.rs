//! Router tests: requests go through the full middleware stack via `oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, Harness};
use incubator::config::Config;
use incubator::models::relation::Relation;
use incubator::store::ProjectStore;
use incubator::{api, AppState};

const ADMIN_KEY: &str = "test-admin-key-123456";

fn router(h: &Harness) -> Router {
    let config = Config {
        port: 0,
        database_url: "postgres://unused".into(),
        admin_key: ADMIN_KEY.into(),
        public_base_url: common::BASE_URL.into(),
        mail: None,
        redelivery_interval_secs: 0,
    };
    api::app(Arc::new(AppState {
        engine: h.engine.clone(),
        config,
    }))
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn public_post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_management_api_requires_admin_key() {
    let h = harness();
    let project = h.store.add_project("P").await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/projects/{}/invitations", project.id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"relation": "members", "emails": ["a@x.com"]}).to_string()))
        .unwrap();
    let (status, body) = send(router(&h), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], "unauthorized");

    let req = Request::builder()
        .uri(format!("/api/v1/projects/{}/approvals", project.id))
        .header("authorization", "Bearer wrong-key-wrong-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router(&h), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invite_then_redeem_over_http() {
    let h = harness();
    let project = h.store.add_project("Smart Campus").await;
    h.store.add_user("a@x.com", "A", "X").await;

    let (status, body) = send(
        router(&h),
        admin_post(
            &format!("/api/v1/projects/{}/invitations", project.id),
            json!({"relation": "members", "emails": ["a@x.com"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(created[0]["status"], "pending");
    assert_eq!(created[0]["relation"], "members");
    assert_eq!(created[0]["notified"], true);
    assert!(created[0].get("token").is_none());

    let token = h.notifier.token_for("a@x.com");

    let (status, body) = send(router(&h), get(&format!("/approval-status/details?token={}", token))).await;
    assert_eq!(status, StatusCode::OK);
    let details: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(details["projectName"], "Smart Campus");
    assert_eq!(details["userEmail"], "a@x.com");
    assert_eq!(details["userName"], "A X");
    assert!(details.get("project_name").is_none());

    let (status, body) = send(
        router(&h),
        public_post(&format!("/approval-status/approve-member?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["message"], "members approval successful.");

    // Second use looks exactly like an unknown token.
    let (status, body) = send(
        router(&h),
        public_post(&format!("/approval-status/approve-member?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], "invalid_token");

    let members = h
        .store
        .relation_members(project.id, Relation::Members)
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
}

#[tokio::test]
async fn test_wrong_relation_route_is_bad_request() {
    let h = harness();
    let project = h.store.add_project("P").await;
    h.store.add_user("a@x.com", "A", "X").await;
    h.engine
        .generate_approval_requests(&common::emails(&["a@x.com"]), project.id, "encadrants")
        .await
        .unwrap();
    let token = h.notifier.token_for("a@x.com");

    let (status, body) = send(
        router(&h),
        public_post(&format!("/approval-status/approve-jury?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["error"]["code"], "relation_mismatch");

    let (status, _) = send(
        router(&h),
        public_post(&format!("/approval-status/approve-encadrant?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_token_is_bad_request() {
    let h = harness();
    let (status, _) = send(router(&h), public_post("/approval-status/approve")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(router(&h), get("/approval-status/approve-page")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Token is required"));
}

#[tokio::test]
async fn test_approve_page_renders_and_sets_security_headers() {
    let h = harness();
    let project = h.store.add_project("<b>Lab</b>").await;
    h.store.add_user("a@x.com", "A", "X").await;
    h.engine
        .generate_approval_requests(&common::emails(&["a@x.com"]), project.id, "members")
        .await
        .unwrap();
    let token = h.notifier.token_for("a@x.com");

    let resp = router(&h)
        .oneshot(get(&format!("/approval-status/approve-page?token={}", token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["referrer-policy"], "no-referrer");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert!(resp.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("&lt;b&gt;Lab&lt;/b&gt;"));
    assert!(html.contains(&token));

    let (status, html) = send(router(&h), get("/approval-status/approve-page?token=nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(html.contains("invalid or has expired"));
}

#[tokio::test]
async fn test_reject_endpoint_then_list_by_status() {
    let h = harness();
    let project = h.store.add_project("P").await;
    h.store.add_user("a@x.com", "A", "X").await;
    h.engine
        .generate_approval_requests(&common::emails(&["a@x.com"]), project.id, "members")
        .await
        .unwrap();
    let token = h.notifier.token_for("a@x.com");

    let (status, body) = send(router(&h), public_post(&format!("/approval-status/reject?token={}", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("invitation declined"));

    let req = Request::builder()
        .uri(format!("/api/v1/projects/{}/approvals?status=rejected", project.id))
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router(&h), req).await;
    assert_eq!(status, StatusCode::OK);
    let rows: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["status"], "rejected");

    let req = Request::builder()
        .uri(format!("/api/v1/projects/{}/approvals?status=bogus", project.id))
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router(&h), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attach_and_list_relation() {
    let h = harness();
    let project = h.store.add_project("P").await;
    h.store.add_user("owner@x.com", "O", "W").await;
    let uri = format!("/api/v1/projects/{}/relations/owners", project.id);

    let (status, _) = send(router(&h), admin_post(&uri, json!({"user": "owner@x.com"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(router(&h), admin_post(&uri, json!({"user": "owner@x.com"}))).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["created"], false);

    let req = Request::builder()
        .uri(&uri)
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router(&h), req).await;
    assert_eq!(status, StatusCode::OK);
    let users: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(users[0]["email"], "owner@x.com");
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let h = harness();
    let (status, body) = send(
        router(&h),
        admin_post(
            &format!("/api/v1/projects/{}/invitations", uuid::Uuid::new_v4()),
            json!({"relation": "members", "emails": ["a@x.com"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("project_not_found"));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = harness();
    let (status, body) = send(router(&h), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = send(router(&h), get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);

    let project = h.store.add_project("P").await;
    h.store.add_user("a@x.com", "A", "X").await;
    h.engine
        .generate_approval_requests(&common::emails(&["a@x.com"]), project.id, "members")
        .await
        .unwrap();
    let (status, body) = send(router(&h), get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("incubator_invitations_total{relation=\"members\"} 1"));
}
