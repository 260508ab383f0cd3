//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::time::Duration;
use tally_core::ai::{CircuitBreaker, MockBackend};
use tower::ServiceExt;

fn test_state(config: ServerConfig) -> Arc<AppState> {
    let db = Database::in_memory().unwrap();
    let rules = RuleTable::embedded().unwrap();
    let ai = AiFallback::new(
        AIClient::Mock(MockBackend::new()),
        Duration::from_millis(500),
        CircuitBreaker::new(3, Duration::from_secs(60)),
    );
    Arc::new(AppState::new(
        db,
        config,
        EngineConfig::default(),
        rules,
        Some(ai),
    ))
}

fn setup_test_app() -> (Router, Arc<AppState>) {
    let state = test_state(ServerConfig {
        require_auth: false,
        ..Default::default()
    });
    (create_router_with_state(state.clone()), state)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn sync_batch() -> serde_json::Value {
    serde_json::json!({
        "transactions": [
            {"date": "2024-03-01", "description": "GUSTO PAYROLL 0301", "amount": -8200.0, "external_id": "a1"},
            {"date": "2024-03-02", "description": "STARBUCKS #4821 SEATTLE WA", "amount": -5.75, "external_id": "a2"},
            {"date": "2024-03-03", "description": "CHECKCARD 0303 SHELL OIL 57444", "amount": -48.10, "external_id": "a3"},
            {"date": "2024-03-04", "description": "QWERTY HOLDINGS", "amount": -99.0, "external_id": "a4"}
        ]
    })
}

/// Ingest the standard batch and return the inserted transactions
async fn ingest(app: &Router) -> Vec<serde_json::Value> {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/users/1/transactions", sync_batch()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    json["categorized"].as_array().unwrap().clone()
}

fn find<'a>(txs: &'a [serde_json::Value], description: &str) -> &'a serde_json::Value {
    txs.iter()
        .find(|t| t["description"] == description)
        .unwrap()
}

// ========== Ingest + categorization ==========

#[tokio::test]
async fn test_ingest_categorizes_every_record() {
    let (app, _) = setup_test_app();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/users/1/transactions", sync_batch()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["inserted"], 4);
    assert_eq!(json["skipped"], 0);
    assert_eq!(json["failed"], 0);

    let txs = json["categorized"].as_array().unwrap();
    let payroll = find(txs, "GUSTO PAYROLL 0301");
    assert_eq!(payroll["category"], "Payroll");
    assert_eq!(payroll["categorization_method"], "rule_based");
    assert_eq!(payroll["needs_review"], false);

    let coffee = find(txs, "STARBUCKS #4821 SEATTLE WA");
    assert_eq!(coffee["category"], "Meals & Entertainment");
    assert_eq!(coffee["categorization_method"], "ai_fallback");
    assert_eq!(coffee["needs_review"], true);

    // The mock answers an unknown label, so the default outcome applies
    let unknown = find(txs, "QWERTY HOLDINGS");
    assert_eq!(unknown["category"], "Other");
    assert!(unknown["categorization_method"].is_null());
    assert_eq!(unknown["confidence"], 0.0);
    assert_eq!(unknown["needs_review"], true);
}

#[tokio::test]
async fn test_reingest_is_skipped() {
    let (app, _) = setup_test_app();
    ingest(&app).await;

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/users/1/transactions", sync_batch()))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["inserted"], 0);
    assert_eq!(json["skipped"], 4);

    let response = app
        .oneshot(get("/api/users/1/transactions"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 4);
}

#[tokio::test]
async fn test_ingest_rejects_malformed_body() {
    let (app, _) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/users/1/transactions",
            serde_json::json!({"transactions": [{"date": "yesterday", "description": "X", "amount": 1.0}]}),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_list_transactions_pagination() {
    let (app, _) = setup_test_app();
    ingest(&app).await;

    let response = app
        .oneshot(get("/api/users/1/transactions?limit=2&offset=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(json["limit"], 2);
    assert_eq!(json["offset"], 1);
    assert_eq!(json["total"], 4);
}

#[tokio::test]
async fn test_pagination_limit_is_clamped() {
    let (app, _) = setup_test_app();

    let response = app
        .oneshot(get("/api/users/1/transactions?limit=999999"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["limit"], MAX_PAGE_LIMIT);
}

#[tokio::test]
async fn test_transactions_are_scoped_per_user() {
    let (app, _) = setup_test_app();
    let txs = ingest(&app).await;
    let id = txs[0]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/users/1/transactions/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/api/users/2/transactions/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_review_queue() {
    let (app, _) = setup_test_app();
    ingest(&app).await;

    let response = app.oneshot(get("/api/users/1/review")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let queue = json.as_array().unwrap();
    // Starbucks (low-confidence AI) and the unknown merchant
    assert_eq!(queue.len(), 2);
    assert!(queue.iter().all(|t| t["needs_review"] == true));
}

// ========== Corrections ==========

#[tokio::test]
async fn test_correction_teaches_learned_tier() {
    let (app, state) = setup_test_app();
    let txs = ingest(&app).await;
    let id = find(&txs, "STARBUCKS #4821 SEATTLE WA")["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/users/1/transactions/{}/category", id),
            serde_json::json!({"category": "Travel"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["transaction"]["category"], "Travel");
    assert_eq!(json["transaction"]["categorization_method"], "learned_pattern");
    assert_eq!(json["transaction"]["confidence"], 1.0);
    assert_eq!(json["transaction"]["needs_review"], false);
    assert!(json.get("job").is_none());

    // Another store of the chain resolves through the learned pattern
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/users/1/categorize/preview",
            serde_json::json!({"description": "STARBUCKS #9931 SEATTLE WA"}),
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["category"], "Travel");
    assert_eq!(json["method"], "learned_pattern");
    assert_eq!(json["needs_review"], false);

    let response = app.oneshot(get("/api/users/1/patterns")).await.unwrap();
    let json = get_body_json(response).await;
    let patterns = json.as_array().unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0]["merchant_token"], "starbucks seattle wa");

    // Corrections are audited
    let audit = state.db.list_audit_log(10).unwrap();
    assert!(audit.iter().any(|e| e.action == "correct_category"));
}

#[tokio::test]
async fn test_correction_accepts_slug() {
    let (app, _) = setup_test_app();
    let txs = ingest(&app).await;
    let id = find(&txs, "QWERTY HOLDINGS")["id"].as_i64().unwrap();

    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/users/1/transactions/{}/category", id),
            serde_json::json!({"category": "office_supplies"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["transaction"]["category"], "Office Supplies");
}

#[tokio::test]
async fn test_correction_invalid_category() {
    let (app, state) = setup_test_app();
    let txs = ingest(&app).await;
    let id = txs[0]["id"].as_i64().unwrap();

    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/users/1/transactions/{}/category", id),
            serde_json::json!({"category": "Snacks"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Snacks"));
    assert!(state.db.list_learned_patterns(1).unwrap().is_empty());
}

#[tokio::test]
async fn test_correction_unknown_transaction() {
    let (app, _) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/users/1/transactions/9999/category",
            serde_json::json!({"category": "Travel"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_pattern() {
    let (app, state) = setup_test_app();
    let txs = ingest(&app).await;
    let id = find(&txs, "STARBUCKS #4821 SEATTLE WA")["id"].as_i64().unwrap();
    tally_core::correct_category(&state.db, 1, id, "Travel").unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/users/1/patterns/starbucks%20seattle%20wa")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.db.list_learned_patterns(1).unwrap().is_empty());

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/users/1/patterns/starbucks%20seattle%20wa")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Bulk re-categorization ==========

async fn wait_for_job(app: &Router, id: i64) -> serde_json::Value {
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        let json = get_body_json(response).await;
        if json["status"] != "pending" && json["status"] != "running" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test]
async fn test_recategorize_job_applies_learned_patterns() {
    let (app, state) = setup_test_app();
    let txs = ingest(&app).await;
    let id = find(&txs, "QWERTY HOLDINGS")["id"].as_i64().unwrap();

    // A second transaction with the same token, ingested before the correction
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/users/1/transactions",
            serde_json::json!({"transactions": [
                {"date": "2024-04-04", "description": "QWERTY HOLDINGS", "amount": -120.0, "external_id": "b1"}
            ]}),
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let other_id = json["categorized"][0]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/users/1/transactions/{}/category", id),
            serde_json::json!({"category": "Contractors", "recategorize": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let job_id = json["job"]["id"].as_i64().unwrap();

    let job = wait_for_job(&app, job_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["processed"], 5);

    let tx = state.db.get_transaction(1, other_id).unwrap().unwrap();
    assert_eq!(tx.category, Some(tally_core::Category::Contractors));
    assert!(!tx.needs_review);
}

#[tokio::test]
async fn test_start_recategorize_restarts_active_job() {
    let (app, state) = setup_test_app();
    ingest(&app).await;

    // Pre-existing active job: starting again hands back the same job, rewound
    let existing = tally_core::recategorize::start_recategorize(&state.db, 1).unwrap();
    state.claim_job(existing.id);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/users/1/recategorize")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["id"], existing.id);
    assert_eq!(json["restart_requested"], true);

    let response = app.oneshot(get("/api/users/1/jobs")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_and_resume_job_conflicts() {
    let (app, state) = setup_test_app();
    ingest(&app).await;

    let job = tally_core::recategorize::start_recategorize(&state.db, 1).unwrap();
    // Keep background runners away from this job
    state.claim_job(job.id);

    // Resuming an active job is a no-op
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{}/resume", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{}/cancel", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["cancel_requested"], true);

    state
        .db
        .finish_job(job.id, tally_core::JobStatus::Completed, None)
        .unwrap();

    // Finished jobs can be neither cancelled nor resumed
    for action in ["cancel", "resume"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/jobs/{}/{}", job.id, action))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

#[tokio::test]
async fn test_get_job_not_found() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/jobs/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Reference data ==========

#[tokio::test]
async fn test_list_categories() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/categories")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let categories = json.as_array().unwrap();
    assert_eq!(categories.len(), tally_core::Category::all().len());
    assert!(categories
        .iter()
        .any(|c| c["label"] == "Vehicle & Fuel" && c["slug"] == "vehicle_fuel"));
}

#[tokio::test]
async fn test_rules_listing_and_testing() {
    let (app, state) = setup_test_app();

    let response = app.clone().oneshot(get("/api/rules")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), state.rules.len());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/rules/test",
            serde_json::json!({"description": "CHECKCARD 0412 SHELL OIL 57444 XXXX1234"}),
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["merchant_token"], "shell oil");
    assert_eq!(json["matches"][0]["category"], "Vehicle & Fuel");
}

#[tokio::test]
async fn test_preview_does_not_persist() {
    let (app, state) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/users/1/categorize/preview",
            serde_json::json!({"description": "GUSTO PAYROLL 0301"}),
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["category"], "Payroll");
    assert_eq!(json["rule"], "payroll_providers");
    assert_eq!(state.db.count_transactions(1).unwrap(), 0);
}

#[tokio::test]
async fn test_health() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["database"], true);
    assert_eq!(json["review_threshold"], 0.75);
    assert_eq!(json["ai"]["backend"], "mock");
    assert_eq!(json["ai"]["breaker"], "closed");
}

// ========== Security ==========

#[tokio::test]
async fn test_auth_required_by_default() {
    let state = test_state(ServerConfig {
        require_auth: true,
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    });
    let app = create_router_with_state(state);

    let response = app
        .clone()
        .oneshot(get("/api/categories"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/categories")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/categories")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_security_headers() {
    let (app, _) = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
}

#[test]
fn test_parse_list() {
    assert_eq!(
        parse_list(" a, b ,,c "),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert!(parse_list("").is_empty());
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["abc123".to_string()];
    assert!(validate_api_key("abc123", &keys));
    assert!(!validate_api_key("abc124", &keys));
    assert!(!validate_api_key("abc", &keys));
    assert!(!validate_api_key("abc123", &[]));
}
