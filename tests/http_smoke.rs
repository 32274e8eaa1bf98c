mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::read_json;
use fastpubsub::app::{build_router, AppState};
use fastpubsub::config::Settings;
use fastpubsub::model::NewClient;
use fastpubsub::observability;
use fastpubsub::store::memory::InMemoryStore;
use fastpubsub::store::BrokerStore;
use http_helpers::{bearer_json_request, json_request};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> (axum::Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState {
        store: store.clone(),
        settings: Arc::new(Settings::default()),
        metrics: observability::metrics_handle(),
    };
    (build_router(state), store)
}

fn auth_app(secret_key: &str) -> (axum::Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let settings = Settings {
        auth_enabled: true,
        auth_secret_key: Some(secret_key.to_string()),
        ..Settings::default()
    };
    let state = AppState {
        store: store.clone(),
        settings: Arc::new(settings),
        metrics: observability::metrics_handle(),
    };
    (build_router(state), store)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

#[tokio::test]
async fn topics_crud_smoke() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "orders"})))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json(response).await;
    assert_eq!(payload["id"], "orders");

    // Duplicate id collides.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "orders"})))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Identifier grammar is enforced.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "not valid!"})))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app.clone().oneshot(get("/topics/orders")).await.expect("get");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/topics")).await.expect("list");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["data"].as_array().expect("data").len(), 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/topics/orders")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.clone().oneshot(get("/topics/orders")).await.expect("get");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscription_validation_and_conflicts() {
    let (app, _) = test_app();

    // Topic must exist first.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions",
            json!({"id": "s1", "topic_id": "missing"}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "orders"})))
        .await
        .expect("topic");
    assert_eq!(response.status(), StatusCode::CREATED);

    // Inverted backoff bounds are rejected.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions",
            json!({
                "id": "s1",
                "topic_id": "orders",
                "backoff_min_seconds": 120,
                "backoff_max_seconds": 60
            }),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Malformed filters are rejected.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions",
            json!({"id": "s1", "topic_id": "orders", "filter": {"country": "BR"}}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions",
            json!({"id": "s1", "topic_id": "orders", "filter": {"country": ["BR"]}}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json(response).await;
    // Defaults from configuration fill the unspecified policy fields.
    assert_eq!(payload["max_delivery_attempts"], 5);
    assert_eq!(payload["backoff_min_seconds"], 5);
    assert_eq!(payload["backoff_max_seconds"], 300);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions",
            json!({"id": "s1", "topic_id": "orders"}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn publish_validation() {
    let (app, _) = test_app();
    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "orders"})))
        .await
        .expect("topic");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics/orders/messages", json!([])))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/topics/orders/messages",
            json!([{"ok": true}, "not-an-object"]),
        ))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/topics/missing/messages",
            json!([{"ok": true}]),
        ))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/topics/orders/messages",
            json!([{"ok": true}]),
        ))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn fan_out_with_filters_reaches_matching_subscriptions() {
    let (app, _) = test_app();
    let response = app
        .clone()
        .oneshot(json_request("POST", "/topics", json!({"id": "orders"})))
        .await
        .expect("topic");
    assert_eq!(response.status(), StatusCode::CREATED);

    for (id, filter) in [
        ("a", json!(null)),
        ("b", json!({"country": ["BR"]})),
        ("c", json!({"country": ["US"]})),
    ] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/subscriptions",
                json!({"id": id, "topic_id": "orders", "filter": filter}),
            ))
            .await
            .expect("subscription");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/topics/orders/messages",
            json!([
                {"country": "BR", "x": 1},
                {"country": "US", "x": 2},
                {"country": "JP", "x": 3}
            ]),
        ))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for (id, expected) in [("a", 3), ("b", 1), ("c", 1)] {
        let response = app
            .clone()
            .oneshot(get(&format!("/subscriptions/{id}/metrics")))
            .await
            .expect("metrics");
        assert_eq!(response.status(), StatusCode::OK);
        let payload = read_json(response).await;
        assert_eq!(payload["available"], expected, "subscription {id}");
        assert_eq!(payload["delivered"], 0);
    }
}

#[tokio::test]
async fn consume_ack_flow_over_http() {
    let (app, _) = test_app();
    for request in [
        json_request("POST", "/topics", json!({"id": "orders"})),
        json_request(
            "POST",
            "/subscriptions",
            json!({"id": "s", "topic_id": "orders"}),
        ),
        json_request("POST", "/topics/orders/messages", json!([{"x": 1}])),
    ] {
        let response = app.clone().oneshot(request).await.expect("setup");
        assert!(response.status().is_success());
    }

    // batch_size outside [1, 100] is rejected before touching the store.
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=0"))
        .await
        .expect("consume");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=101"))
        .await
        .expect("consume");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // consumer_id is required.
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?batch_size=10"))
        .await
        .expect("consume");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=10"))
        .await
        .expect("consume");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    let data = payload["data"].as_array().expect("data");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["delivery_attempts"], 1);
    let message_id = data[0]["id"].as_str().expect("id").to_string();

    // The lease hides the row from a second pull.
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=10"))
        .await
        .expect("consume");
    let payload = read_json(response).await;
    assert!(payload["data"].as_array().expect("data").is_empty());

    // Acks from a non-owner are accepted but change nothing.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/s/acks?consumer_id=w2",
            json!([message_id]),
        ))
        .await
        .expect("ack");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/metrics"))
        .await
        .expect("metrics");
    let payload = read_json(response).await;
    assert_eq!(payload["delivered"], 1);
    assert_eq!(payload["acked"], 0);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/s/acks?consumer_id=w1",
            json!([message_id]),
        ))
        .await
        .expect("ack");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/metrics"))
        .await
        .expect("metrics");
    let payload = read_json(response).await;
    assert_eq!(payload["acked"], 1);
    assert_eq!(payload["delivered"], 0);
}

#[tokio::test]
async fn dlq_flow_over_http() {
    let (app, _) = test_app();
    for request in [
        json_request("POST", "/topics", json!({"id": "orders"})),
        json_request(
            "POST",
            "/subscriptions",
            json!({
                "id": "s",
                "topic_id": "orders",
                "max_delivery_attempts": 1,
                "backoff_min_seconds": 0,
                "backoff_max_seconds": 0
            }),
        ),
        json_request("POST", "/topics/orders/messages", json!([{"x": 1}])),
    ] {
        let response = app.clone().oneshot(request).await.expect("setup");
        assert!(response.status().is_success());
    }

    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=1"))
        .await
        .expect("consume");
    let payload = read_json(response).await;
    let message_id = payload["data"][0]["id"].as_str().expect("id").to_string();

    // max_delivery_attempts=1: the first nack dead-letters the message.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/s/nacks?consumer_id=w1",
            json!([message_id]),
        ))
        .await
        .expect("nack");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/dlq"))
        .await
        .expect("dlq");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["data"].as_array().expect("data").len(), 1);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/s/dlq/reprocess",
            json!([message_id]),
        ))
        .await
        .expect("reprocess");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Reprocessed rows come back with a reset attempt counter.
    let response = app
        .clone()
        .oneshot(get("/subscriptions/s/messages?consumer_id=w1&batch_size=1"))
        .await
        .expect("consume");
    let payload = read_json(response).await;
    let data = payload["data"].as_array().expect("data");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["delivery_attempts"], 1);
}

#[tokio::test]
async fn monitoring_endpoints() {
    let (app, _) = test_app();

    let response = app.clone().oneshot(get("/liveness")).await.expect("liveness");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "alive");

    let response = app
        .clone()
        .oneshot(get("/readiness"))
        .await
        .expect("readiness");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "ready");

    let response = app.clone().oneshot(get("/metrics")).await.expect("metrics");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_gates_protected_routes() {
    let (app, store) = auth_app("smoke-test-key");

    // No token: 401.
    let response = app.clone().oneshot(get("/topics")).await.expect("list");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let created = store
        .create_client(NewClient {
            name: "publisher".to_string(),
            scopes: "topics:create topics:read topics:publish".to_string(),
            is_active: true,
        })
        .await
        .expect("client");

    // Wrong secret: 401.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/oauth/token",
            json!({"client_id": created.id, "client_secret": "wrong"}),
        ))
        .await
        .expect("token");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/oauth/token",
            json!({"client_id": created.id, "client_secret": created.secret}),
        ))
        .await
        .expect("token");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json(response).await;
    assert_eq!(payload["token_type"], "Bearer");
    let token = payload["access_token"].as_str().expect("token").to_string();

    // Granted scope passes.
    let response = app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/topics",
            &token,
            json!({"id": "orders"}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);

    // Missing scope is forbidden, not unauthorized.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/topics/orders")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Updating the client bumps token_version and revokes the token.
    store
        .update_client(
            created.id,
            NewClient {
                name: "publisher".to_string(),
                scopes: "topics:read".to_string(),
                is_active: true,
            },
        )
        .await
        .expect("update");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/topics")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("list");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Monitoring stays reachable without a token.
    let response = app.clone().oneshot(get("/liveness")).await.expect("liveness");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn disabled_client_cannot_get_token() {
    let (app, store) = auth_app("smoke-test-key");
    let created = store
        .create_client(NewClient {
            name: "retired".to_string(),
            scopes: "*".to_string(),
            is_active: false,
        })
        .await
        .expect("client");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/oauth/token",
            json!({"client_id": created.id, "client_secret": created.secret}),
        ))
        .await
        .expect("token");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
