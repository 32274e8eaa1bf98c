//! End-to-end dispatch scenarios exercised through the store trait.
use fastpubsub::model::NewSubscription;
use fastpubsub::store::memory::InMemoryStore;
use fastpubsub::store::BrokerStore;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

fn subscription(id: &str, topic: &str, filter: Option<serde_json::Value>) -> NewSubscription {
    NewSubscription {
        id: id.to_string(),
        topic_id: topic.to_string(),
        filter,
        max_delivery_attempts: 3,
        backoff_min_seconds: 0,
        backoff_max_seconds: 0,
    }
}

#[tokio::test]
async fn fan_out_inserts_one_row_per_matching_subscription() {
    let store = InMemoryStore::new();
    store.create_topic("orders").await.expect("topic");
    store
        .create_subscription(subscription("a", "orders", None))
        .await
        .expect("a");
    store
        .create_subscription(subscription(
            "b",
            "orders",
            Some(json!({"country": ["BR"]})),
        ))
        .await
        .expect("b");
    store
        .create_subscription(subscription(
            "c",
            "orders",
            Some(json!({"country": ["US"]})),
        ))
        .await
        .expect("c");

    let inserted = store
        .publish(
            "orders",
            &[
                json!({"country": "BR", "x": 1}),
                json!({"country": "US", "x": 2}),
                json!({"country": "JP", "x": 3}),
            ],
        )
        .await
        .expect("publish");
    assert_eq!(inserted, 5);

    for (id, expected) in [("a", 3), ("b", 1), ("c", 1)] {
        let metrics = store.subscription_metrics(id).await.expect("metrics");
        assert_eq!(metrics.available, expected, "subscription {id}");
    }
}

#[tokio::test]
async fn publish_without_subscriptions_is_accepted_and_discarded() {
    let store = InMemoryStore::new();
    store.create_topic("void").await.expect("topic");
    let inserted = store
        .publish("void", &[json!({"x": 1})])
        .await
        .expect("publish");
    assert_eq!(inserted, 0);
}

#[tokio::test]
async fn payload_survives_delivery_unchanged() {
    let store = InMemoryStore::new();
    store.create_topic("orders").await.expect("topic");
    store
        .create_subscription(subscription("s", "orders", None))
        .await
        .expect("s");

    let payload = json!({"country": "BR", "nested": {"a": [1, 2, 3]}, "flag": true});
    store.publish("orders", &[payload.clone()]).await.expect("publish");

    let batch = store.consume("s", "w1", 1).await.expect("consume");
    assert_eq!(batch[0].payload, payload);

    // Redelivery after nack returns the identical payload.
    store.nack("s", "w1", &[batch[0].id]).await.expect("nack");
    let batch = store.consume("s", "w1", 1).await.expect("consume");
    assert_eq!(batch[0].payload, payload);
}

#[tokio::test]
async fn nack_until_exhaustion_then_reprocess() {
    let store = InMemoryStore::new();
    store.create_topic("orders").await.expect("topic");
    store
        .create_subscription(subscription("s", "orders", None))
        .await
        .expect("s");
    store.publish("orders", &[json!({"x": 1})]).await.expect("publish");

    // Zero backoff lets the retry loop run without waiting: three leases,
    // three nacks, then the DLQ.
    let mut id = None;
    for attempt in 1..=3 {
        let batch = store.consume("s", "w1", 1).await.expect("consume");
        assert_eq!(batch.len(), 1, "attempt {attempt}");
        assert_eq!(batch[0].delivery_attempts, attempt);
        id = Some(batch[0].id);
        store.nack("s", "w1", &[batch[0].id]).await.expect("nack");
    }
    let id = id.expect("message id");

    let metrics = store.subscription_metrics("s").await.expect("metrics");
    assert_eq!(metrics.dlq, 1);
    assert!(store.consume("s", "w1", 1).await.expect("consume").is_empty());

    store.reprocess_dlq("s", &[id]).await.expect("reprocess");
    let batch = store.consume("s", "w1", 1).await.expect("consume");
    assert_eq!(batch[0].delivery_attempts, 1);
}

#[tokio::test]
async fn concurrent_consumers_never_share_a_message() {
    let store = Arc::new(InMemoryStore::new());
    store.create_topic("orders").await.expect("topic");
    store
        .create_subscription(subscription("s", "orders", None))
        .await
        .expect("s");

    let payloads: Vec<serde_json::Value> = (0..80).map(|n| json!({"n": n})).collect();
    store.publish("orders", &payloads).await.expect("publish");

    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.consume("s", "w1", 50).await.expect("consume") })
    };
    let second = {
        let store = store.clone();
        tokio::spawn(async move { store.consume("s", "w2", 50).await.expect("consume") })
    };
    let first = first.await.expect("join");
    let second = second.await.expect("join");

    assert!(!first.is_empty() && first.len() <= 50);
    assert!(!second.is_empty() && second.len() <= 50);
    assert_eq!(first.len() + second.len(), 80);

    let mut seen: HashSet<Uuid> = HashSet::new();
    for message in first.iter().chain(second.iter()) {
        assert!(seen.insert(message.id), "message leased twice: {}", message.id);
    }
}

#[tokio::test]
async fn subscription_delete_drops_its_messages_only() {
    let store = InMemoryStore::new();
    store.create_topic("orders").await.expect("topic");
    store
        .create_subscription(subscription("keep", "orders", None))
        .await
        .expect("keep");
    store
        .create_subscription(subscription("drop", "orders", None))
        .await
        .expect("drop");
    store.publish("orders", &[json!({"x": 1})]).await.expect("publish");

    store.delete_subscription("drop").await.expect("delete");

    let kept = store.subscription_metrics("keep").await.expect("metrics");
    assert_eq!(kept.available, 1);
    let dropped = store.subscription_metrics("drop").await.expect("metrics");
    assert_eq!(dropped.available, 0);
}
