//! Storage backends for the broker.
//!
//! The [`BrokerStore`] trait is the seam between the HTTP façade and the
//! dispatch engine. Two implementations exist:
//! - [`postgres::PostgresStore`]: the production backend; every operation is
//!   a single short transaction and the database is the sole serialization
//!   point.
//! - [`memory::InMemoryStore`]: a process-local backend with identical
//!   observable semantics, used by the test suite and for local development
//!   without a database.
use crate::model::{
    Client, ClientAuthView, CreatedClient, Message, NewClient, NewSubscription, Subscription,
    SubscriptionMetrics, Topic,
};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
#[cfg(all(test, feature = "pg-tests"))]
mod postgres_tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Atomic operations over the broker's persistent state.
///
/// Engine operations (`publish` through the sweepers) assume their caller
/// has already resolved resource existence where the HTTP contract demands
/// a 404; within the engine, rows in an unexpected state are silently
/// skipped because pulls and retries are inherently racy.
#[async_trait]
pub trait BrokerStore: Send + Sync {
    // -----------------------------
    // Topics
    // -----------------------------
    async fn create_topic(&self, id: &str) -> StoreResult<Topic>;
    async fn get_topic(&self, id: &str) -> StoreResult<Topic>;
    async fn list_topics(&self, offset: i64, limit: i64) -> StoreResult<Vec<Topic>>;
    /// Cascades to the topic's subscriptions and their messages.
    async fn delete_topic(&self, id: &str) -> StoreResult<()>;

    // -----------------------------
    // Subscriptions
    // -----------------------------
    async fn create_subscription(&self, subscription: NewSubscription)
        -> StoreResult<Subscription>;
    async fn get_subscription(&self, id: &str) -> StoreResult<Subscription>;
    async fn list_subscriptions(&self, offset: i64, limit: i64) -> StoreResult<Vec<Subscription>>;
    /// Cascades to the subscription's messages.
    async fn delete_subscription(&self, id: &str) -> StoreResult<()>;

    // -----------------------------
    // Dispatch engine
    // -----------------------------
    /// Fan a batch of payloads out to every matching subscription of the
    /// topic in one transaction. Returns the number of rows inserted; a
    /// topic with zero subscriptions accepts the publish and returns 0.
    async fn publish(&self, topic_id: &str, payloads: &[Value]) -> StoreResult<u64>;

    /// Lease up to `batch_size` due messages for `consumer_id`, skipping
    /// rows locked by concurrent transactions. Increments
    /// `delivery_attempts` at lease time.
    async fn consume(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        batch_size: i64,
    ) -> StoreResult<Vec<Message>>;

    /// Transition `delivered -> acked` for rows leased by `consumer_id`.
    /// Rows in another state or owned by another consumer are skipped.
    async fn ack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64>;

    /// Release leases held by `consumer_id`: exhausted rows go to the DLQ,
    /// the rest return to `available` after the computed backoff.
    async fn nack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64>;

    async fn list_dlq(
        &self,
        subscription_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<Message>>;

    /// Return DLQ rows to `available` with a reset attempt counter.
    async fn reprocess_dlq(&self, subscription_id: &str, message_ids: &[Uuid]) -> StoreResult<u64>;

    async fn subscription_metrics(&self, subscription_id: &str)
        -> StoreResult<SubscriptionMetrics>;

    // -----------------------------
    // Sweepers
    // -----------------------------
    /// Release leases older than `lock_timeout_seconds` in bounded batches.
    /// Exhausted rows go to the DLQ; the rest become immediately available
    /// (the consumer failed, not the work). Returns rows touched.
    async fn sweep_stuck(&self, lock_timeout_seconds: i64, batch_size: i64) -> StoreResult<u64>;

    /// Delete acked rows older than `older_than_seconds` in bounded
    /// batches. Returns rows deleted.
    async fn sweep_acked(&self, older_than_seconds: i64, batch_size: i64) -> StoreResult<u64>;

    // -----------------------------
    // Clients
    // -----------------------------
    async fn create_client(&self, client: NewClient) -> StoreResult<CreatedClient>;
    async fn get_client(&self, id: Uuid) -> StoreResult<Client>;
    async fn list_clients(&self, offset: i64, limit: i64) -> StoreResult<Vec<Client>>;
    /// Replaces name/scopes/is_active and bumps `token_version`, which
    /// invalidates every outstanding token for the client.
    async fn update_client(&self, id: Uuid, update: NewClient) -> StoreResult<Client>;
    async fn delete_client(&self, id: Uuid) -> StoreResult<()>;
    /// Credential view used by token issuance and verification.
    async fn client_auth_view(&self, id: Uuid) -> StoreResult<ClientAuthView>;

    // -----------------------------
    // Health
    // -----------------------------
    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
