//! In-memory implementation of the broker store.
//!
//! # Purpose
//! Implements [`BrokerStore`] entirely in memory using `HashMap`s guarded by
//! a `tokio::sync::RwLock`. It exists for the test suite and for local
//! development without a database; the server always runs Postgres, because
//! the broker's concurrency contract depends on the database being the
//! single serialization point.
//!
//! # Semantics parity
//! Every observable behavior matches the Postgres backend: filter matching
//! (via [`crate::filter::matches`], the host-side twin of the SQL
//! predicate), `(available_at, created_at, id)` consume ordering, lease
//! accounting at consume time, consumer-scoped ack/nack, the backoff
//! formula, DLQ promotion, and both sweepers. The lock serializes writers,
//! which trivially satisfies the at-most-one-lease property the Postgres
//! backend gets from row locks.
//!
//! # Durability
//! None. All state is lost on drop.
use super::{BrokerStore, StoreError, StoreResult};
use crate::auth::secret::{generate_secret, hash_secret};
use crate::filter;
use crate::model::{
    Client, ClientAuthView, CreatedClient, Message, MessageStatus, NewClient, NewSubscription,
    Subscription, SubscriptionMetrics, Topic, retry_backoff_seconds,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Full message row, lock bookkeeping included.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    subscription_id: String,
    payload: Value,
    status: MessageStatus,
    delivery_attempts: i32,
    available_at: DateTime<Utc>,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    acked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredClient {
    client: Client,
    secret_hash: String,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<String, Subscription>,
    messages: HashMap<Uuid, StoredMessage>,
    clients: HashMap<Uuid, StoredClient>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a message's `available_at` into the past, standing in for the
    /// passage of wall-clock time in backoff tests.
    #[cfg(test)]
    async fn rewind_available_at(&self, id: Uuid, seconds: i64) {
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            message.available_at -= Duration::seconds(seconds);
        }
    }

    /// Backdate a lease so the stuck sweeper sees it as expired.
    #[cfg(test)]
    async fn backdate_lock(&self, id: Uuid, seconds: i64) {
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            if let Some(locked_at) = message.locked_at {
                message.locked_at = Some(locked_at - Duration::seconds(seconds));
            }
        }
    }

    /// Backdate an ack so the acked sweeper sees it as expired.
    #[cfg(test)]
    async fn backdate_ack(&self, id: Uuid, seconds: i64) {
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            if let Some(acked_at) = message.acked_at {
                message.acked_at = Some(acked_at - Duration::seconds(seconds));
            }
        }
    }
}

fn message_view(row: &StoredMessage) -> Message {
    Message {
        id: row.id,
        subscription_id: row.subscription_id.clone(),
        payload: row.payload.clone(),
        delivery_attempts: row.delivery_attempts,
        created_at: row.created_at,
    }
}

fn page<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl BrokerStore for InMemoryStore {
    async fn create_topic(&self, id: &str) -> StoreResult<Topic> {
        let mut inner = self.inner.write().await;
        if inner.topics.contains_key(id) {
            return Err(StoreError::Conflict("topic exists".into()));
        }
        let topic = Topic {
            id: id.to_string(),
            created_at: Utc::now(),
        };
        inner.topics.insert(id.to_string(), topic.clone());
        Ok(topic)
    }

    async fn get_topic(&self, id: &str) -> StoreResult<Topic> {
        let inner = self.inner.read().await;
        inner
            .topics
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("topic".into()))
    }

    async fn list_topics(&self, offset: i64, limit: i64) -> StoreResult<Vec<Topic>> {
        let inner = self.inner.read().await;
        let mut topics: Vec<Topic> = inner.topics.values().cloned().collect();
        topics.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page(topics, offset, limit))
    }

    async fn delete_topic(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.topics.remove(id).is_none() {
            return Err(StoreError::NotFound("topic".into()));
        }
        // Cascade: drop the topic's subscriptions, then their messages.
        let orphaned: Vec<String> = inner
            .subscriptions
            .values()
            .filter(|sub| sub.topic_id == id)
            .map(|sub| sub.id.clone())
            .collect();
        for sub_id in &orphaned {
            inner.subscriptions.remove(sub_id);
        }
        inner
            .messages
            .retain(|_, message| !orphaned.contains(&message.subscription_id));
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> StoreResult<Subscription> {
        let mut inner = self.inner.write().await;
        if !inner.topics.contains_key(&subscription.topic_id) {
            return Err(StoreError::NotFound("topic".into()));
        }
        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Conflict("subscription exists".into()));
        }
        let created = Subscription {
            id: subscription.id.clone(),
            topic_id: subscription.topic_id,
            filter: subscription.filter,
            max_delivery_attempts: subscription.max_delivery_attempts,
            backoff_min_seconds: subscription.backoff_min_seconds,
            backoff_max_seconds: subscription.backoff_max_seconds,
            created_at: Utc::now(),
        };
        inner
            .subscriptions
            .insert(subscription.id, created.clone());
        Ok(created)
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Subscription> {
        let inner = self.inner.read().await;
        inner
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("subscription".into()))
    }

    async fn list_subscriptions(&self, offset: i64, limit: i64) -> StoreResult<Vec<Subscription>> {
        let inner = self.inner.read().await;
        let mut subs: Vec<Subscription> = inner.subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page(subs, offset, limit))
    }

    async fn delete_subscription(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.remove(id).is_none() {
            return Err(StoreError::NotFound("subscription".into()));
        }
        inner
            .messages
            .retain(|_, message| message.subscription_id != id);
        Ok(())
    }

    async fn publish(&self, topic_id: &str, payloads: &[Value]) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        if !inner.topics.contains_key(topic_id) {
            return Err(StoreError::NotFound("topic".into()));
        }
        let now = Utc::now();
        let targets: Vec<(String, Option<Value>)> = inner
            .subscriptions
            .values()
            .filter(|sub| sub.topic_id == topic_id)
            .map(|sub| (sub.id.clone(), sub.filter.clone()))
            .collect();
        let mut inserted = 0u64;
        for payload in payloads {
            for (subscription_id, sub_filter) in &targets {
                if !filter::matches(sub_filter.as_ref(), payload) {
                    continue;
                }
                let id = Uuid::new_v4();
                inner.messages.insert(
                    id,
                    StoredMessage {
                        id,
                        subscription_id: subscription_id.clone(),
                        payload: payload.clone(),
                        status: MessageStatus::Available,
                        delivery_attempts: 0,
                        available_at: now,
                        locked_by: None,
                        locked_at: None,
                        acked_at: None,
                        created_at: now,
                    },
                );
                inserted += 1;
            }
        }
        metrics::counter!("fastpubsub_messages_published_total").increment(inserted);
        Ok(inserted)
    }

    async fn consume(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        batch_size: i64,
    ) -> StoreResult<Vec<Message>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut due: Vec<(DateTime<Utc>, DateTime<Utc>, Uuid)> = inner
            .messages
            .values()
            .filter(|m| {
                m.subscription_id == subscription_id
                    && m.status == MessageStatus::Available
                    && m.available_at <= now
            })
            .map(|m| (m.available_at, m.created_at, m.id))
            .collect();
        due.sort();
        due.truncate(batch_size.max(0) as usize);

        let mut leased = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(message) = inner.messages.get_mut(&id) {
                message.status = MessageStatus::Delivered;
                message.locked_by = Some(consumer_id.to_string());
                message.locked_at = Some(now);
                message.delivery_attempts += 1;
                leased.push(message_view(message));
            }
        }
        metrics::counter!("fastpubsub_messages_consumed_total").increment(leased.len() as u64);
        Ok(leased)
    }

    async fn ack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut count = 0u64;
        for id in message_ids {
            let Some(message) = inner.messages.get_mut(id) else {
                continue;
            };
            if message.subscription_id != subscription_id
                || message.status != MessageStatus::Delivered
                || message.locked_by.as_deref() != Some(consumer_id)
            {
                continue;
            }
            message.status = MessageStatus::Acked;
            message.acked_at = Some(now);
            message.locked_by = None;
            message.locked_at = None;
            count += 1;
        }
        metrics::counter!("fastpubsub_messages_acked_total").increment(count);
        Ok(count)
    }

    async fn nack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let Some(policy) = inner.subscriptions.get(subscription_id).cloned() else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut count = 0u64;
        let mut promoted = 0u64;
        for id in message_ids {
            let Some(message) = inner.messages.get_mut(id) else {
                continue;
            };
            if message.subscription_id != subscription_id
                || message.status != MessageStatus::Delivered
                || message.locked_by.as_deref() != Some(consumer_id)
            {
                continue;
            }
            if message.delivery_attempts >= policy.max_delivery_attempts {
                message.status = MessageStatus::Dlq;
                promoted += 1;
            } else {
                let backoff = retry_backoff_seconds(
                    policy.backoff_min_seconds as i64,
                    policy.backoff_max_seconds as i64,
                    message.delivery_attempts,
                );
                message.status = MessageStatus::Available;
                message.available_at = now + Duration::seconds(backoff);
            }
            message.locked_by = None;
            message.locked_at = None;
            count += 1;
        }
        metrics::counter!("fastpubsub_messages_nacked_total").increment(count);
        metrics::counter!("fastpubsub_messages_dlq_total").increment(promoted);
        Ok(count)
    }

    async fn list_dlq(
        &self,
        subscription_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<&StoredMessage> = inner
            .messages
            .values()
            .filter(|m| m.subscription_id == subscription_id && m.status == MessageStatus::Dlq)
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        Ok(page(
            rows.into_iter().map(message_view).collect(),
            offset,
            limit,
        ))
    }

    async fn reprocess_dlq(&self, subscription_id: &str, message_ids: &[Uuid]) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut count = 0u64;
        for id in message_ids {
            let Some(message) = inner.messages.get_mut(id) else {
                continue;
            };
            if message.subscription_id != subscription_id || message.status != MessageStatus::Dlq {
                continue;
            }
            message.status = MessageStatus::Available;
            message.available_at = now;
            message.delivery_attempts = 0;
            message.locked_by = None;
            message.locked_at = None;
            count += 1;
        }
        metrics::counter!("fastpubsub_messages_reprocessed_total").increment(count);
        Ok(count)
    }

    async fn subscription_metrics(
        &self,
        subscription_id: &str,
    ) -> StoreResult<SubscriptionMetrics> {
        let inner = self.inner.read().await;
        let mut metrics = SubscriptionMetrics {
            subscription_id: subscription_id.to_string(),
            available: 0,
            delivered: 0,
            acked: 0,
            dlq: 0,
        };
        for message in inner.messages.values() {
            if message.subscription_id != subscription_id {
                continue;
            }
            match message.status {
                MessageStatus::Available => metrics.available += 1,
                MessageStatus::Delivered => metrics.delivered += 1,
                MessageStatus::Acked => metrics.acked += 1,
                MessageStatus::Dlq => metrics.dlq += 1,
            }
        }
        Ok(metrics)
    }

    async fn sweep_stuck(&self, lock_timeout_seconds: i64, _batch_size: i64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let cutoff = now - Duration::seconds(lock_timeout_seconds);
        let max_attempts: HashMap<String, i32> = inner
            .subscriptions
            .values()
            .map(|sub| (sub.id.clone(), sub.max_delivery_attempts))
            .collect();
        let mut total = 0u64;
        for message in inner.messages.values_mut() {
            if message.status != MessageStatus::Delivered {
                continue;
            }
            let Some(locked_at) = message.locked_at else {
                continue;
            };
            if locked_at >= cutoff {
                continue;
            }
            let exhausted = max_attempts
                .get(&message.subscription_id)
                .map(|max| message.delivery_attempts >= *max)
                .unwrap_or(false);
            if exhausted {
                message.status = MessageStatus::Dlq;
            } else {
                // No backoff: the consumer failed, not the work, and the
                // attempt was already counted at lease time.
                message.status = MessageStatus::Available;
                message.available_at = now;
            }
            message.locked_by = None;
            message.locked_at = None;
            total += 1;
        }
        metrics::counter!("fastpubsub_stuck_messages_released_total").increment(total);
        Ok(total)
    }

    async fn sweep_acked(&self, older_than_seconds: i64, _batch_size: i64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - Duration::seconds(older_than_seconds);
        let before = inner.messages.len();
        inner.messages.retain(|_, message| {
            !(message.status == MessageStatus::Acked
                && message.acked_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let deleted = (before - inner.messages.len()) as u64;
        metrics::counter!("fastpubsub_acked_messages_deleted_total").increment(deleted);
        Ok(deleted)
    }

    async fn create_client(&self, client: NewClient) -> StoreResult<CreatedClient> {
        let mut inner = self.inner.write().await;
        let id = Uuid::now_v7();
        let secret = generate_secret();
        let secret_hash = hash_secret(&secret).map_err(StoreError::Unexpected)?;
        let now = Utc::now();
        inner.clients.insert(
            id,
            StoredClient {
                client: Client {
                    id,
                    name: client.name,
                    scopes: client.scopes,
                    is_active: client.is_active,
                    token_version: 1,
                    created_at: now,
                    updated_at: now,
                },
                secret_hash,
            },
        );
        Ok(CreatedClient { id, secret })
    }

    async fn get_client(&self, id: Uuid) -> StoreResult<Client> {
        let inner = self.inner.read().await;
        inner
            .clients
            .get(&id)
            .map(|stored| stored.client.clone())
            .ok_or_else(|| StoreError::NotFound("client".into()))
    }

    async fn list_clients(&self, offset: i64, limit: i64) -> StoreResult<Vec<Client>> {
        let inner = self.inner.read().await;
        let mut clients: Vec<Client> = inner
            .clients
            .values()
            .map(|stored| stored.client.clone())
            .collect();
        clients.sort_by_key(|client| client.id);
        Ok(page(clients, offset, limit))
    }

    async fn update_client(&self, id: Uuid, update: NewClient) -> StoreResult<Client> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .clients
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("client".into()))?;
        stored.client.name = update.name;
        stored.client.scopes = update.scopes;
        stored.client.is_active = update.is_active;
        stored.client.token_version += 1;
        stored.client.updated_at = Utc::now();
        Ok(stored.client.clone())
    }

    async fn delete_client(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.clients.remove(&id).is_none() {
            return Err(StoreError::NotFound("client".into()));
        }
        Ok(())
    }

    async fn client_auth_view(&self, id: Uuid) -> StoreResult<ClientAuthView> {
        let inner = self.inner.read().await;
        inner
            .clients
            .get(&id)
            .map(|stored| ClientAuthView {
                id: stored.client.id,
                name: stored.client.name.clone(),
                scopes: stored.client.scopes.clone(),
                is_active: stored.client.is_active,
                secret_hash: stored.secret_hash.clone(),
                token_version: stored.client.token_version,
            })
            .ok_or_else(|| StoreError::NotFound("client".into()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
