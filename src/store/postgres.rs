//! Postgres-backed implementation of the broker store.
//!
//! # What this module is
//! This is the dispatch engine: the transactional operations that make
//! publish / consume / ack / nack / DLQ-reprocess correct under concurrent
//! producers and consumers sharing one database. Postgres is the single
//! serialization point; there are no in-process queues or caches shadowing
//! its state, so horizontal scaling is purely "run more processes against
//! the same database".
//!
//! # Transactional shape
//! Every operation is one short transaction. Most are a single statement
//! (single statements are atomic on their own); publish wraps an existence
//! check plus the fan-out insert in an explicit transaction so a concurrent
//! topic delete cannot interleave.
//!
//! # The hot paths and their indices
//! - consume: `(subscription_id, status, available_at)` drives the batch
//!   pick; `FOR UPDATE SKIP LOCKED` lets concurrent consumers drain one
//!   subscription without blocking each other.
//! - acked sweeper: `(subscription_id, status, acked_at)`.
//! - stuck sweeper: partial index on `(locked_at) WHERE status='delivered'`.
//!
//! # Lease accounting
//! `delivery_attempts` is incremented when a lease is taken, not when it
//! fails. A consumer that crashes and never nacks still costs an attempt
//! once the stuck sweeper releases the lease, so a poison message cannot
//! loop forever behind a permanently-broken consumer.
//!
//! # Filter evaluation
//! Publish fan-out evaluates subscription filters inside the INSERT
//! statement (`jsonb_each` over the filter, jsonb equality against the
//! payload), so a batch publish stays a single statement regardless of how
//! many subscriptions or filter keys exist. jsonb equality compares numbers
//! numerically, which is exactly the contract `crate::filter` documents.
use super::{BrokerStore, StoreError, StoreResult};
use crate::auth::secret::{generate_secret, hash_secret};
use crate::config::Settings;
use crate::model::{
    Client, ClientAuthView, CreatedClient, Message, NewClient, NewSubscription, Subscription,
    SubscriptionMetrics, Topic,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Durable broker store backed by Postgres.
///
/// Safe to share across request handlers; `sqlx::PgPool` leases connections
/// per statement. Pool sizing is the only in-process shared resource.
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `topics` table.
#[derive(Debug, Clone, FromRow)]
struct DbTopic {
    id: String,
    created_at: DateTime<Utc>,
}

/// Row shape for the `subscriptions` table.
///
/// Kept separate from the domain type so schema details stay localized
/// here, mirroring how the other row structs below map their tables.
#[derive(Debug, Clone, FromRow)]
struct DbSubscription {
    id: String,
    topic_id: String,
    filter: Option<Value>,
    max_delivery_attempts: i32,
    backoff_min_seconds: i32,
    backoff_max_seconds: i32,
    created_at: DateTime<Utc>,
}

/// Consumer-visible projection of `subscription_messages`, plus
/// `available_at` so consume can re-sort after the UPDATE (UPDATE..FROM
/// does not preserve the CTE's ordering).
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: Uuid,
    subscription_id: String,
    payload: Value,
    delivery_attempts: i32,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Row shape for the `clients` table.
#[derive(Debug, Clone, FromRow)]
struct DbClient {
    id: Uuid,
    name: String,
    scopes: String,
    is_active: bool,
    secret_hash: String,
    token_version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct MetricsRow {
    available: i64,
    delivered: i64,
    acked: i64,
    dlq: i64,
}

impl PostgresStore {
    /// Connect to Postgres with the configured pool bounds.
    ///
    /// - `max_connections` is pool size plus overflow; it caps concurrent
    ///   DB work and protects the database from a thundering herd.
    /// - `acquire_timeout` bounds how long a request waits for a pooled
    ///   connection; failing fast beats hanging when the DB is unhealthy.
    /// - `test_before_acquire` pings pooled connections so broken ones are
    ///   detected before a statement runs on them.
    pub async fn connect(settings: &Settings) -> StoreResult<Self> {
        let mut connect_options = PgConnectOptions::from_str(&settings.database_url)
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        if !settings.database_echo {
            connect_options = connect_options.disable_statement_logging();
        }
        let max_connections =
            (settings.database_pool_size + settings.database_max_overflow).max(1) as u32;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(settings.database_pool_pre_ping)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(Self { pool })
    }

    /// Apply pending migrations. Exposed separately from `connect` because
    /// deployments run `db-migrate` as its own step before starting servers.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    #[cfg(all(test, feature = "pg-tests"))]
    pub(crate) fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BrokerStore for PostgresStore {
    // -----------------------------
    // Topics
    // -----------------------------

    async fn create_topic(&self, id: &str) -> StoreResult<Topic> {
        let row = sqlx::query_as::<_, DbTopic>(
            "INSERT INTO topics (id) VALUES ($1) RETURNING id, created_at",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await;
        match row {
            Ok(row) => Ok(topic_from_db(row)),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict("topic exists".into()))
            }
            Err(err) => Err(StoreError::Unexpected(err.into())),
        }
    }

    async fn get_topic(&self, id: &str) -> StoreResult<Topic> {
        let row =
            sqlx::query_as::<_, DbTopic>("SELECT id, created_at FROM topics WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => Ok(topic_from_db(row)),
            None => Err(StoreError::NotFound("topic".into())),
        }
    }

    async fn list_topics(&self, offset: i64, limit: i64) -> StoreResult<Vec<Topic>> {
        let rows = sqlx::query_as::<_, DbTopic>(
            "SELECT id, created_at FROM topics ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(rows.into_iter().map(topic_from_db).collect())
    }

    async fn delete_topic(&self, id: &str) -> StoreResult<()> {
        // ON DELETE CASCADE removes the topic's subscriptions and their
        // messages in the same statement.
        let removed = sqlx::query("DELETE FROM topics WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        if removed.rows_affected() == 0 {
            return Err(StoreError::NotFound("topic".into()));
        }
        Ok(())
    }

    // -----------------------------
    // Subscriptions
    // -----------------------------

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> StoreResult<Subscription> {
        let row = sqlx::query_as::<_, DbSubscription>(
            r#"INSERT INTO subscriptions
               (id, topic_id, filter, max_delivery_attempts, backoff_min_seconds, backoff_max_seconds)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, topic_id, filter, max_delivery_attempts,
                         backoff_min_seconds, backoff_max_seconds, created_at"#,
        )
        .bind(&subscription.id)
        .bind(&subscription.topic_id)
        .bind(&subscription.filter)
        .bind(subscription.max_delivery_attempts)
        .bind(subscription.backoff_min_seconds)
        .bind(subscription.backoff_max_seconds)
        .fetch_one(&self.pool)
        .await;
        match row {
            Ok(row) => Ok(subscription_from_db(row)),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict("subscription exists".into()))
            }
            Err(err) if is_foreign_key_violation(&err) => {
                Err(StoreError::NotFound("topic".into()))
            }
            Err(err) => Err(StoreError::Unexpected(err.into())),
        }
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Subscription> {
        let row = sqlx::query_as::<_, DbSubscription>(
            r#"SELECT id, topic_id, filter, max_delivery_attempts,
                      backoff_min_seconds, backoff_max_seconds, created_at
               FROM subscriptions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => Ok(subscription_from_db(row)),
            None => Err(StoreError::NotFound("subscription".into())),
        }
    }

    async fn list_subscriptions(&self, offset: i64, limit: i64) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, DbSubscription>(
            r#"SELECT id, topic_id, filter, max_delivery_attempts,
                      backoff_min_seconds, backoff_max_seconds, created_at
               FROM subscriptions ORDER BY id OFFSET $1 LIMIT $2"#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(rows.into_iter().map(subscription_from_db).collect())
    }

    async fn delete_subscription(&self, id: &str) -> StoreResult<()> {
        let removed = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        if removed.rows_affected() == 0 {
            return Err(StoreError::NotFound("subscription".into()));
        }
        Ok(())
    }

    // -----------------------------
    // Dispatch engine
    // -----------------------------

    async fn publish(&self, topic_id: &str, payloads: &[Value]) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM topics WHERE id = $1)")
            .bind(topic_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        if !exists {
            return Err(StoreError::NotFound("topic".into()));
        }

        // One statement fans the whole batch out to every matching
        // subscription. The filter predicate: a subscription rejects a
        // payload iff some filter key maps to an array and the payload
        // either lacks that key or its value equals none of the allowed
        // values. NULL / '{}' / non-object filters accept everything.
        let inserted = sqlx::query(
            r#"WITH batch AS (
                   SELECT value AS payload
                   FROM jsonb_array_elements($2::jsonb)
               ),
               fanout AS (
                   SELECT s.id AS subscription_id, b.payload
                   FROM subscriptions s
                   CROSS JOIN batch b
                   WHERE s.topic_id = $1
                     AND (
                       s.filter IS NULL
                       OR jsonb_typeof(s.filter) <> 'object'
                       OR s.filter = '{}'::jsonb
                       OR NOT EXISTS (
                           SELECT 1
                           FROM jsonb_each(s.filter) AS f(key, allowed)
                           WHERE jsonb_typeof(f.allowed) = 'array'
                             AND (
                               b.payload -> f.key IS NULL
                               OR NOT (b.payload -> f.key IN (
                                   SELECT jsonb_array_elements(f.allowed)
                               ))
                             )
                       )
                     )
               )
               INSERT INTO subscription_messages (subscription_id, payload)
               SELECT subscription_id, payload FROM fanout"#,
        )
        .bind(topic_id)
        .bind(Value::Array(payloads.to_vec()))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        let count = inserted.rows_affected();
        metrics::counter!("fastpubsub_messages_published_total").increment(count);
        Ok(count)
    }

    async fn consume(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        batch_size: i64,
    ) -> StoreResult<Vec<Message>> {
        // SKIP LOCKED is what lets N consumers drain one subscription
        // without serializing on each other: rows being leased by a
        // concurrent transaction are passed over instead of waited on.
        let rows = sqlx::query_as::<_, DbMessage>(
            r#"WITH picked AS (
                   SELECT id
                   FROM subscription_messages
                   WHERE subscription_id = $1
                     AND status = 'available'
                     AND available_at <= now()
                   ORDER BY available_at, created_at, id
                   LIMIT $3
                   FOR UPDATE SKIP LOCKED
               )
               UPDATE subscription_messages sm
               SET status = 'delivered',
                   locked_by = $2,
                   locked_at = now(),
                   delivery_attempts = sm.delivery_attempts + 1
               FROM picked
               WHERE sm.id = picked.id
               RETURNING sm.id, sm.subscription_id, sm.payload,
                         sm.delivery_attempts, sm.available_at, sm.created_at"#,
        )
        .bind(subscription_id)
        .bind(consumer_id)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        let mut rows = rows;
        rows.sort_by(|a, b| {
            (a.available_at, a.created_at, a.id).cmp(&(b.available_at, b.created_at, b.id))
        });
        metrics::counter!("fastpubsub_messages_consumed_total").increment(rows.len() as u64);
        Ok(rows.into_iter().map(message_from_db).collect())
    }

    async fn ack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64> {
        // Consumer-scoped: only the lease holder may ack. Everything else
        // (already acked, re-leased by someone else, unknown id) is a
        // silent no-op, which is what makes retries race-free.
        let updated = sqlx::query(
            r#"UPDATE subscription_messages
               SET status = 'acked',
                   acked_at = now(),
                   locked_by = NULL,
                   locked_at = NULL
               WHERE subscription_id = $1
                 AND id = ANY($3)
                 AND status = 'delivered'
                 AND locked_by = $2"#,
        )
        .bind(subscription_id)
        .bind(consumer_id)
        .bind(message_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        let count = updated.rows_affected();
        metrics::counter!("fastpubsub_messages_acked_total").increment(count);
        Ok(count)
    }

    async fn nack(
        &self,
        subscription_id: &str,
        consumer_id: &str,
        message_ids: &[Uuid],
    ) -> StoreResult<u64> {
        // delivery_attempts was already incremented at lease time, so the
        // exhaustion check compares against it directly and the backoff
        // exponent is attempts - 1 (first failure waits backoff_min).
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE subscription_messages sm
               SET status = CASE
                     WHEN sm.delivery_attempts >= s.max_delivery_attempts THEN 'dlq'
                     ELSE 'available'
                   END,
                   available_at = CASE
                     WHEN sm.delivery_attempts >= s.max_delivery_attempts THEN sm.available_at
                     ELSE now() + make_interval(secs => LEAST(
                       s.backoff_max_seconds::double precision,
                       s.backoff_min_seconds::double precision
                         * power(2::double precision, GREATEST(sm.delivery_attempts - 1, 0))
                     ))
                   END,
                   locked_by = NULL,
                   locked_at = NULL
               FROM subscriptions s
               WHERE s.id = sm.subscription_id
                 AND sm.subscription_id = $1
                 AND sm.id = ANY($3)
                 AND sm.status = 'delivered'
                 AND sm.locked_by = $2
               RETURNING sm.status"#,
        )
        .bind(subscription_id)
        .bind(consumer_id)
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        let promoted = rows.iter().filter(|(status,)| status == "dlq").count() as u64;
        metrics::counter!("fastpubsub_messages_nacked_total").increment(rows.len() as u64);
        metrics::counter!("fastpubsub_messages_dlq_total").increment(promoted);
        Ok(rows.len() as u64)
    }

    async fn list_dlq(
        &self,
        subscription_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, DbMessage>(
            r#"SELECT id, subscription_id, payload, delivery_attempts, available_at, created_at
               FROM subscription_messages
               WHERE subscription_id = $1 AND status = 'dlq'
               ORDER BY created_at, id
               OFFSET $2 LIMIT $3"#,
        )
        .bind(subscription_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(rows.into_iter().map(message_from_db).collect())
    }

    async fn reprocess_dlq(&self, subscription_id: &str, message_ids: &[Uuid]) -> StoreResult<u64> {
        let updated = sqlx::query(
            r#"UPDATE subscription_messages
               SET status = 'available',
                   available_at = now(),
                   delivery_attempts = 0,
                   locked_by = NULL,
                   locked_at = NULL
               WHERE subscription_id = $1
                 AND id = ANY($2)
                 AND status = 'dlq'"#,
        )
        .bind(subscription_id)
        .bind(message_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        let count = updated.rows_affected();
        metrics::counter!("fastpubsub_messages_reprocessed_total").increment(count);
        Ok(count)
    }

    async fn subscription_metrics(
        &self,
        subscription_id: &str,
    ) -> StoreResult<SubscriptionMetrics> {
        let row = sqlx::query_as::<_, MetricsRow>(
            r#"SELECT
                 count(*) FILTER (WHERE status = 'available') AS available,
                 count(*) FILTER (WHERE status = 'delivered') AS delivered,
                 count(*) FILTER (WHERE status = 'acked') AS acked,
                 count(*) FILTER (WHERE status = 'dlq') AS dlq
               FROM subscription_messages
               WHERE subscription_id = $1"#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(SubscriptionMetrics {
            subscription_id: subscription_id.to_string(),
            available: row.available,
            delivered: row.delivered,
            acked: row.acked,
            dlq: row.dlq,
        })
    }

    // -----------------------------
    // Sweepers
    // -----------------------------

    async fn sweep_stuck(&self, lock_timeout_seconds: i64, batch_size: i64) -> StoreResult<u64> {
        // Bounded batches keep each statement's lock window short; SKIP
        // LOCKED avoids contending with consumers that are actively
        // leasing. No backoff on release: the consumer failed, not the
        // work, and its attempt was already counted at lease time.
        let mut total: u64 = 0;
        loop {
            let rows: Vec<(bool,)> = sqlx::query_as(
                r#"WITH expired AS (
                       SELECT sm.id,
                              sm.delivery_attempts >= s.max_delivery_attempts AS exhausted
                       FROM subscription_messages sm
                       JOIN subscriptions s ON s.id = sm.subscription_id
                       WHERE sm.status = 'delivered'
                         AND sm.locked_at < now() - make_interval(secs => $1)
                       ORDER BY sm.locked_at
                       LIMIT $2
                       FOR UPDATE OF sm SKIP LOCKED
                   )
                   UPDATE subscription_messages sm
                   SET status = CASE WHEN expired.exhausted THEN 'dlq' ELSE 'available' END,
                       available_at = CASE
                         WHEN expired.exhausted THEN sm.available_at
                         ELSE now()
                       END,
                       locked_by = NULL,
                       locked_at = NULL
                   FROM expired
                   WHERE sm.id = expired.id
                   RETURNING expired.exhausted"#,
            )
            .bind(lock_timeout_seconds as f64)
            .bind(batch_size)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

            let promoted = rows.iter().filter(|(exhausted,)| *exhausted).count() as u64;
            metrics::counter!("fastpubsub_stuck_messages_released_total")
                .increment(rows.len() as u64);
            metrics::counter!("fastpubsub_messages_dlq_total").increment(promoted);
            total += rows.len() as u64;
            if (rows.len() as i64) < batch_size {
                return Ok(total);
            }
        }
    }

    async fn sweep_acked(&self, older_than_seconds: i64, batch_size: i64) -> StoreResult<u64> {
        let mut total: u64 = 0;
        loop {
            let deleted = sqlx::query(
                r#"DELETE FROM subscription_messages
                   WHERE id IN (
                       SELECT id
                       FROM subscription_messages
                       WHERE status = 'acked'
                         AND acked_at < now() - make_interval(secs => $1)
                       LIMIT $2
                   )"#,
            )
            .bind(older_than_seconds as f64)
            .bind(batch_size)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

            let count = deleted.rows_affected();
            metrics::counter!("fastpubsub_acked_messages_deleted_total").increment(count);
            total += count;
            if (count as i64) < batch_size {
                return Ok(total);
            }
        }
    }

    // -----------------------------
    // Clients
    // -----------------------------

    async fn create_client(&self, client: NewClient) -> StoreResult<CreatedClient> {
        let id = Uuid::now_v7();
        let secret = generate_secret();
        let secret_hash = hash_secret(&secret).map_err(StoreError::Unexpected)?;
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO clients
               (id, name, scopes, is_active, secret_hash, token_version, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, 1, $6, $6)"#,
        )
        .bind(id)
        .bind(&client.name)
        .bind(&client.scopes)
        .bind(client.is_active)
        .bind(&secret_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(CreatedClient { id, secret })
    }

    async fn get_client(&self, id: Uuid) -> StoreResult<Client> {
        let row = sqlx::query_as::<_, DbClient>(
            r#"SELECT id, name, scopes, is_active, secret_hash, token_version, created_at, updated_at
               FROM clients WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => Ok(client_from_db(row)),
            None => Err(StoreError::NotFound("client".into())),
        }
    }

    async fn list_clients(&self, offset: i64, limit: i64) -> StoreResult<Vec<Client>> {
        let rows = sqlx::query_as::<_, DbClient>(
            r#"SELECT id, name, scopes, is_active, secret_hash, token_version, created_at, updated_at
               FROM clients ORDER BY id OFFSET $1 LIMIT $2"#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(rows.into_iter().map(client_from_db).collect())
    }

    async fn update_client(&self, id: Uuid, update: NewClient) -> StoreResult<Client> {
        // Bumping token_version here is the revocation mechanism: every
        // outstanding token carries the old version and stops validating.
        let row = sqlx::query_as::<_, DbClient>(
            r#"UPDATE clients
               SET name = $2,
                   scopes = $3,
                   is_active = $4,
                   token_version = token_version + 1,
                   updated_at = now()
               WHERE id = $1
               RETURNING id, name, scopes, is_active, secret_hash, token_version, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.scopes)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => Ok(client_from_db(row)),
            None => Err(StoreError::NotFound("client".into())),
        }
    }

    async fn delete_client(&self, id: Uuid) -> StoreResult<()> {
        let removed = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        if removed.rows_affected() == 0 {
            return Err(StoreError::NotFound("client".into()));
        }
        Ok(())
    }

    async fn client_auth_view(&self, id: Uuid) -> StoreResult<ClientAuthView> {
        let row = sqlx::query_as::<_, DbClient>(
            r#"SELECT id, name, scopes, is_active, secret_hash, token_version, created_at, updated_at
               FROM clients WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => Ok(ClientAuthView {
                id: row.id,
                name: row.name,
                scopes: row.scopes,
                is_active: row.is_active,
                secret_hash: row.secret_hash,
                token_version: row.token_version,
            }),
            None => Err(StoreError::NotFound("client".into())),
        }
    }

    // -----------------------------
    // Health
    // -----------------------------

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

fn topic_from_db(row: DbTopic) -> Topic {
    Topic {
        id: row.id,
        created_at: row.created_at,
    }
}

fn subscription_from_db(row: DbSubscription) -> Subscription {
    Subscription {
        id: row.id,
        topic_id: row.topic_id,
        filter: row.filter,
        max_delivery_attempts: row.max_delivery_attempts,
        backoff_min_seconds: row.backoff_min_seconds,
        backoff_max_seconds: row.backoff_max_seconds,
        created_at: row.created_at,
    }
}

fn message_from_db(row: DbMessage) -> Message {
    Message {
        id: row.id,
        subscription_id: row.subscription_id,
        payload: row.payload,
        delivery_attempts: row.delivery_attempts,
        created_at: row.created_at,
    }
}

fn client_from_db(row: DbClient) -> Client {
    Client {
        id: row.id,
        name: row.name,
        scopes: row.scopes,
        is_active: row.is_active,
        token_version: row.token_version,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
