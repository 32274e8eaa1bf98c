//! Domain types shared by the store backends and the HTTP API.
//!
//! # Purpose
//! Defines the broker's core entities (topics, subscriptions, messages,
//! clients) plus the small derived shapes the dispatch engine returns.
//! DB-facing row structs live next to each store backend; these types are
//! the API-facing domain model.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Named fan-out point for publishing.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Topic {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Durable logical queue attached to a topic.
///
/// Owns its messages, its filter, and its retry policy. Deleting a
/// subscription cascades to its messages.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Subscription {
    pub id: String,
    pub topic_id: String,
    #[schema(value_type = Option<Object>)]
    pub filter: Option<Value>,
    pub max_delivery_attempts: i32,
    pub backoff_min_seconds: i32,
    pub backoff_max_seconds: i32,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a subscription, with retry policy already
/// resolved against the configured defaults.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: String,
    pub topic_id: String,
    pub filter: Option<Value>,
    pub max_delivery_attempts: i32,
    pub backoff_min_seconds: i32,
    pub backoff_max_seconds: i32,
}

/// Delivery state of a message row.
///
/// Stored as TEXT; the string mapping is the schema contract, so the
/// round-trip helpers below are the only place it is spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Available,
    Delivered,
    Acked,
    Dlq,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Available => "available",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Acked => "acked",
            MessageStatus::Dlq => "dlq",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(MessageStatus::Available),
            "delivered" => Some(MessageStatus::Delivered),
            "acked" => Some(MessageStatus::Acked),
            "dlq" => Some(MessageStatus::Dlq),
            _ => None,
        }
    }
}

/// One JSON payload delivered to one subscription.
///
/// This is the consumer-visible projection; lock bookkeeping stays inside
/// the store backends.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Message {
    pub id: Uuid,
    pub subscription_id: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub delivery_attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time message counts for one subscription, grouped by status.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SubscriptionMetrics {
    pub subscription_id: String,
    pub available: i64,
    pub delivered: i64,
    pub acked: i64,
    pub dlq: i64,
}

/// Authorized API client.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub scopes: String,
    pub is_active: bool,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or updating a client. Updates replace all three
/// fields and bump the token version.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub name: String,
    pub scopes: String,
    pub is_active: bool,
}

/// Result of client creation; the secret is only ever returned here.
#[derive(Debug, Clone)]
pub struct CreatedClient {
    pub id: Uuid,
    pub secret: String,
}

/// Credential material the auth layer needs to validate a token or issue
/// one. Never serialized.
#[derive(Debug, Clone)]
pub struct ClientAuthView {
    pub id: Uuid,
    pub name: String,
    pub scopes: String,
    pub is_active: bool,
    pub secret_hash: String,
    pub token_version: i32,
}

/// Caller-supplied identifiers for topics and subscriptions: alphanumeric
/// plus `-._`, at most 128 characters.
pub fn validate_resource_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    if id.len() > 128 {
        return Err("identifier must be at most 128 characters".to_string());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err("identifier may only contain [a-zA-Z0-9-._]".to_string());
    }
    Ok(())
}

/// Exponential backoff for a nacked message: `min(max, min * 2^(attempts-1))`
/// seconds, so the first failed attempt waits `backoff_min`.
///
/// Saturating arithmetic keeps absurd attempt counts from overflowing; the
/// cap applies either way.
pub fn retry_backoff_seconds(min_seconds: i64, max_seconds: i64, delivery_attempts: i32) -> i64 {
    let exponent = delivery_attempts.saturating_sub(1).max(0) as u32;
    let factor = 2i64.checked_pow(exponent).unwrap_or(i64::MAX);
    min_seconds.saturating_mul(factor).min(max_seconds)
}
