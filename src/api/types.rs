//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes of the REST API and the OpenAPI schema. List
//! endpoints wrap their items in `{"data": [...]}`.
use crate::model::{Client, Message, Subscription, Topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateTopicRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TopicListResponse {
    pub data: Vec<Topic>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateSubscriptionRequest {
    pub id: String,
    pub topic_id: String,
    /// Conjunction of per-key set-membership tests; omitted or null
    /// matches every payload.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub filter: Option<Value>,
    /// Defaults come from the server configuration when omitted.
    pub max_delivery_attempts: Option<i32>,
    pub backoff_min_seconds: Option<i32>,
    pub backoff_max_seconds: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SubscriptionListResponse {
    pub data: Vec<Subscription>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MessageListResponse {
    pub data: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateClientRequest {
    pub name: String,
    pub scopes: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateClientResponse {
    pub id: Uuid,
    /// Returned exactly once; only the hash is stored.
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClientListResponse {
    pub data: Vec<Client>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TokenRequest {
    pub client_id: Uuid,
    pub client_secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsumeQuery {
    pub consumer_id: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_batch_size() -> i64 {
    10
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsumerQuery {
    pub consumer_id: Option<String>,
}
