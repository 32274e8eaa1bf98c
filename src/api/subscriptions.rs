//! Subscription API handlers: CRUD, consume/ack/nack, DLQ, metrics.
use crate::api::error::{
    api_conflict, api_internal, api_not_found, api_validation_error, ApiError,
};
use crate::api::types::{
    ConsumeQuery, ConsumerQuery, CreateSubscriptionRequest, MessageListResponse, PageQuery,
    SubscriptionListResponse,
};
use crate::api::{ensure_subscription, validate_page};
use crate::app::AppState;
use crate::auth::require_scope;
use crate::filter::validate_filter;
use crate::model::{validate_resource_id, NewSubscription, Subscription, SubscriptionMetrics};
use crate::store::StoreError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/subscriptions",
    tag = "subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = Subscription),
        (status = 404, description = "Topic not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Subscription already exists", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Invalid filter or retry policy", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&state, &headers, "subscriptions", "create", Some(&body.id)).await?;
    validate_resource_id(&body.id).map_err(|msg| api_validation_error(&msg))?;
    validate_resource_id(&body.topic_id).map_err(|msg| api_validation_error(&msg))?;
    if let Some(filter) = &body.filter {
        validate_filter(filter).map_err(|msg| api_validation_error(&msg))?;
    }

    let settings = &state.settings;
    let max_delivery_attempts = body
        .max_delivery_attempts
        .unwrap_or(settings.subscription_max_attempts);
    let backoff_min_seconds = body
        .backoff_min_seconds
        .unwrap_or(settings.subscription_backoff_min_seconds);
    let backoff_max_seconds = body
        .backoff_max_seconds
        .unwrap_or(settings.subscription_backoff_max_seconds);
    if max_delivery_attempts < 1 {
        return Err(api_validation_error("max_delivery_attempts must be >= 1"));
    }
    if backoff_min_seconds < 0 {
        return Err(api_validation_error("backoff_min_seconds must be >= 0"));
    }
    if backoff_max_seconds < backoff_min_seconds {
        return Err(api_validation_error(
            "backoff_max_seconds must be >= backoff_min_seconds",
        ));
    }

    let subscription = NewSubscription {
        id: body.id,
        topic_id: body.topic_id,
        filter: body.filter,
        max_delivery_attempts,
        backoff_min_seconds,
        backoff_max_seconds,
    };
    match state.store.create_subscription(subscription).await {
        Ok(created) => Ok((StatusCode::CREATED, Json(created))),
        Err(StoreError::Conflict(_)) => Err(api_conflict("subscription already exists")),
        Err(StoreError::NotFound(_)) => Err(api_not_found("topic not found")),
        Err(err) => Err(api_internal("failed to create subscription", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = String, Path, description = "Subscription identifier")),
    responses(
        (status = 200, description = "Fetch subscription", body = Subscription),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_subscription(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Subscription>, ApiError> {
    require_scope(&state, &headers, "subscriptions", "read", Some(&id)).await?;
    Ok(Json(ensure_subscription(&state, &id).await?))
}

#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "subscriptions",
    params(PageQuery),
    responses(
        (status = 200, description = "List subscriptions", body = SubscriptionListResponse)
    )
)]
pub(crate) async fn list_subscriptions(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SubscriptionListResponse>, ApiError> {
    require_scope(&state, &headers, "subscriptions", "read", None).await?;
    validate_page(&page)?;
    let data = state
        .store
        .list_subscriptions(page.offset, page.limit)
        .await
        .map_err(|err| api_internal("failed to list subscriptions", &err))?;
    Ok(Json(SubscriptionListResponse { data }))
}

#[utoipa::path(
    delete,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = String, Path, description = "Subscription identifier")),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_subscription(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "subscriptions", "delete", Some(&id)).await?;
    match state.store.delete_subscription(&id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound(_)) => Err(api_not_found("subscription not found")),
        Err(err) => Err(api_internal("failed to delete subscription", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/subscriptions/{id}/messages",
    tag = "subscriptions",
    params(
        ("id" = String, Path, description = "Subscription identifier"),
        ConsumeQuery
    ),
    responses(
        (status = 200, description = "Leased messages", body = MessageListResponse),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Invalid consumer or batch size", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn consume_messages(
    Path(id): Path<String>,
    Query(query): Query<ConsumeQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageListResponse>, ApiError> {
    require_scope(&state, &headers, "subscriptions", "consume", Some(&id)).await?;
    let consumer_id = query
        .consumer_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| api_validation_error("consumer_id is required"))?;
    if !(1..=100).contains(&query.batch_size) {
        return Err(api_validation_error("batch_size must be between 1 and 100"));
    }
    ensure_subscription(&state, &id).await?;
    let data = state
        .store
        .consume(&id, &consumer_id, query.batch_size)
        .await
        .map_err(|err| api_internal("failed to consume messages", &err))?;
    Ok(Json(MessageListResponse { data }))
}

#[utoipa::path(
    post,
    path = "/subscriptions/{id}/acks",
    tag = "subscriptions",
    params(
        ("id" = String, Path, description = "Subscription identifier"),
        ConsumerQuery
    ),
    request_body = Vec<Uuid>,
    responses(
        (status = 204, description = "Acks applied"),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Missing consumer_id", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn ack_messages(
    Path(id): Path<String>,
    Query(query): Query<ConsumerQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message_ids): Json<Vec<Uuid>>,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "subscriptions", "consume", Some(&id)).await?;
    let consumer_id = query
        .consumer_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| api_validation_error("consumer_id is required"))?;
    ensure_subscription(&state, &id).await?;
    // Rows not leased by this consumer are silently skipped.
    state
        .store
        .ack(&id, &consumer_id, &message_ids)
        .await
        .map_err(|err| api_internal("failed to ack messages", &err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/subscriptions/{id}/nacks",
    tag = "subscriptions",
    params(
        ("id" = String, Path, description = "Subscription identifier"),
        ConsumerQuery
    ),
    request_body = Vec<Uuid>,
    responses(
        (status = 204, description = "Nacks applied"),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Missing consumer_id", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn nack_messages(
    Path(id): Path<String>,
    Query(query): Query<ConsumerQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message_ids): Json<Vec<Uuid>>,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "subscriptions", "consume", Some(&id)).await?;
    let consumer_id = query
        .consumer_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| api_validation_error("consumer_id is required"))?;
    ensure_subscription(&state, &id).await?;
    state
        .store
        .nack(&id, &consumer_id, &message_ids)
        .await
        .map_err(|err| api_internal("failed to nack messages", &err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/subscriptions/{id}/dlq",
    tag = "subscriptions",
    params(
        ("id" = String, Path, description = "Subscription identifier"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Dead-lettered messages", body = MessageListResponse),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_dlq(
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageListResponse>, ApiError> {
    require_scope(&state, &headers, "subscriptions", "consume", Some(&id)).await?;
    validate_page(&page)?;
    ensure_subscription(&state, &id).await?;
    let data = state
        .store
        .list_dlq(&id, page.offset, page.limit)
        .await
        .map_err(|err| api_internal("failed to list dlq messages", &err))?;
    Ok(Json(MessageListResponse { data }))
}

#[utoipa::path(
    post,
    path = "/subscriptions/{id}/dlq/reprocess",
    tag = "subscriptions",
    params(("id" = String, Path, description = "Subscription identifier")),
    request_body = Vec<Uuid>,
    responses(
        (status = 204, description = "Messages requeued"),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn reprocess_dlq(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message_ids): Json<Vec<Uuid>>,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "subscriptions", "consume", Some(&id)).await?;
    ensure_subscription(&state, &id).await?;
    state
        .store
        .reprocess_dlq(&id, &message_ids)
        .await
        .map_err(|err| api_internal("failed to reprocess dlq messages", &err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/subscriptions/{id}/metrics",
    tag = "subscriptions",
    params(("id" = String, Path, description = "Subscription identifier")),
    responses(
        (status = 200, description = "Message counts by status", body = SubscriptionMetrics),
        (status = 404, description = "Subscription not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn subscription_metrics(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SubscriptionMetrics>, ApiError> {
    require_scope(&state, &headers, "subscriptions", "read", Some(&id)).await?;
    ensure_subscription(&state, &id).await?;
    let metrics = state
        .store
        .subscription_metrics(&id)
        .await
        .map_err(|err| api_internal("failed to load subscription metrics", &err))?;
    Ok(Json(metrics))
}
