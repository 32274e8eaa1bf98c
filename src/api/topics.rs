//! Topic API handlers: CRUD plus publish.
use crate::api::error::{
    api_conflict, api_internal, api_not_found, api_validation_error, ApiError,
};
use crate::api::types::{CreateTopicRequest, PageQuery, TopicListResponse};
use crate::api::validate_page;
use crate::app::AppState;
use crate::auth::require_scope;
use crate::model::{validate_resource_id, Topic};
use crate::store::StoreError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;

#[utoipa::path(
    post,
    path = "/topics",
    tag = "topics",
    request_body = CreateTopicRequest,
    responses(
        (status = 201, description = "Topic created", body = Topic),
        (status = 409, description = "Topic already exists", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Invalid identifier", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTopicRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&state, &headers, "topics", "create", Some(&body.id)).await?;
    validate_resource_id(&body.id).map_err(|msg| api_validation_error(&msg))?;
    match state.store.create_topic(&body.id).await {
        Ok(topic) => Ok((StatusCode::CREATED, Json(topic))),
        Err(StoreError::Conflict(_)) => Err(api_conflict("topic already exists")),
        Err(err) => Err(api_internal("failed to create topic", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/topics/{id}",
    tag = "topics",
    params(("id" = String, Path, description = "Topic identifier")),
    responses(
        (status = 200, description = "Fetch topic", body = Topic),
        (status = 404, description = "Topic not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_topic(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Topic>, ApiError> {
    require_scope(&state, &headers, "topics", "read", Some(&id)).await?;
    match state.store.get_topic(&id).await {
        Ok(topic) => Ok(Json(topic)),
        Err(StoreError::NotFound(_)) => Err(api_not_found("topic not found")),
        Err(err) => Err(api_internal("failed to fetch topic", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/topics",
    tag = "topics",
    params(PageQuery),
    responses(
        (status = 200, description = "List topics", body = TopicListResponse)
    )
)]
pub(crate) async fn list_topics(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TopicListResponse>, ApiError> {
    require_scope(&state, &headers, "topics", "read", None).await?;
    validate_page(&page)?;
    let data = state
        .store
        .list_topics(page.offset, page.limit)
        .await
        .map_err(|err| api_internal("failed to list topics", &err))?;
    Ok(Json(TopicListResponse { data }))
}

#[utoipa::path(
    delete,
    path = "/topics/{id}",
    tag = "topics",
    params(("id" = String, Path, description = "Topic identifier")),
    responses(
        (status = 204, description = "Topic deleted"),
        (status = 404, description = "Topic not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_topic(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "topics", "delete", Some(&id)).await?;
    match state.store.delete_topic(&id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound(_)) => Err(api_not_found("topic not found")),
        Err(err) => Err(api_internal("failed to delete topic", &err)),
    }
}

#[utoipa::path(
    post,
    path = "/topics/{id}/messages",
    tag = "topics",
    params(("id" = String, Path, description = "Topic identifier")),
    request_body = Vec<Object>,
    responses(
        (status = 204, description = "Messages accepted"),
        (status = 404, description = "Topic not found", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Invalid payload batch", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn publish_messages(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payloads): Json<Vec<Value>>,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "topics", "publish", Some(&id)).await?;
    if payloads.is_empty() {
        return Err(api_validation_error("payload batch must not be empty"));
    }
    if payloads.iter().any(|payload| !payload.is_object()) {
        return Err(api_validation_error("every payload must be a JSON object"));
    }
    match state.store.publish(&id, &payloads).await {
        // A topic with zero matching subscriptions still accepts the
        // publish; the batch is simply discarded.
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound(_)) => Err(api_not_found("topic not found")),
        Err(err) => Err(api_internal("failed to publish messages", &err)),
    }
}
