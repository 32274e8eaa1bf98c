//! Client admin handlers and the OAuth2 token endpoint.
use crate::api::error::{
    api_internal, api_internal_message, api_not_found, api_unauthorized, api_validation_error,
    ApiError,
};
use crate::api::types::{
    ClientListResponse, CreateClientRequest, CreateClientResponse, PageQuery, TokenRequest,
    TokenResponse,
};
use crate::api::validate_page;
use crate::app::AppState;
use crate::auth::{require_scope, scope, secret, token};
use crate::model::{Client, NewClient};
use crate::store::StoreError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use std::time::Duration;
use uuid::Uuid;

fn validate_client_request(body: &CreateClientRequest) -> Result<NewClient, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(api_validation_error("name must not be empty"));
    }
    scope::validate_scopes(&body.scopes).map_err(|msg| api_validation_error(&msg))?;
    Ok(NewClient {
        name: name.to_string(),
        scopes: body.scopes.trim().to_string(),
        is_active: body.is_active,
    })
}

#[utoipa::path(
    post,
    path = "/clients",
    tag = "clients",
    request_body = CreateClientRequest,
    responses(
        (status = 201, description = "Client created; the secret is only returned here", body = CreateClientResponse),
        (status = 422, description = "Invalid name or scopes", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&state, &headers, "clients", "create", None).await?;
    let client = validate_client_request(&body)?;
    let created = state
        .store
        .create_client(client)
        .await
        .map_err(|err| api_internal("failed to create client", &err))?;
    Ok((
        StatusCode::CREATED,
        Json(CreateClientResponse {
            id: created.id,
            secret: created.secret,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/clients/{id}",
    tag = "clients",
    params(("id" = Uuid, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Fetch client", body = Client),
        (status = 404, description = "Client not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_client(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Client>, ApiError> {
    require_scope(&state, &headers, "clients", "read", Some(&id.to_string())).await?;
    match state.store.get_client(id).await {
        Ok(client) => Ok(Json(client)),
        Err(StoreError::NotFound(_)) => Err(api_not_found("client not found")),
        Err(err) => Err(api_internal("failed to fetch client", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/clients",
    tag = "clients",
    params(PageQuery),
    responses(
        (status = 200, description = "List clients", body = ClientListResponse)
    )
)]
pub(crate) async fn list_clients(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientListResponse>, ApiError> {
    require_scope(&state, &headers, "clients", "read", None).await?;
    validate_page(&page)?;
    let data = state
        .store
        .list_clients(page.offset, page.limit)
        .await
        .map_err(|err| api_internal("failed to list clients", &err))?;
    Ok(Json(ClientListResponse { data }))
}

#[utoipa::path(
    put,
    path = "/clients/{id}",
    tag = "clients",
    params(("id" = Uuid, Path, description = "Client identifier")),
    request_body = CreateClientRequest,
    responses(
        (status = 200, description = "Client updated; outstanding tokens are revoked", body = Client),
        (status = 404, description = "Client not found", body = crate::api::types::ErrorResponse),
        (status = 422, description = "Invalid name or scopes", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_client(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateClientRequest>,
) -> Result<Json<Client>, ApiError> {
    require_scope(&state, &headers, "clients", "update", Some(&id.to_string())).await?;
    let update = validate_client_request(&body)?;
    match state.store.update_client(id, update).await {
        Ok(client) => Ok(Json(client)),
        Err(StoreError::NotFound(_)) => Err(api_not_found("client not found")),
        Err(err) => Err(api_internal("failed to update client", &err)),
    }
}

#[utoipa::path(
    delete,
    path = "/clients/{id}",
    tag = "clients",
    params(("id" = Uuid, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 404, description = "Client not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_client(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_scope(&state, &headers, "clients", "delete", Some(&id.to_string())).await?;
    match state.store.delete_client(id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound(_)) => Err(api_not_found("client not found")),
        Err(err) => Err(api_internal("failed to delete client", &err)),
    }
}

#[utoipa::path(
    post,
    path = "/oauth/token",
    tag = "clients",
    request_body = TokenRequest,
    responses(
        (status = 201, description = "Access token issued", body = TokenResponse),
        (status = 401, description = "Invalid client credentials", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn issue_token(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(secret_key) = state.settings.auth_secret_key.as_deref() else {
        return Err(api_unauthorized("token issuance is not configured"));
    };
    let algorithm = token::parse_algorithm(&state.settings.auth_algorithm)
        .map_err(|_| api_internal_message("unsupported auth algorithm"))?;

    let client = match state.store.client_auth_view(body.client_id).await {
        Ok(client) => client,
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(client_id = %body.client_id, "token issuance failed: client not found");
            return Err(api_unauthorized("invalid client credentials"));
        }
        Err(err) => return Err(api_internal("failed to load client", &err)),
    };
    if !client.is_active {
        tracing::warn!(client_id = %client.id, "token issuance failed: client disabled");
        return Err(api_unauthorized("client disabled"));
    }
    if !secret::verify_secret(&body.client_secret, &client.secret_hash) {
        tracing::warn!(client_id = %client.id, "token issuance failed: invalid secret");
        return Err(api_unauthorized("invalid client credentials"));
    }

    let expires_in = state.settings.auth_access_token_expire_minutes * 60;
    let access_token = token::mint_token(
        secret_key,
        algorithm,
        &client.id.to_string(),
        &client.scopes,
        client.token_version,
        Duration::from_secs(expires_in as u64),
        chrono::Utc::now().timestamp(),
    )
    .map_err(|_| api_internal_message("failed to mint token"))?;

    tracing::info!(client_id = %client.id, scopes = %client.scopes, "jwt token issued");
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: client.scopes,
        }),
    ))
}
