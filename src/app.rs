//! HTTP application wiring.
//!
//! # Purpose
//! Builds the axum router, configures the tracing middleware, and defines
//! the shared application state injected into handlers.
//!
//! # Notes
//! Route composition lives here so `main` stays a thin CLI shell and the
//! test suite can mount the full router over an in-memory store.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::config::Settings;
use crate::observability;
use crate::store::BrokerStore;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BrokerStore>,
    pub settings: Arc<Settings>,
    pub metrics: PrometheusHandle,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/topics",
            axum::routing::get(api::topics::list_topics).post(api::topics::create_topic),
        )
        .route(
            "/topics/:id",
            axum::routing::get(api::topics::get_topic).delete(api::topics::delete_topic),
        )
        .route(
            "/topics/:id/messages",
            axum::routing::post(api::topics::publish_messages),
        )
        .route(
            "/subscriptions",
            axum::routing::get(api::subscriptions::list_subscriptions)
                .post(api::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/:id",
            axum::routing::get(api::subscriptions::get_subscription)
                .delete(api::subscriptions::delete_subscription),
        )
        .route(
            "/subscriptions/:id/messages",
            axum::routing::get(api::subscriptions::consume_messages),
        )
        .route(
            "/subscriptions/:id/acks",
            axum::routing::post(api::subscriptions::ack_messages),
        )
        .route(
            "/subscriptions/:id/nacks",
            axum::routing::post(api::subscriptions::nack_messages),
        )
        .route(
            "/subscriptions/:id/dlq",
            axum::routing::get(api::subscriptions::list_dlq),
        )
        .route(
            "/subscriptions/:id/dlq/reprocess",
            axum::routing::post(api::subscriptions::reprocess_dlq),
        )
        .route(
            "/subscriptions/:id/metrics",
            axum::routing::get(api::subscriptions::subscription_metrics),
        )
        .route(
            "/clients",
            axum::routing::get(api::clients::list_clients).post(api::clients::create_client),
        )
        .route(
            "/clients/:id",
            axum::routing::get(api::clients::get_client)
                .put(api::clients::update_client)
                .delete(api::clients::delete_client),
        )
        .route("/oauth/token", axum::routing::post(api::clients::issue_token))
        .route("/liveness", axum::routing::get(api::monitoring::liveness))
        .route("/readiness", axum::routing::get(api::monitoring::readiness))
        .route("/metrics", axum::routing::get(api::monitoring::metrics))
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    AppState {
        store: Arc::new(crate::store::memory::InMemoryStore::new()),
        settings: Arc::new(Settings::default()),
        metrics: observability::metrics_handle(),
    }
}
