//! OpenAPI document assembled from the handler annotations.
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fastpubsub",
        description = "Durable pub/sub broker backed by PostgreSQL."
    ),
    paths(
        crate::api::topics::create_topic,
        crate::api::topics::get_topic,
        crate::api::topics::list_topics,
        crate::api::topics::delete_topic,
        crate::api::topics::publish_messages,
        crate::api::subscriptions::create_subscription,
        crate::api::subscriptions::get_subscription,
        crate::api::subscriptions::list_subscriptions,
        crate::api::subscriptions::delete_subscription,
        crate::api::subscriptions::consume_messages,
        crate::api::subscriptions::ack_messages,
        crate::api::subscriptions::nack_messages,
        crate::api::subscriptions::list_dlq,
        crate::api::subscriptions::reprocess_dlq,
        crate::api::subscriptions::subscription_metrics,
        crate::api::clients::create_client,
        crate::api::clients::get_client,
        crate::api::clients::list_clients,
        crate::api::clients::update_client,
        crate::api::clients::delete_client,
        crate::api::clients::issue_token,
        crate::api::monitoring::liveness,
        crate::api::monitoring::readiness,
        crate::api::monitoring::metrics,
    ),
    components(schemas(
        crate::model::Topic,
        crate::model::Subscription,
        crate::model::Message,
        crate::model::SubscriptionMetrics,
        crate::model::Client,
        crate::api::types::ErrorResponse,
        crate::api::types::CreateTopicRequest,
        crate::api::types::TopicListResponse,
        crate::api::types::CreateSubscriptionRequest,
        crate::api::types::SubscriptionListResponse,
        crate::api::types::MessageListResponse,
        crate::api::types::HealthResponse,
        crate::api::types::CreateClientRequest,
        crate::api::types::CreateClientResponse,
        crate::api::types::ClientListResponse,
        crate::api::types::TokenRequest,
        crate::api::types::TokenResponse,
    )),
    tags(
        (name = "topics", description = "Operations with topics."),
        (name = "subscriptions", description = "Operations with subscriptions."),
        (name = "clients", description = "Operations with clients."),
        (name = "monitoring", description = "Operations with monitoring.")
    )
)]
pub struct ApiDoc;
