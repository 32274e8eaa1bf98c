//! Broker HTTP API module.
//!
//! # Purpose
//! Exposes the route handler modules plus the shared validation helpers
//! used across topic and subscription endpoints.
//!
//! # Key invariants
//! - Resource existence checks happen before engine operations so the
//!   wire contract's 404s are consistent.
//! - Error shapes are standardized via `api::error`.
pub mod clients;
pub mod error;
pub mod monitoring;
pub mod openapi;
pub mod subscriptions;
pub mod topics;
pub mod types;

use crate::api::error::{api_internal, api_not_found, api_validation_error, ApiError};
use crate::api::types::PageQuery;
use crate::app::AppState;
use crate::model::Subscription;
use crate::store::StoreError;

/// Ensure a subscription exists before an engine operation, returning it
/// so handlers can reuse the policy fields without a second lookup.
pub(crate) async fn ensure_subscription(
    state: &AppState,
    subscription_id: &str,
) -> Result<Subscription, ApiError> {
    match state.store.get_subscription(subscription_id).await {
        Ok(subscription) => Ok(subscription),
        Err(StoreError::NotFound(_)) => Err(api_not_found("subscription not found")),
        Err(err) => Err(api_internal("failed to fetch subscription", &err)),
    }
}

/// Validate paging parameters shared by every list endpoint.
pub(crate) fn validate_page(page: &PageQuery) -> Result<(), ApiError> {
    if page.offset < 0 {
        return Err(api_validation_error("offset must be >= 0"));
    }
    if !(1..=100).contains(&page.limit) {
        return Err(api_validation_error("limit must be between 1 and 100"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_state;

    #[tokio::test]
    async fn ensure_subscription_returns_not_found() {
        let state = test_state();
        let err = ensure_subscription(&state, "missing").await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn page_validation_bounds() {
        assert!(validate_page(&PageQuery {
            offset: 0,
            limit: 10
        })
        .is_ok());
        assert!(validate_page(&PageQuery {
            offset: -1,
            limit: 10
        })
        .is_err());
        assert!(validate_page(&PageQuery {
            offset: 0,
            limit: 0
        })
        .is_err());
        assert!(validate_page(&PageQuery {
            offset: 0,
            limit: 101
        })
        .is_err());
    }
}
