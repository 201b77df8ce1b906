//! HTTP error mapping.
//!
//! Every handler returns `ApiResult<T>`; the conversion here is the only
//! place billing errors meet HTTP status codes. Server-side failures are
//! logged with detail but reported to clients with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatdesk_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Billing(err) => match err {
                BillingError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                BillingError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                BillingError::SignatureInvalid | BillingError::Payload(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                BillingError::GatewayUnavailable(_) | BillingError::Gateway(_) => (
                    StatusCode::BAD_GATEWAY,
                    "payment gateway error".to_string(),
                ),
                BillingError::Config(_)
                | BillingError::Invariant(_)
                | BillingError::Database(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": message,
        }));
        (status, body).into_response()
    }
}
