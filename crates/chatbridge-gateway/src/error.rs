use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatbridge_upstream::{RelayError, UpstreamError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Gateway server error: {0}")]
    ServerError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Relay(RelayError::Credential(_)) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Relay(RelayError::Upstream(UpstreamError::Status { status, .. })) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Relay(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "invalid_api_key",
            GatewayError::BadRequest(_) => "invalid_request",
            GatewayError::Relay(RelayError::Credential(_)) => "credential_unavailable",
            GatewayError::Relay(RelayError::RejectedAfterRefresh { .. }) => "upstream_auth_rejected",
            GatewayError::Relay(RelayError::Upstream(UpstreamError::Status { .. })) => {
                "upstream_error"
            }
            GatewayError::Relay(_) => "upstream_unreachable",
            GatewayError::ServerError(_) => "server_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = if status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": error_type,
                    "code": self.code(),
                }
            })),
        )
            .into_response()
    }
}
