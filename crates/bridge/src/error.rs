//! Crate-wide error taxonomy and its HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::frame::FrameError;

/// Every error kind the gateway can surface, mapped to an HTTP status and a client-facing
/// error body shaped for whichever protocol endpoint raised it.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamNon2xx { status: StatusCode, body: String },

    #[error("all configured credentials failed")]
    AllCredentialsFailed,

    #[error("credential refresh failed: {0}")]
    RefreshFailure(String),

    #[error("request body was invalid: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("upstream request failed: {0}")]
    UpstreamTransport(#[from] reqwest::Error),
}

impl GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UpstreamNon2xx { status, .. } => *status,
            GatewayError::AllCredentialsFailed => StatusCode::BAD_GATEWAY,
            GatewayError::RefreshFailure(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Frame(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::UpstreamNon2xx { .. } => "api_error",
            GatewayError::AllCredentialsFailed => "overloaded_error",
            GatewayError::RefreshFailure(_) => "authentication_error",
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Unauthorized => "authentication_error",
            GatewayError::Frame(_) => "api_error",
            GatewayError::UpstreamTransport(_) => "api_error",
        }
    }
}

#[derive(Serialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    kind: &'static str,
    error: AnthropicErrorDetails,
}

#[derive(Serialize)]
struct AnthropicErrorDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetails,
}

#[derive(Serialize)]
struct OpenAiErrorDetails {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Wraps a [`GatewayError`] to render it in the Anthropic error-body shape.
pub struct AsAnthropicError(pub GatewayError);

impl IntoResponse for AsAnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = AnthropicErrorBody {
            kind: "error",
            error: AnthropicErrorDetails {
                kind: self.0.error_type(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Wraps a [`GatewayError`] to render it in the OpenAI error-body shape.
pub struct AsOpenAiError(pub GatewayError);

impl IntoResponse for AsOpenAiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = OpenAiErrorBody {
            error: OpenAiErrorDetails {
                message: self.0.to_string(),
                kind: self.0.error_type(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        AsAnthropicError(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(GatewayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn invalid_request_maps_to_400() {
        assert_eq!(
            GatewayError::InvalidRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn all_credentials_failed_maps_to_502() {
        assert_eq!(GatewayError::AllCredentialsFailed.status_code(), StatusCode::BAD_GATEWAY);
    }
}
