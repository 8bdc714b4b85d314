use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fin_llm::LlmError;
use fin_quota::QuotaError;
use serde::Serialize;

use crate::auth::AuthError;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> (StatusCode, Self) {
        (StatusCode::BAD_REQUEST, Self::new("BAD_REQUEST", message))
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{} not found", resource))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message).retryable()
    }

    pub fn configuration(message: impl Into<String>) -> (StatusCode, Self) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Self::new(
                "CONFIGURATION_ERROR",
                format!("Server configuration error: {}", message.into()),
            ),
        )
    }

    pub fn auth(err: &AuthError) -> (StatusCode, Self) {
        match err {
            AuthError::MissingCredential => (
                StatusCode::UNAUTHORIZED,
                Self::new("UNAUTHORIZED", "Authentication required"),
            ),
            AuthError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                Self::new("INVALID_TOKEN", "Invalid or expired token"),
            ),
            AuthError::NotConfigured => Self::configuration("identity provider is not configured"),
            AuthError::KeysUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Self::new("AUTH_UNAVAILABLE", "Unable to verify credentials right now").retryable(),
            ),
        }
    }

    pub fn quota(err: &QuotaError) -> (StatusCode, Self) {
        match err {
            QuotaError::QuotaExceeded(denied) => (
                StatusCode::TOO_MANY_REQUESTS,
                Self::new(
                    err.error_code(),
                    format!(
                        "You've used {} of {} AI queries this month. Upgrade to continue.",
                        denied.used, denied.limit
                    ),
                )
                .with_details(serde_json::json!({
                    "used": denied.used,
                    "limit": denied.limit,
                    "tier": denied.tier,
                    "upgradeUrl": "/pricing",
                })),
            ),
            QuotaError::AccountNotFound(_) => (StatusCode::NOT_FOUND, Self::not_found("User")),
            QuotaError::DuplicateIdentity(_) | QuotaError::Persistence(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Self::new("PERSISTENCE_ERROR", "Failed to track usage").retryable(),
            ),
        }
    }

    pub fn llm(err: &LlmError) -> (StatusCode, Self) {
        match err {
            LlmError::NotConfigured(msg) => Self::configuration(msg.clone()),
            LlmError::Upstream { status, details } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                Self::new("UPSTREAM_ERROR", "Generation provider returned an error")
                    .with_details(serde_json::json!({ "status": status, "body": details })),
            ),
            LlmError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Self::new("UPSTREAM_TIMEOUT", "Generation provider timed out").retryable(),
            ),
            LlmError::Transport(msg) | LlmError::InvalidResponse(msg) => (
                StatusCode::BAD_GATEWAY,
                Self::new("UPSTREAM_ERROR", "Failed to reach generation provider")
                    .with_details(serde_json::json!({ "reason": msg })),
            ),
        }
    }
}

#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        (self.status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<(StatusCode, ApiError)> for ApiErrorResponse {
    fn from((status, error): (StatusCode, ApiError)) -> Self {
        Self { status, error }
    }
}
