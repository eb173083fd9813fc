use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("X-API-Key header is required")]
    MissingApiKey,

    #[error("The provided API key is not valid")]
    InvalidApiKey,

    #[error("Maximum {0} requests per minute allowed")]
    RateLimitExceeded(u32),

    #[error("{0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::MissingApiKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AppError::RateLimitExceeded(_) => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request data"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let body = Json(json!({
            "error": error,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_expected_status_codes() {
        let cases = [
            (AppError::MissingApiKey, StatusCode::UNAUTHORIZED),
            (AppError::InvalidApiKey, StatusCode::UNAUTHORIZED),
            (AppError::RateLimitExceeded(100), StatusCode::TOO_MANY_REQUESTS),
            (
                AppError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn rate_limit_message_names_the_cap() {
        assert_eq!(
            AppError::RateLimitExceeded(100).to_string(),
            "Maximum 100 requests per minute allowed"
        );
    }
}
