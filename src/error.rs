// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Locally detected input problem; never reaches the backend.
    #[error("{0}")]
    Validation(String),

    /// Verification code request rejected (bot check, bad number, quota).
    #[error("{0}")]
    Challenge(String),

    /// Submitted SMS code rejected or challenge expired.
    #[error("{0}")]
    Confirmation(String),

    /// Profile write failed.
    #[error("{0}")]
    Persistence(String),

    /// Live coupon query failed.
    #[error("{0}")]
    Subscription(String),

    /// The requested action is not available in the current state.
    #[error("{0}")]
    Busy(String),

    #[error("Identity API error: {0}")]
    IdentityApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Identity Toolkit rate-limit marker.
    pub const RATE_LIMITED: &'static str = "TOO_MANY_ATTEMPTS_TRY_LATER";

    /// Human-readable text shown inline in the component views.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Challenge(msg)
            | AppError::Confirmation(msg)
            | AppError::Persistence(msg)
            | AppError::Subscription(msg)
            | AppError::Busy(msg) => msg.clone(),
            AppError::Database(_) | AppError::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether this is a backend rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::Challenge(msg) | AppError::IdentityApi(msg) => {
                msg.contains(Self::RATE_LIMITED) || msg.to_lowercase().contains("too many")
            }
            _ => false,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let rate_limited = self.is_rate_limited();
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }
            AppError::Challenge(msg) if rate_limited => (
                StatusCode::TOO_MANY_REQUESTS,
                "challenge_error",
                Some(msg.clone()),
            ),
            AppError::Challenge(msg) => {
                (StatusCode::BAD_REQUEST, "challenge_error", Some(msg.clone()))
            }
            AppError::Confirmation(msg) => (
                StatusCode::BAD_REQUEST,
                "confirmation_error",
                Some(msg.clone()),
            ),
            AppError::Persistence(msg) => {
                tracing::warn!(error = %msg, "Profile save failed");
                (StatusCode::BAD_GATEWAY, "persistence_error", Some(msg.clone()))
            }
            AppError::Subscription(msg) => (
                StatusCode::BAD_GATEWAY,
                "subscription_error",
                Some(msg.clone()),
            ),
            AppError::Busy(msg) => (StatusCode::CONFLICT, "busy", Some(msg.clone())),
            AppError::IdentityApi(msg) => {
                (StatusCode::BAD_GATEWAY, "identity_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
