//! Error types for the review engine

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::review::WorkItemStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid transition from {} to {}", current.as_str(), requested.as_str())]
    InvalidTransition {
        current: WorkItemStatus,
        requested: WorkItemStatus,
    },

    #[error("Actor is not the assignee of this work item")]
    NotAssignee,

    #[error("A revision request needs notes or attachments")]
    EmptyFeedback,

    #[error("This delivery batch already has a decision")]
    AlreadyDecided,

    /// Unknown, expired and revoked review links all collapse into this variant.
    #[error("Review link is invalid")]
    InvalidLink,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::NotAssignee => "not_assignee",
            AppError::EmptyFeedback => "empty_feedback",
            AppError::AlreadyDecided => "already_decided",
            AppError::InvalidLink => "invalid",
            AppError::NotFound(_) => "not_found",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::Validation(_) => "validation",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::NotAssignee => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::EmptyFeedback => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::AlreadyDecided => (StatusCode::CONFLICT, self.to_string()),
            AppError::InvalidLink => (
                StatusCode::GONE,
                "This review link is no longer available".to_string(),
            ),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::StorageUnavailable(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable".to_string(),
                )
            }
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
