//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: entity {entity} column {column}")]
    InvalidPrimaryKey { entity: String, column: String },
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    #[error("duplicate column {column} on {entity}")]
    DuplicateColumn { entity: String, column: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Invalid Id Value: {0}")]
    InvalidIdValue(String),
    #[error("You can't `{action}` the `{subject}`")]
    Forbidden { action: String, subject: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("InvalidRole: {0}")]
    InvalidRole(i64),
    #[error("UserNotFound: {0}")]
    UserNotFound(i64),
    #[error("{path}: {message}")]
    Validation { path: String, message: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Store(String),
}

impl AppError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(action: impl Into<String>, subject: impl Into<String>) -> Self {
        AppError::Forbidden {
            action: action.into(),
            subject: subject.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_and_code().0
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::ResourceNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidIdValue(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
            AppError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InvalidRole(_) => (StatusCode::FORBIDDEN, "invalid_role"),
            AppError::UserNotFound(_) => (StatusCode::FORBIDDEN, "user_not_found"),
            AppError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        }
    }
}

/// Recover an error shared between the waiters of one computation.
impl From<Arc<AppError>> for AppError {
    fn from(shared: Arc<AppError>) -> Self {
        Arc::try_unwrap(shared).unwrap_or_else(|shared| match &*shared {
            AppError::UserNotFound(id) => AppError::UserNotFound(*id),
            AppError::InvalidRole(role) => AppError::InvalidRole(*role),
            AppError::Unauthorized => AppError::Unauthorized,
            AppError::Store(message) => AppError::Store(message.clone()),
            other => AppError::Store(other.to_string()),
        })
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }
        let details = match &self {
            AppError::Validation { path, .. } => Some(serde_json::json!({ "path": path })),
            AppError::Forbidden { action, subject } => {
                Some(serde_json::json!({ "action": action, "subject": subject }))
            }
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
