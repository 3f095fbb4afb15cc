use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tokio::task::JoinError;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Kintone error: {0}")]
    Kintone(#[from] KintoneError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Remote query returned no records: {0}")]
    RemoteEmpty(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid record {record_ref_id}: {reason}")]
    InvalidRecord { record_ref_id: String, reason: String },

    #[error("Settlement already running")]
    SettlementInProgress,

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Remote API errors
#[derive(Error, Debug)]
pub enum KintoneError {
    #[error("Kintone API responded {status}: [{code}] {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to decode Kintone response: {0}")]
    Decode(String),

    #[error("Invalid totalCount in response: {0}")]
    InvalidTotalCount(String),

    #[error("Batch of {size} records exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Unknown Kintone app: {0}")]
    UnknownApp(String),
}

/// Composite student identity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Malformed student identity: {0:?}")]
    Malformed(String),

    #[error("Student identity has an empty part: {0:?}")]
    EmptyPart(String),

    #[error("Record has no reference id")]
    MissingRefId,
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Identity(e) => (
                StatusCode::BAD_REQUEST,
                "INVALID_IDENTITY",
                e.to_string(),
                None,
            ),
            AppError::InvalidRecord { record_ref_id, reason } => (
                StatusCode::BAD_REQUEST,
                "INVALID_RECORD",
                reason,
                Some(serde_json::json!({ "record_ref_id": record_ref_id })),
            ),
            AppError::InvalidInput(msg) | AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg,
                None,
            ),
            AppError::RemoteEmpty(what) => (
                StatusCode::NOT_FOUND,
                "REMOTE_EMPTY",
                format!("Remote query returned no records: {}", what),
                None,
            ),
            AppError::SettlementInProgress => (
                StatusCode::CONFLICT,
                "SETTLEMENT_IN_PROGRESS",
                "A settlement run is already in progress".to_string(),
                None,
            ),
            AppError::Kintone(KintoneError::Api { status, code, message }) => (
                StatusCode::BAD_GATEWAY,
                "KINTONE_API_ERROR",
                message,
                Some(serde_json::json!({ "status": status, "code": code })),
            ),
            AppError::Kintone(_) | AppError::ExternalError(_) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_ERROR",
                "The remote system could not be reached".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Kintone(KintoneError::Decode(error.to_string()))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<JoinError> for AppError {
    fn from(error: JoinError) -> Self {
        if error.is_panic() {
            AppError::Internal("Background task panicked".to_string())
        } else {
            AppError::Internal(format!("Background task failed: {:?}", error))
        }
    }
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    pub fn is_remote_empty(&self) -> bool {
        matches!(self, AppError::RemoteEmpty(_))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
