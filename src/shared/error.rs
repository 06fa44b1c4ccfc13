use std::fmt;
use thiserror::Error;

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Storage(String),
    Remote(RemoteStoreError),
    NotFound(String),
    InvalidInput(String),
    ValidationError(String),
    ConfigurationError(String),
    SerializationError(String),
    DeserializationError(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Remote(err) => write!(f, "Remote store error: {}", err),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<RemoteStoreError> for AppError {
    fn from(err: RemoteStoreError) -> Self {
        AppError::Remote(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// リモートストア（Supabase 等）呼び出しの失敗分類
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteStoreError {
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    #[error("Remote schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Remote store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Remote payload serialization failed: {0}")]
    Serialization(String),
}

impl RemoteStoreError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether the write should be queued for a later drain instead of failing.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::SchemaMismatch(_) => true,
            Self::Rejected { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Serialization(_) => false,
        }
    }

    /// 対象行がリモートに存在しない（0 行の PATCH など）。再送しても成功しない。
    pub fn is_missing_record(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }
}

impl From<serde_json::Error> for RemoteStoreError {
    fn from(err: serde_json::Error) -> Self {
        RemoteStoreError::Serialization(err.to_string())
    }
}
