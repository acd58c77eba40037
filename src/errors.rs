use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION_REJECTED: {0}")]
    ValidationRejected(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("AUTH_EXPIRED: {0}")]
    AuthExpired(String),
    #[error("TRANSPORT_FAILURE: {0}")]
    Transport(String),
    #[error("PRECONDITION_FAILED: {0}")]
    Precondition(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationRejected(_) => "VALIDATION_REJECTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AuthExpired(_) => "AUTH_EXPIRED",
            Self::Transport(_) => "TRANSPORT_FAILURE",
            Self::Precondition(_) => "PRECONDITION_FAILED",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(crate::redaction::redact_secrets(&value.to_string()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Transport(crate::redaction::redact_secrets(&value.to_string()))
    }
}

pub type AppResult<T> = Result<T, AppError>;
