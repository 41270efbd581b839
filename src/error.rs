use crate::academics::{EvaluationError, PromotionError, RecordError, TransferError};
use crate::config::ConfigError;
use crate::rules::RuleError;
use crate::telemetry::TelemetryError;
use serde::Serialize;
use std::fmt;

/// Caller-facing classification of lifecycle failures.
///
/// Eligibility failures are kept apart from hard constraint violations so a host can offer an
/// override path for the former and must surface the latter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    StateConflict,
    Eligibility,
    Duplicate,
    Infrastructure,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Eligibility => "eligibility",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

/// Error enumeration for persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("stale write rejected for {0}")]
    Stale(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Conflict(_) => ErrorKind::Duplicate,
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::Stale(_) => ErrorKind::StateConflict,
            RepositoryError::Unavailable(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Host-level error covering startup, I/O, and lifecycle failures.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Csv(csv::Error),
    Repository(RepositoryError),
    Rules(RuleError),
    Records(RecordError),
    Evaluation(EvaluationError),
    Promotion(PromotionError),
    Transfer(TransferError),
    Input(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Rules(err) => err.kind(),
            AppError::Repository(err) => err.kind(),
            AppError::Records(err) => err.kind(),
            AppError::Evaluation(err) => err.kind(),
            AppError::Promotion(err) => err.kind(),
            AppError::Transfer(err) => err.kind(),
            AppError::Input(_) | AppError::Csv(_) => ErrorKind::Validation,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => ErrorKind::Infrastructure,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Serialization(err) => write!(f, "serialization error: {}", err),
            AppError::Csv(err) => write!(f, "csv error: {}", err),
            AppError::Repository(err) => write!(f, "repository error: {}", err),
            AppError::Rules(err) => write!(f, "rule error: {}", err),
            AppError::Records(err) => write!(f, "record error: {}", err),
            AppError::Evaluation(err) => write!(f, "evaluation error: {}", err),
            AppError::Promotion(err) => write!(f, "promotion error: {}", err),
            AppError::Transfer(err) => write!(f, "transfer error: {}", err),
            AppError::Input(message) => write!(f, "invalid input: {}", message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Serialization(err) => Some(err),
            AppError::Csv(err) => Some(err),
            AppError::Repository(err) => Some(err),
            AppError::Rules(err) => Some(err),
            AppError::Records(err) => Some(err),
            AppError::Evaluation(err) => Some(err),
            AppError::Promotion(err) => Some(err),
            AppError::Transfer(err) => Some(err),
            AppError::Input(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}

impl From<RuleError> for AppError {
    fn from(value: RuleError) -> Self {
        Self::Rules(value)
    }
}

impl From<RecordError> for AppError {
    fn from(value: RecordError) -> Self {
        Self::Records(value)
    }
}

impl From<EvaluationError> for AppError {
    fn from(value: EvaluationError) -> Self {
        Self::Evaluation(value)
    }
}

impl From<PromotionError> for AppError {
    fn from(value: PromotionError) -> Self {
        Self::Promotion(value)
    }
}

impl From<TransferError> for AppError {
    fn from(value: TransferError) -> Self {
        Self::Transfer(value)
    }
}
