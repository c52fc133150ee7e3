//! Error types for decoding check configurations

use thiserror::Error;

use super::CheckType;

/// Reasons a configuration message or a single check record is rejected
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown check type `{0}`")]
    UnknownType(String),

    #[error("{check_type} check is missing field `{field}`")]
    MissingField {
        check_type: CheckType,
        field: &'static str,
    },

    #[error("{check_type} check does not declare field `{field}`")]
    UnknownField { check_type: CheckType, field: String },

    #[error("invalid {check_type} check: {reason}")]
    InvalidValue { check_type: CheckType, reason: String },

    #[error("{check_type} check field `{field}` must be between {min} and {max}, got {value}")]
    OutOfRange {
        check_type: CheckType,
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("malformed configuration message: {0}")]
    Malformed(String),

    #[error("configuration message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
