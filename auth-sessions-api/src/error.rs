use serde::{Deserialize, Serialize};

/// Body returned for every failed token or session operation.
///
/// `error` is a stable machine code (`TOKEN_REUSE_DETECTED`, `TOKEN_EXPIRED`, ...)
/// that clients branch on; `message` is for humans.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }
}
