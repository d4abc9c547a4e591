// src/error.rs

use auth_sessions_api::ErrorResponse;

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use crate::cache::CacheError;
use crate::db::error::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    // === Erreurs d'Authentification ===
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email already exists")]
    EmailExists,

    // === Erreurs de Token ===
    #[error("Invalid token")]
    TokenInvalid,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token revoked")]
    TokenRevoked,
    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    // === Erreurs métier ===
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),

    // === Erreurs internes ===
    #[error("Database error: {0}")]
    Database(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the public error body.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::EmailExists => "EMAIL_EXISTS",
            AppError::TokenInvalid => "TOKEN_INVALID",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenRevoked => "TOKEN_REVOKED",
            AppError::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Infrastructure failures: opaque to callers, retried only by the transport.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_)
        )
    }

    /// Errors that should raise a security alert rather than a routine auth failure.
    pub fn is_security_event(&self) -> bool {
        matches!(self, AppError::TokenReuseDetected)
    }

    /// Builds the body callers see. Internal details are logged here and
    /// never returned; credential errors never say whether the email exists.
    pub fn to_error_response(&self) -> ErrorResponse {
        let message = match self {
            AppError::InvalidCredentials => "Invalid email or password".to_string(),
            AppError::EmailExists => "An account with this email already exists".to_string(),
            AppError::TokenInvalid => "Invalid token".to_string(),
            AppError::TokenExpired => "Token has expired".to_string(),
            AppError::TokenRevoked => "Token has been revoked".to_string(),
            AppError::TokenReuseDetected => {
                "Security notice: this session was used from more than one place and has been \
                 signed out on all devices. Please sign in again."
                    .to_string()
            }
            AppError::Forbidden(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Database(detail) | AppError::Cache(detail) | AppError::Internal(detail) => {
                tracing::error!(error_code = self.error_code(), detail, "Internal error");
                "An internal error occurred".to_string()
            }
        };

        ErrorResponse::new(self.error_code(), message)
    }

    // === Constructeurs helpers ===
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

// === Conversions automatiques depuis d'autres types d'erreurs ===

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::UniqueViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg)
            | RepositoryError::PoolError(msg)
            | RepositoryError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AppError::TokenExpired,
            JwtError::VerificationFailed(_)
            | JwtError::UnknownKey(_)
            | JwtError::WrongTokenType(_) => AppError::TokenInvalid,
            JwtError::GenerationFailed(_) | JwtError::KeyMaterial(_) | JwtError::Io(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Cache(err.to_string())
    }
}

impl From<rand_core::Error> for AppError {
    fn from(err: rand_core::Error) -> Self {
        AppError::internal(format!("Random source failed: {err}"))
    }
}
