use crate::db::repositories::RefreshTokenStore;
use crate::error::AppError;
use auth_sessions_api::SessionResponse;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A user's active sessions, i.e. their currently valid refresh tokens.
pub struct SessionRegistry {
    tokens: Arc<dyn RefreshTokenStore>,
}

impl SessionRegistry {
    pub fn new(tokens: Arc<dyn RefreshTokenStore>) -> Self {
        Self { tokens }
    }

    /// Newest first. Used, revoked and expired tokens are not sessions.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<SessionResponse>, AppError> {
        let active = self.tokens.list_active_for_user(user_id).await?;
        Ok(active.into_iter().map(SessionResponse::from).collect())
    }

    /// Revokes one session owned by `user_id`. Revoking it twice is fine;
    /// someone else's session is `Forbidden`.
    pub async fn revoke(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AppError> {
        let session = self
            .tokens
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::not_found("Session not found"))?;

        if session.user_id != user_id {
            warn!(%user_id, %session_id, "Attempt to revoke another user's session");
            return Err(AppError::forbidden("Session belongs to another user"));
        }

        if self.tokens.revoke_by_id(session_id).await? {
            info!(%user_id, %session_id, "Session revoked");
        }
        Ok(())
    }
}
