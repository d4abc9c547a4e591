use crate::auth::jwt::{Claims, JwtManager};
use crate::cache::AccessTokenDenylist;
use crate::db::repositories::UserDirectory;
use crate::error::AppError;
use std::sync::Arc;
use tracing::debug;

const BEARER: &str = "bearer ";

/// Extrait le token d'un header `Authorization: Bearer <JWT>`.
/// The scheme is matched case-insensitively.
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let authorization = authorization.trim();
    let scheme = authorization.get(..BEARER.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return None;
    }
    let token = authorization[BEARER.len()..].trim();
    (!token.is_empty()).then_some(token)
}

/// Role gate over claims that already passed `AccessTokenGuard::authenticate`.
pub fn require_role(claims: &Claims, roles: &[&str]) -> Result<(), AppError> {
    if claims.has_role(roles) {
        return Ok(());
    }
    debug!(user_id = %claims.sub, role = %claims.role, "Role not permitted");
    Err(AppError::forbidden("Insufficient permissions"))
}

/// Full access-token check for protected operations: signature and claims,
/// then the denylist, then the user's current token version.
pub struct AccessTokenGuard {
    jwt: JwtManager,
    users: Arc<dyn UserDirectory>,
    denylist: Arc<dyn AccessTokenDenylist>,
}

impl AccessTokenGuard {
    pub fn new(
        jwt: JwtManager,
        users: Arc<dyn UserDirectory>,
        denylist: Arc<dyn AccessTokenDenylist>,
    ) -> Self {
        Self {
            jwt,
            users,
            denylist,
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.jwt.verify_access_token(token)?;

        if self.denylist.is_denied(&claims.jti.to_string()).await? {
            debug!(jti = %claims.jti, "Access token is denylisted");
            return Err(AppError::TokenRevoked);
        }

        self.ensure_current_version(&claims).await?;
        Ok(claims)
    }

    /// Denies this access token until its natural expiry.
    pub async fn revoke(&self, claims: &Claims) -> Result<(), AppError> {
        self.denylist
            .deny(&claims.jti.to_string(), claims.expires_at())
            .await?;
        debug!(jti = %claims.jti, "Access token revoked");
        Ok(())
    }

    /// `authenticate`, then `require_role`.
    pub async fn authenticate_with_role(
        &self,
        token: &str,
        roles: &[&str],
    ) -> Result<Claims, AppError> {
        let claims = self.authenticate(token).await?;
        require_role(&claims, roles)?;
        Ok(claims)
    }

    /// `authenticate` on the raw `Authorization` header value.
    pub async fn authenticate_header(&self, authorization: &str) -> Result<Claims, AppError> {
        let token = bearer_token(authorization).ok_or(AppError::TokenInvalid)?;
        self.authenticate(token).await
    }

    /// Tokens minted before the last logout-all or password change carry a
    /// stale version. A deleted user has no valid version at all.
    pub async fn ensure_current_version(&self, claims: &Claims) -> Result<(), AppError> {
        let Some(user) = self.users.get_by_id(claims.sub).await? else {
            return Err(AppError::TokenRevoked);
        };
        if claims.token_version < user.token_version {
            debug!(
                user_id = %claims.sub,
                claim_version = claims.token_version,
                current_version = user.token_version,
                "Access token version is stale"
            );
            return Err(AppError::TokenRevoked);
        }
        Ok(())
    }
}
