// src/auth/services.rs

use crate::auth::jwt::JwtManager;
use crate::auth::password::PasswordManager;
use crate::auth::secret::{RefreshSecret, hash_token};
use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken, TokenStatus};
use crate::db::models::user::{NewUser, UserInfo};
use crate::db::repositories::{RefreshTokenStore, UserDirectory};
use crate::error::AppError;
use auth_sessions_api::{
    AuthResponse, ChangePasswordRequest, DeviceContext, LoginRequest, RegisterRequest,
    TokenResponse, UserResponse,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Issues, rotates and revokes token pairs.
///
/// Each login starts a token family. Every refresh consumes the presented
/// token and issues its successor in the same family; presenting a consumed
/// token again revokes the whole family.
pub struct AuthService {
    tokens: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserDirectory>,
    jwt: JwtManager,
    passwords: PasswordManager,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(
        tokens: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserDirectory>,
        jwt: JwtManager,
        passwords: PasswordManager,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            tokens,
            users,
            jwt,
            passwords,
            refresh_ttl,
        }
    }

    /// Inscription d'un nouvel utilisateur, connecté dans la foulée
    pub async fn register(
        &self,
        request: RegisterRequest,
        device: &DeviceContext,
    ) -> Result<AuthResponse, AppError> {
        let password_hash = self.passwords.hash_blocking(request.password).await?;

        let user = match self
            .users
            .create(NewUser::new(request.email, request.name, password_hash))
            .await
        {
            Ok(user) => user,
            Err(RepositoryError::UniqueViolation(_)) => return Err(AppError::EmailExists),
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user.id, "User registered");
        self.start_family(&user, device).await
    }

    /// Connexion: unknown email and wrong password are indistinguishable,
    /// in the response and in the time it takes.
    pub async fn login(
        &self,
        request: &LoginRequest,
        device: &DeviceContext,
    ) -> Result<AuthResponse, AppError> {
        let user = self.users.get_by_email(&request.email).await?;
        let check = self
            .passwords
            .verify_blocking(
                request.password.clone(),
                user.as_ref().map(|u| u.password_hash.clone()),
            )
            .await?;

        let Some(user) = user.filter(|_| check.valid) else {
            debug!("Login rejected");
            return Err(AppError::InvalidCredentials);
        };

        if let Some(new_hash) = check.rehash {
            match self.users.update_password(user.id, &new_hash).await {
                Ok(()) => debug!(user_id = %user.id, "Password hash upgraded"),
                Err(e) => warn!(user_id = %user.id, "Failed to upgrade password hash: {e}"),
            }
        }

        info!(user_id = %user.id, "User logged in");
        self.start_family(&user, device).await
    }

    /// Rotates a refresh token.
    ///
    /// The conditional `mark_used` is the single point where concurrent
    /// rotations of the same token are decided: exactly one caller claims it,
    /// every other caller is treated as a replay.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device: &DeviceContext,
    ) -> Result<AuthResponse, AppError> {
        if refresh_token.is_empty() {
            return Err(AppError::TokenInvalid);
        }

        let stored = self
            .tokens
            .find_by_hash(&hash_token(refresh_token))
            .await?
            .ok_or(AppError::TokenInvalid)?;

        match stored.status_at(Utc::now()) {
            TokenStatus::Used => return Err(self.revoke_family_on_reuse(&stored).await),
            TokenStatus::Revoked => return Err(AppError::TokenRevoked),
            TokenStatus::Expired => return Err(AppError::TokenExpired),
            TokenStatus::Valid => {}
        }

        let successor_id = Uuid::new_v4();
        if !self.tokens.mark_used(stored.id, successor_id).await? {
            return Err(self.lost_claim(&stored).await);
        }

        let user = self
            .users
            .get_by_id(stored.user_id)
            .await?
            .ok_or(AppError::TokenRevoked)?;

        let response = self
            .issue_pair(&user, successor_id, stored.family_id, device)
            .await?;

        // A replay can revoke the family between our claim and the insert
        // above, in which case the successor escaped the revocation. The
        // rotation itself stands; the pair it returns is already dead.
        if let Some(current) = self.tokens.find_by_id(stored.id).await?
            && current.is_revoked()
        {
            warn!(
                family_id = %stored.family_id,
                "Predecessor revoked during rotation, revoking successor"
            );
            self.tokens.revoke_by_family_id(stored.family_id).await?;
        }

        debug!(user_id = %user.id, family_id = %stored.family_id, "Refresh token rotated");
        Ok(response)
    }

    /// Revokes one refresh token. Unknown tokens are already logged out.
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AppError> {
        let Some(stored) = self.tokens.find_by_hash(&hash_token(refresh_token)).await? else {
            debug!(%user_id, "Logout with unknown refresh token");
            return Ok(());
        };

        if stored.user_id != user_id {
            warn!(%user_id, owner = %stored.user_id, "Logout attempted with another user's token");
            return Err(AppError::forbidden("Refresh token belongs to another user"));
        }

        self.tokens.revoke_by_id(stored.id).await?;
        info!(%user_id, session_id = %stored.id, "User logged out");
        Ok(())
    }

    /// Revokes every refresh token of the user, then bumps the token version
    /// so outstanding access tokens stop verifying too.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<(), AppError> {
        let revoked = self.tokens.revoke_all_for_user(user_id).await?;
        self.users.increment_token_version(user_id).await?;
        info!(%user_id, revoked, "User logged out everywhere");
        Ok(())
    }

    /// Change le mot de passe puis déconnecte toutes les sessions
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: &ChangePasswordRequest,
    ) -> Result<(), AppError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let check = self
            .passwords
            .verify_blocking(request.current_password.clone(), Some(user.password_hash))
            .await?;
        if !check.valid {
            return Err(AppError::InvalidCredentials);
        }

        let new_hash = self.passwords.hash_blocking(request.new_password.clone()).await?;
        self.users.update_password(user_id, &new_hash).await?;
        info!(%user_id, "Password changed");

        self.logout_all(user_id).await
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<UserResponse, AppError> {
        self.users
            .get_by_id(user_id)
            .await?
            .map(UserResponse::from)
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn start_family(
        &self,
        user: &UserInfo,
        device: &DeviceContext,
    ) -> Result<AuthResponse, AppError> {
        self.issue_pair(user, Uuid::new_v4(), Uuid::new_v4(), device)
            .await
    }

    async fn issue_pair(
        &self,
        user: &UserInfo,
        token_id: Uuid,
        family_id: Uuid,
        device: &DeviceContext,
    ) -> Result<AuthResponse, AppError> {
        let access = self.jwt.issue_access_token(user)?;
        let secret = RefreshSecret::generate()?;

        let record = NewRefreshToken::new(
            user.id,
            secret.hash,
            family_id,
            Utc::now() + self.refresh_ttl,
            device,
        )
        .with_id(token_id);
        self.tokens.create(record).await?;

        Ok(AuthResponse {
            user: user.clone().into(),
            tokens: TokenResponse {
                access_token: access.token,
                refresh_token: secret.token,
                token_type: TOKEN_TYPE_BEARER.to_string(),
                expires_in: self.jwt.access_ttl().num_seconds(),
                expires_at: access.claims.expires_at(),
            },
        })
    }

    /// The conditional claim failed: the token changed state after it was
    /// read. Only a concurrent consumption counts as reuse.
    async fn lost_claim(&self, token: &RefreshToken) -> AppError {
        let current = match self.tokens.find_by_id(token.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return AppError::TokenInvalid,
            Err(e) => return e.into(),
        };

        match current.status_at(Utc::now()) {
            TokenStatus::Used => self.revoke_family_on_reuse(&current).await,
            TokenStatus::Revoked => AppError::TokenRevoked,
            TokenStatus::Expired => AppError::TokenExpired,
            TokenStatus::Valid => {
                error!(token_id = %token.id, "Refresh token claim failed on a valid token");
                AppError::internal("refresh token claim failed")
            }
        }
    }

    /// Revokes the family of a replayed token. The reuse error is only
    /// reported once the revocation has been persisted.
    async fn revoke_family_on_reuse(&self, token: &RefreshToken) -> AppError {
        warn!(
            security_event = "refresh_token_reuse",
            user_id = %token.user_id,
            family_id = %token.family_id,
            token_id = %token.id,
            "Refresh token reuse detected, revoking family"
        );

        match self.tokens.revoke_by_family_id(token.family_id).await {
            Ok(revoked) => {
                info!(family_id = %token.family_id, revoked, "Token family revoked");
                AppError::TokenReuseDetected
            }
            Err(e) => {
                error!(
                    security_event = "refresh_token_reuse",
                    family_id = %token.family_id,
                    "Failed to revoke token family: {e}"
                );
                e.into()
            }
        }
    }
}
