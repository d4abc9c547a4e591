use crate::db::DbPool;
use crate::db::connection::run_blocking;
use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::schema::refresh_tokens;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// Durable refresh-token storage.
///
/// `mark_used` is the only arbiter of concurrent rotations: implementations
/// must make it a single conditional write, never read-then-write.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Inserts a record. `UniqueViolation` only on a token-hash collision.
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, RepositoryError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>, RepositoryError>;

    /// Claims the token for one rotation. Returns `false` unless the token was
    /// still valid (unused, unrevoked, unexpired) at the moment of the write.
    async fn mark_used(&self, id: Uuid, replaced_by_id: Uuid) -> Result<bool, RepositoryError>;

    /// Returns whether a row changed; revoking twice is not an error.
    async fn revoke_by_id(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn revoke_by_family_id(&self, family_id: Uuid) -> Result<usize, RepositoryError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, RepositoryError>;

    /// Currently valid tokens, newest first.
    async fn list_active_for_user(&self, user_id: Uuid)
    -> Result<Vec<RefreshToken>, RepositoryError>;

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

pub struct RefreshTokenRepository {
    pool: DbPool,
}

impl RefreshTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for RefreshTokenRepository {
    async fn create(&self, new_token: NewRefreshToken) -> Result<RefreshToken, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::insert_into(refresh_tokens::table)
                .values(&new_token)
                .returning(RefreshToken::as_returning())
                .get_result(conn)
                .map_err(Into::into)
        })
        .await
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<RefreshToken>, RepositoryError> {
        let hash = hash.to_string();
        run_blocking(&self.pool, move |conn| {
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(hash))
                .select(RefreshToken::as_select())
                .first(conn)
                .optional()
                .map_err(Into::into)
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            refresh_tokens::table
                .find(id)
                .select(RefreshToken::as_select())
                .first(conn)
                .optional()
                .map_err(Into::into)
        })
        .await
    }

    async fn mark_used(&self, id: Uuid, replaced_by_id: Uuid) -> Result<bool, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            let now = Utc::now();
            let updated = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::id.eq(id))
                    .filter(refresh_tokens::is_used.eq(false))
                    .filter(refresh_tokens::revoked_at.is_null())
                    .filter(refresh_tokens::expires_at.gt(now)),
            )
            .set((
                refresh_tokens::is_used.eq(true),
                refresh_tokens::used_at.eq(Some(now)),
                refresh_tokens::replaced_by_id.eq(Some(replaced_by_id)),
            ))
            .execute(conn)?;

            Ok(updated == 1)
        })
        .await
    }

    async fn revoke_by_id(&self, id: Uuid) -> Result<bool, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            let updated = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::id.eq(id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
            .execute(conn)?;

            Ok(updated == 1)
        })
        .await
    }

    async fn revoke_by_family_id(&self, family_id: Uuid) -> Result<usize, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::family_id.eq(family_id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
            .execute(conn)
            .map_err(Into::into)
        })
        .await
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::user_id.eq(user_id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
            .execute(conn)
            .map_err(Into::into)
        })
        .await
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshToken>, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null())
                .filter(refresh_tokens::is_used.eq(false))
                .filter(refresh_tokens::expires_at.gt(Utc::now()))
                .order(refresh_tokens::created_at.desc())
                .select(RefreshToken::as_select())
                .load(conn)
                .map_err(Into::into)
        })
        .await
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::delete(refresh_tokens::table.filter(refresh_tokens::expires_at.lt(cutoff)))
                .execute(conn)
                .map_err(Into::into)
        })
        .await
    }
}
