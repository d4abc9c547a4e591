use crate::db::DbPool;
use crate::db::connection::run_blocking;
use crate::db::error::RepositoryError;
use crate::db::models::user::{NewUser, User, UserInfo};
use crate::db::schema::users;
use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

/// The user directory as seen by the token core. It owns the per-user
/// token-version counter; the core only reads and bumps it.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserInfo>, RepositoryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserInfo>, RepositoryError>;

    /// `UniqueViolation` when the email is taken.
    async fn create(&self, new_user: NewUser) -> Result<UserInfo, RepositoryError>;

    async fn increment_token_version(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn update_password(&self, id: Uuid, password_hash: &str)
    -> Result<(), RepositoryError>;
}

pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Supprimer un utilisateur
    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::delete(users::table.filter(users::id.eq(id))).execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserInfo>, RepositoryError> {
        let email = email.to_string();
        run_blocking(&self.pool, move |conn| {
            users::table
                .filter(users::email.eq(email))
                .select(User::as_select())
                .first(conn)
                .optional()
                .map(|user| user.map(UserInfo::from))
                .map_err(Into::into)
        })
        .await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserInfo>, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            users::table
                .find(id)
                .select(User::as_select())
                .first(conn)
                .optional()
                .map(|user| user.map(UserInfo::from))
                .map_err(Into::into)
        })
        .await
    }

    async fn create(&self, new_user: NewUser) -> Result<UserInfo, RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            diesel::insert_into(users::table)
                .values(&new_user)
                .returning(User::as_returning())
                .get_result(conn)
                .map(UserInfo::from)
                .map_err(Into::into)
        })
        .await
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<(), RepositoryError> {
        run_blocking(&self.pool, move |conn| {
            let updated = diesel::update(users::table.filter(users::id.eq(id)))
                .set((
                    users::token_version.eq(users::token_version + 1),
                    users::updated_at.eq(chrono::Utc::now()),
                ))
                .execute(conn)?;

            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RepositoryError> {
        let password_hash = password_hash.to_string();
        run_blocking(&self.pool, move |conn| {
            let updated = diesel::update(users::table.filter(users::id.eq(id)))
                .set((
                    users::password_hash.eq(password_hash),
                    users::updated_at.eq(chrono::Utc::now()),
                ))
                .execute(conn)?;

            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
        .await
    }
}
