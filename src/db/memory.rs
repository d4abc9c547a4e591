//! In-process implementations of the store and the user directory.
//!
//! They honour the same atomicity contract as the Postgres repositories
//! (every operation runs under one lock acquisition), which makes them
//! suitable for tests and single-process development.

use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::models::user::{NewUser, UserInfo};
use crate::db::repositories::{RefreshTokenStore, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::DatabaseError("in-memory store poisoned".to_string()))
}

#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    tokens: Mutex<HashMap<Uuid, RefreshToken>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, regardless of state. Used to inspect families in tests.
    pub fn snapshot(&self) -> Result<Vec<RefreshToken>, RepositoryError> {
        Ok(lock(&self.tokens)?.values().cloned().collect())
    }

    fn revoke_where(&self, predicate: impl Fn(&RefreshToken) -> bool) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let mut tokens = lock(&self.tokens)?;
        let mut revoked = 0;
        for token in tokens.values_mut() {
            if token.revoked_at.is_none() && predicate(token) {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, new_token: NewRefreshToken) -> Result<RefreshToken, RepositoryError> {
        let mut tokens = lock(&self.tokens)?;
        if tokens
            .values()
            .any(|t| t.token_hash == new_token.token_hash || t.id == new_token.id)
        {
            return Err(RepositoryError::UniqueViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        let token = RefreshToken {
            id: new_token.id,
            user_id: new_token.user_id,
            token_hash: new_token.token_hash,
            family_id: new_token.family_id,
            expires_at: new_token.expires_at,
            created_at: Utc::now(),
            is_used: false,
            used_at: None,
            revoked_at: None,
            replaced_by_id: None,
            user_agent: new_token.user_agent,
            ip_address: new_token.ip_address,
        };
        tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, RepositoryError> {
        Ok(lock(&self.tokens)?
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>, RepositoryError> {
        Ok(lock(&self.tokens)?.get(&id).cloned())
    }

    async fn mark_used(&self, id: Uuid, replaced_by_id: Uuid) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let mut tokens = lock(&self.tokens)?;
        match tokens.get_mut(&id) {
            Some(token) if token.is_valid_at(now) => {
                token.is_used = true;
                token.used_at = Some(now);
                token.replaced_by_id = Some(replaced_by_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_id(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.revoke_where(|t| t.id == id)? == 1)
    }

    async fn revoke_by_family_id(&self, family_id: Uuid) -> Result<usize, RepositoryError> {
        self.revoke_where(|t| t.family_id == family_id)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, RepositoryError> {
        self.revoke_where(|t| t.user_id == user_id)
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshToken>, RepositoryError> {
        let now = Utc::now();
        let mut active: Vec<RefreshToken> = lock(&self.tokens)?
            .values()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut tokens = lock(&self.tokens)?;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= cutoff);
        Ok(before - tokens.len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<Uuid, UserInfo>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserInfo>, RepositoryError> {
        Ok(lock(&self.users)?
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserInfo>, RepositoryError> {
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<UserInfo, RepositoryError> {
        let mut users = lock(&self.users)?;
        if users.values().any(|u| u.email == new_user.email) {
            return Err(RepositoryError::UniqueViolation("users_email_key".to_string()));
        }

        let user = UserInfo {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            password_hash: new_user.password_hash,
            role: new_user.role,
            tier: new_user.tier,
            token_version: 0,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut users = lock(&self.users)?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        user.token_version += 1;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RepositoryError> {
        let mut users = lock(&self.users)?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_sessions_api::DeviceContext;
    use chrono::Duration;

    fn new_token(user_id: Uuid, family_id: Uuid, expires_in: Duration) -> NewRefreshToken {
        NewRefreshToken::new(
            user_id,
            format!("hash_{}", Uuid::new_v4()),
            family_id,
            Utc::now() + expires_in,
            &DeviceContext::default(),
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_hash() {
        let store = MemoryRefreshTokenStore::new();
        let first = new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1));
        let mut second = new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1));
        second.token_hash = first.token_hash.clone();

        store.create(first).await.unwrap();
        let result = store.create(second).await;

        assert!(matches!(result, Err(RepositoryError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn mark_used_is_conditional() {
        let store = MemoryRefreshTokenStore::new();
        let token = store
            .create(new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();

        assert!(store.mark_used(token.id, Uuid::new_v4()).await.unwrap());
        assert!(!store.mark_used(token.id, Uuid::new_v4()).await.unwrap());
        assert!(!store.mark_used(Uuid::new_v4(), Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn mark_used_refuses_revoked_and_expired_tokens() {
        let store = MemoryRefreshTokenStore::new();
        let revoked = store
            .create(new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();
        let expired = store
            .create(new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::seconds(-1)))
            .await
            .unwrap();
        store.revoke_by_id(revoked.id).await.unwrap();

        assert!(!store.mark_used(revoked.id, Uuid::new_v4()).await.unwrap());
        assert!(!store.mark_used(expired.id, Uuid::new_v4()).await.unwrap());
        assert!(!store.find_by_id(revoked.id).await.unwrap().unwrap().is_used);
        assert!(!store.find_by_id(expired.id).await.unwrap().unwrap().is_used);
    }

    #[tokio::test]
    async fn revoke_by_id_is_idempotent() {
        let store = MemoryRefreshTokenStore::new();
        let token = store
            .create(new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();

        assert!(store.revoke_by_id(token.id).await.unwrap());
        let first_revocation = store.find_by_id(token.id).await.unwrap().unwrap().revoked_at;
        assert!(!store.revoke_by_id(token.id).await.unwrap());
        let second_revocation = store.find_by_id(token.id).await.unwrap().unwrap().revoked_at;

        assert_eq!(first_revocation, second_revocation);
    }

    #[tokio::test]
    async fn list_active_excludes_used_revoked_and_expired() {
        let store = MemoryRefreshTokenStore::new();
        let user_id = Uuid::new_v4();
        let valid = store
            .create(new_token(user_id, Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();
        let used = store
            .create(new_token(user_id, Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();
        let revoked = store
            .create(new_token(user_id, Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();
        store
            .create(new_token(user_id, Uuid::new_v4(), Duration::hours(-1)))
            .await
            .unwrap();
        store
            .create(new_token(Uuid::new_v4(), Uuid::new_v4(), Duration::days(1)))
            .await
            .unwrap();
        store.mark_used(used.id, Uuid::new_v4()).await.unwrap();
        store.revoke_by_id(revoked.id).await.unwrap();

        let active = store.list_active_for_user(user_id).await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, valid.id);
    }

    #[tokio::test]
    async fn purge_expired_only_removes_rows_before_cutoff() {
        let store = MemoryRefreshTokenStore::new();
        let user_id = Uuid::new_v4();
        store
            .create(new_token(user_id, Uuid::new_v4(), Duration::days(-3)))
            .await
            .unwrap();
        let recent = store
            .create(new_token(user_id, Uuid::new_v4(), Duration::hours(-1)))
            .await
            .unwrap();

        let purged = store
            .purge_expired(Utc::now() - Duration::days(1))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store.find_by_id(recent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn directory_bumps_token_version() {
        let users = MemoryUserDirectory::new();
        let user = users
            .create(NewUser::new(
                "a@example.com".to_string(),
                "A".to_string(),
                "hash".to_string(),
            ))
            .await
            .unwrap();

        users.increment_token_version(user.id).await.unwrap();

        let reloaded = users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.token_version, 1);
    }

    #[tokio::test]
    async fn directory_rejects_duplicate_email() {
        let users = MemoryUserDirectory::new();
        let new_user = NewUser::new("a@example.com".to_string(), "A".to_string(), "h".to_string());
        users.create(new_user.clone()).await.unwrap();

        let result = users.create(new_user).await;

        assert!(matches!(result, Err(RepositoryError::UniqueViolation(_))));
    }
}
