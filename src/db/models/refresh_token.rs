use crate::db::schema::refresh_tokens;
use auth_sessions_api::{DeviceContext, SessionResponse};
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable, Selectable};
use uuid::Uuid;

/// Device metadata is caller-supplied and display-only; it is cut to this
/// many characters before it is stored.
pub const MAX_DEVICE_FIELD_CHARS: usize = 512;

fn clip_device_field(value: &str) -> String {
    value.chars().take(MAX_DEVICE_FIELD_CHARS).collect()
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl NewRefreshToken {
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        family_id: Uuid,
        expires_at: DateTime<Utc>,
        device: &DeviceContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash,
            family_id,
            expires_at,
            user_agent: device.user_agent.as_deref().map(clip_device_field),
            ip_address: device.ip_address.as_deref().map(clip_device_field),
        }
    }

    /// Rotation reserves the successor's id before the predecessor is claimed.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_id: Option<Uuid>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Where a refresh token sits in its lifecycle. Everything but `Valid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Used,
    Revoked,
    Expired,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == TokenStatus::Valid
    }

    /// Consumption wins over revocation, which wins over expiry: a used token
    /// presented again is a replay no matter what happened to it afterwards.
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.is_used {
            TokenStatus::Used
        } else if self.is_revoked() {
            TokenStatus::Revoked
        } else if self.is_expired_at(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        }
    }
}

impl From<RefreshToken> for SessionResponse {
    fn from(token: RefreshToken) -> Self {
        SessionResponse {
            id: token.id,
            user_agent: token.user_agent,
            ip_address: token.ip_address,
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }
}
