// src/app.rs

use std::sync::Arc;

use crate::auth::guard::AccessTokenGuard;
use crate::auth::jwt::{JwtManager, KeyRing};
use crate::auth::password::PasswordManager;
use crate::auth::retention::RetentionSweeper;
use crate::auth::services::AuthService;
use crate::auth::sessions::SessionRegistry;
use crate::cache::{AccessTokenDenylist, RedisDenylist};
use crate::config::Config;
use crate::db::connection::create_pool;
use crate::db::repositories::{
    RefreshTokenRepository, RefreshTokenStore, UserDirectory, UserRepository,
};

/// Every service of the token core, wired once at startup and shared by
/// whatever transport sits in front of it.
pub struct AppContext {
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionRegistry>,
    pub guard: Arc<AccessTokenGuard>,
    pub sweeper: Arc<RetentionSweeper>,
    pub jwt: JwtManager,
}

impl AppContext {
    /// Connects Postgres, Redis and loads the signing keys.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let keys = KeyRing::load(&config.jwt_private_key_path, &config.jwt_public_keys_dir)?;

        let pool = create_pool(&config.database_url, config.db_pool_size, config.db_timeout);
        let tokens: Arc<dyn RefreshTokenStore> =
            Arc::new(RefreshTokenRepository::new(pool.clone()));
        let users: Arc<dyn UserDirectory> = Arc::new(UserRepository::new(pool));
        let denylist: Arc<dyn AccessTokenDenylist> =
            Arc::new(RedisDenylist::connect(&config.redis_url, config.cache_timeout).await?);

        Self::assemble(config, keys, tokens, users, denylist)
    }

    /// Wires the services over caller-provided collaborators.
    pub fn assemble(
        config: &Config,
        keys: KeyRing,
        tokens: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserDirectory>,
        denylist: Arc<dyn AccessTokenDenylist>,
    ) -> anyhow::Result<Self> {
        let jwt = JwtManager::new(
            keys,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.access_token_ttl,
        );
        let passwords = PasswordManager::new(config.bcrypt_cost)?;

        let auth = AuthService::new(
            tokens.clone(),
            users.clone(),
            jwt.clone(),
            passwords,
            config.refresh_token_ttl,
        );
        let guard = AccessTokenGuard::new(jwt.clone(), users, denylist);

        Ok(Self {
            auth: Arc::new(auth),
            sessions: Arc::new(SessionRegistry::new(tokens.clone())),
            guard: Arc::new(guard),
            sweeper: Arc::new(sweeper_over(config, tokens)),
            jwt,
        })
    }
}

/// Sweeper backed by Postgres alone, for maintenance runs that need neither
/// the cache nor the signing keys.
pub fn build_sweeper(config: &Config) -> RetentionSweeper {
    let pool = create_pool(&config.database_url, config.db_pool_size, config.db_timeout);
    sweeper_over(config, Arc::new(RefreshTokenRepository::new(pool)))
}

fn sweeper_over(config: &Config, tokens: Arc<dyn RefreshTokenStore>) -> RetentionSweeper {
    RetentionSweeper::new(tokens, config.purge_interval, config.purge_grace)
}
