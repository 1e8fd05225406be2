//! Application state management

use crate::auth::{ApiKeyManager, AuthService, AuthorizationGuard, StorePolicy};
use metacat_core::{AppConfig, AuthError, SessionStore};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Durable users, refresh tokens and API keys
    pub store: Arc<dyn SessionStore>,
    pub auth: AuthService,
    pub api_keys: ApiKeyManager,
    pub guard: AuthorizationGuard,
}

impl AppState {
    /// Wire the services over `store`
    ///
    /// Fails only when the configured Argon2 parameters are invalid.
    pub fn new(config: AppConfig, store: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        let policy = StorePolicy::from_config(&config.store);
        let auth = AuthService::new(Arc::clone(&store), &config.auth, policy)?;
        let api_keys = ApiKeyManager::new(Arc::clone(&store), policy);
        let guard = AuthorizationGuard::new(Arc::clone(auth.tokens()), api_keys.clone());

        Ok(Self {
            config,
            start_time: Instant::now(),
            store,
            auth,
            api_keys,
            guard,
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
