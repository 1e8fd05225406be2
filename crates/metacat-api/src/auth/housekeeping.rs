//! Periodic pruning of expired refresh-token records
//!
//! Nothing depends on this task for correctness: expired records are already
//! rejected at refresh time. It only keeps the store from growing without
//! bound.

use super::service::AuthService;
use metacat_core::AuthError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the pruning loop; `None` when `interval` is zero
pub fn spawn_prune_task(auth: AuthService, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Expired-token pruning disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !prune_once(&auth).await {
                break;
            }
        }
    }))
}

/// Run one pruning pass; returns `false` when the store cannot prune
async fn prune_once(auth: &AuthService) -> bool {
    match auth.prune_expired().await {
        Ok(0) => debug!("No expired refresh tokens to prune"),
        Ok(pruned) => info!(pruned, "Pruned expired refresh tokens"),
        Err(AuthError::Unsupported(op)) => {
            info!(op = %op, "Session store cannot prune expired tokens, stopping pruning task");
            return false;
        }
        Err(e) => warn!(error = %e, "Pruning expired refresh tokens failed"),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{test_auth_config, test_policy, FlakyStore};
    use metacat_core::{MemorySessionStore, RefreshTokenRecord, SessionStore};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_prune_once_removes_expired_records() {
        let store = Arc::new(MemorySessionStore::new());
        let auth = AuthService::new(store.clone(), &test_auth_config(), test_policy()).unwrap();

        let expired = RefreshTokenRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "digest".to_string(),
            chrono::Utc::now() - chrono::Duration::hours(1),
        );
        store.save_refresh_token(&expired).await.unwrap();

        assert!(prune_once(&auth).await);
        assert!(store
            .find_refresh_token_by_id(expired.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_task_stops_on_unsupported_store() {
        let auth =
            AuthService::new(Arc::new(FlakyStore::new()), &test_auth_config(), test_policy())
                .unwrap();

        let handle = spawn_prune_task(auth, Duration::from_millis(5)).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop by itself")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_task() {
        let auth = AuthService::new(
            Arc::new(MemorySessionStore::new()),
            &test_auth_config(),
            test_policy(),
        )
        .unwrap();
        assert!(spawn_prune_task(auth, Duration::ZERO).is_none());
    }
}
