//! Connection pool: one lazily-spawned [`Connection`] per provider.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ProvidersConfig;
use crate::connection::Connection;
use crate::error::{Result, RouterAppError};

/// Holds at most one live connection per provider, spawning on first use.
pub struct ConnectionPool {
    providers: ProvidersConfig,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(providers: ProvidersConfig) -> Self {
        Self {
            providers,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get the connection for `provider`, spawning it if this is the first
    /// request. Held behind the pool's own mutex rather than per-provider
    /// locks, so two concurrent first-uses of the same provider never
    /// double-spawn.
    pub async fn get(&self, provider: &str) -> Result<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(provider) {
            return Ok(existing.clone());
        }

        let descriptor = self
            .providers
            .descriptor(provider)
            .ok_or_else(|| RouterAppError::UnknownProvider(provider.to_string()))?;
        let connection = Arc::new(Connection::spawn(provider, descriptor).await?);
        connections.insert(provider.to_string(), connection.clone());
        Ok(connection)
    }

    /// Terminate every live connection. Called on shutdown; errors from
    /// individual terminations are not fatal, since the goal is best-effort
    /// cleanup of subprocesses, not a transactional shutdown.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (provider, connection) in connections.drain() {
            tracing::debug!(provider = %provider, "terminating provider connection");
            connection.terminate().await;
        }
    }

    pub fn known_providers(&self) -> Vec<String> {
        self.providers.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderLaunchDescriptor;

    fn config_with_unreachable_provider() -> ProvidersConfig {
        let mut providers = HashMap::new();
        providers.insert(
            "ghost".to_string(),
            ProviderLaunchDescriptor {
                command: "definitely-not-a-real-binary-xyz".to_string(),
                args: Vec::new(),
                env: HashMap::new(),
            },
        );
        ProvidersConfig { providers }
    }

    #[tokio::test]
    async fn get_unknown_provider_returns_error() {
        let pool = ConnectionPool::new(ProvidersConfig::default());
        let err = pool.get("nope").await.unwrap_err();
        assert!(matches!(err, RouterAppError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn get_propagates_spawn_failure() {
        let pool = ConnectionPool::new(config_with_unreachable_provider());
        let err = pool.get("ghost").await.unwrap_err();
        assert!(matches!(err, RouterAppError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn close_all_on_empty_pool_is_a_no_op() {
        let pool = ConnectionPool::new(ProvidersConfig::default());
        pool.close_all().await;
    }

    #[test]
    fn known_providers_reflects_configuration() {
        let pool = ConnectionPool::new(config_with_unreachable_provider());
        assert_eq!(pool.known_providers(), vec!["ghost".to_string()]);
    }
}
