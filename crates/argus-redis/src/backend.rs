use argus_core::AppError;
use redis::aio::ConnectionManager;

use crate::config::RedisConfig;
use crate::queue::RedisFanoutQueue;
use crate::store::RedisStateStore;

/// Central Redis facade that owns the multiplexed connection and vends the
/// state store and fanout queue handles.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    config: RedisConfig,
}

impl RedisBackend {
    /// Connect to Redis with the given configuration.
    ///
    /// Failing here is a configuration error: the shared store is required
    /// infrastructure and nothing degrades to process-local state.
    pub async fn connect(config: &RedisConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AppError::ConfigError(format!("Invalid Redis URL: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self {
            manager,
            config: config.clone(),
        })
    }

    /// Create a backend from an existing connection (useful for testing).
    pub fn from_manager(manager: ConnectionManager, config: &RedisConfig) -> Self {
        Self {
            manager,
            config: config.clone(),
        }
    }

    /// Get a [`RedisStateStore`] backed by this connection.
    pub fn state_store(&self) -> RedisStateStore {
        RedisStateStore::new(self.manager.clone(), &self.config)
    }

    /// Get a [`RedisFanoutQueue`] backed by this connection.
    pub fn fanout_queue(&self) -> RedisFanoutQueue {
        RedisFanoutQueue::new(self.manager.clone(), &self.config)
    }
}
