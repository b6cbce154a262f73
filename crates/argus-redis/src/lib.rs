pub mod backend;
pub mod config;
pub mod queue;
pub mod store;

pub use backend::RedisBackend;
pub use config::RedisConfig;
pub use queue::RedisFanoutQueue;
pub use store::RedisStateStore;
