use argus_core::AppError;

/// Configuration for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix for every key and stream this crate touches.
    pub key_prefix: String,
    /// Consumer group workers read the fanout stream through.
    pub consumer_group: String,
    /// Seconds of inactivity after which a source's token bucket expires.
    pub bucket_idle_ttl: u64,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: "argus".to_string(),
            consumer_group: "argus-workers".to_string(),
            bucket_idle_ttl: 3600,
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = consumer_group.into();
        self
    }

    pub fn with_bucket_idle_ttl(mut self, bucket_idle_ttl: u64) -> Self {
        self.bucket_idle_ttl = bucket_idle_ttl;
        self
    }

    /// Read configuration from environment variables.
    ///
    /// - `REDIS_URL` (required)
    /// - `ARGUS_KEY_PREFIX` (optional, defaults to "argus")
    /// - `ARGUS_BUCKET_IDLE_TTL` (optional seconds, defaults to 3600)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("REDIS_URL").map_err(|_| {
            AppError::ConfigError(
                "REDIS_URL not set. Required for admission state and the fanout stream.".into(),
            )
        })?;

        let mut config = Self::new(url);

        if let Ok(prefix) = std::env::var("ARGUS_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        if let Ok(raw) = std::env::var("ARGUS_BUCKET_IDLE_TTL") {
            let parsed: u64 = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid ARGUS_BUCKET_IDLE_TTL '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(
                    "ARGUS_BUCKET_IDLE_TTL must be at least 1".into(),
                ));
            }
            config.bucket_idle_ttl = parsed;
        }

        Ok(config)
    }
}
