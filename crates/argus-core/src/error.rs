use thiserror::Error;

/// Application-wide error types for Argus.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration, including an unreachable backend at
    /// startup. The shared store is required infrastructure, not optional.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A source connector failed to fetch or parse results.
    #[error("Source '{source_id}' failed: {message}")]
    ConnectorError {
        source_id: String,
        message: String,
        retryable: bool,
    },

    /// A source call exceeded its deadline.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The shared admission state store failed or returned garbage.
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// The fanout queue rejected or lost an operation.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Message payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AppError {
    /// Whether a later retry of the same operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_) | AppError::StateStoreError(_) | AppError::QueueError(_) => true,
            AppError::ConnectorError { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Whether the error counts against the failing source's circuit.
    ///
    /// Infrastructure trouble (store, queue, payload decoding) says nothing
    /// about source health and must not open its circuit.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(self, AppError::ConnectorError { .. } | AppError::Timeout(_))
    }

    /// Shorthand for a retryable connector failure.
    pub fn connector(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ConnectorError {
            source_id: source_id.into(),
            message: message.into(),
            retryable: true,
        }
    }
}
