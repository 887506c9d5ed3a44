use thiserror::Error;
use uuid::Uuid;

/// Main error type for the simulation core
#[derive(Error, Debug)]
pub enum TradegymError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Policy construction errors
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    // Policy runtime errors (caught at the run loop boundary)
    #[error("Policy failure: {0}")]
    Policy(String),

    // Run lifecycle errors
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    // Replay buffer errors
    #[error("Insufficient samples: requested {requested}, available {available}")]
    InsufficientSamples { requested: usize, available: usize },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for TradegymError
pub type Result<T> = std::result::Result<T, TradegymError>;

/// Specific error types for order execution
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Insufficient quantity: requested {requested}, held {held}")]
    InsufficientQuantity {
        requested: rust_decimal::Decimal,
        held: rust_decimal::Decimal,
    },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

impl From<OrderError> for TradegymError {
    fn from(err: OrderError) -> Self {
        TradegymError::OrderRejected(err.to_string())
    }
}
