//! Relay error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The declarative spec could not be turned into launch artifacts.
    /// Reported via a log event; launch proceeds with defaults.
    #[error("config generation failed: {0}")]
    ConfigGeneration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("trade ledger error: {0}")]
    Ledger(#[from] sqlx::Error),
}
