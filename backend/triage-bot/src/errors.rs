//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The verifier binary could not be started at all.
    #[error("Failed to spawn verifier: {0}")]
    VerifierSpawn(std::io::Error),

    /// The verifier exited 0 but its stdout is not a valid result document.
    #[error("Verifier output integrity error: {0}")]
    VerifierOutputIntegrity(serde_json::Error),

    #[error("Verifier timed out after {0}s")]
    VerifierTimeout(u64),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("ABI decode error: {0}")]
    AbiDecode(String),

    #[error("Telegram API error: {0}")]
    Telegram(String),
}

pub type Result<T> = std::result::Result<T, TriageError>;
