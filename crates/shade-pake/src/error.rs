//! Provider-level error types.

use thiserror::Error;

/// Errors a round provider may surface
#[derive(Debug, Error)]
pub enum PakeError {
    /// Round index outside 1..=4
    #[error("invalid handshake round: {0}")]
    InvalidRound(u8),

    /// Peer input could not be interpreted by the provider
    #[error("malformed round input: {0}")]
    MalformedInput(String),

    /// The cryptographic computation itself failed
    #[error("round computation failed: {0}")]
    Computation(String),
}
