//! The round-provider interface and the types carried across it.

use std::fmt;

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::PakeError;
use crate::round::PakeRound;

/// Opaque key material a provider accumulates across rounds.
///
/// The session layer stores this blob verbatim between rounds and hands it
/// back on the next call; only the provider interprets it. Zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoundArtifacts(Vec<u8>);

impl RoundArtifacts {
    /// Empty artifacts, the state before round one
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw provider state
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw provider state
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether any rounds have run yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RoundArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundArtifacts(<{} bytes>)", self.0.len())
    }
}

/// A secret derived by a completed handshake. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap derived secret bytes
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The secret bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the secret in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty (a provider returning one is broken)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes>)", self.0.len())
    }
}

/// Result of one round computation
#[derive(Debug)]
pub struct RoundOutput {
    /// Bytes to send back to the peer for this round
    pub local_output: Vec<u8>,
    /// Updated provider state to retain for later rounds
    pub artifacts: RoundArtifacts,
}

/// Result of validating the peer's key confirmation
#[derive(Debug)]
pub struct Confirmation {
    /// Whether the peer's confirmation value matched
    pub valid: bool,
    /// The derived shared secret; meaningful only when `valid`
    pub secret: SharedSecret,
}

/// Cryptographic backend for the four-round handshake.
///
/// Implementations may call into external processes or hardware and are
/// treated as potentially slow; callers must not hold registry-wide locks
/// across these methods.
#[async_trait]
pub trait RoundProvider: Send + Sync {
    /// Compute one round: combine the pairing secret, the artifacts
    /// retained from earlier rounds, and the peer's input for this round
    /// into the local output and the updated artifacts.
    async fn compute_round(
        &self,
        round: PakeRound,
        pairing_secret: &[u8],
        artifacts: &RoundArtifacts,
        peer_input: &[u8],
    ) -> Result<RoundOutput, PakeError>;

    /// Validate the peer's key-confirmation value against the key material
    /// accumulated through round three, yielding the derived secret when it
    /// matches.
    async fn confirm_final(
        &self,
        artifacts: &RoundArtifacts,
        peer_confirmation: &[u8],
    ) -> Result<Confirmation, PakeError>;
}
