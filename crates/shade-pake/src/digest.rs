//! Deterministic keyed-digest reference provider.
//!
//! [`DigestProvider`] stands in for a real PAKE backend in tests and
//! loopback wiring. Every round folds the peer input and the local output
//! into a keyed-BLAKE3 transcript, so two endpoints that share a pairing
//! secret and exchange the same bytes converge on the same artifacts and
//! derive the same secret - the *shape* of a PAKE without any of its
//! security. It must never face a real peer.

use async_trait::async_trait;

use crate::error::PakeError;
use crate::provider::{Confirmation, RoundArtifacts, RoundOutput, RoundProvider, SharedSecret};
use crate::round::PakeRound;

/// Key-derivation context for the transcript key
const KEY_CONTEXT: &str = "shade-pake 2025 digest transcript key";

/// Domain separators for the three digest uses
const DOMAIN_OUTPUT: &[u8] = b"round-output";
const DOMAIN_TRANSCRIPT: &[u8] = b"transcript";
const DOMAIN_CONFIRM: &[u8] = b"central-confirmation";
const DOMAIN_SECRET: &[u8] = b"derived-secret";

/// A stateless provider whose rounds are keyed-BLAKE3 digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestProvider;

impl DigestProvider {
    /// Create the reference provider
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn transcript_key(pairing_secret: &[u8]) -> [u8; 32] {
        blake3::derive_key(KEY_CONTEXT, pairing_secret)
    }

    fn round_output(
        key: &[u8; 32],
        round: PakeRound,
        artifacts: &RoundArtifacts,
        peer_input: &[u8],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(DOMAIN_OUTPUT);
        hasher.update(&[round.index()]);
        hasher.update(artifacts.as_bytes());
        hasher.update(peer_input);
        *hasher.finalize().as_bytes()
    }

    fn next_transcript(
        key: &[u8; 32],
        round: PakeRound,
        artifacts: &RoundArtifacts,
        peer_input: &[u8],
        local_output: &[u8],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(DOMAIN_TRANSCRIPT);
        hasher.update(&[round.index()]);
        hasher.update(artifacts.as_bytes());
        hasher.update(peer_input);
        hasher.update(local_output);
        *hasher.finalize().as_bytes()
    }

    /// Advance a central-side transcript mirror after one completed round.
    ///
    /// `sent` is what the central transmitted for the round, `received` the
    /// device's reply. Mirrors the device's artifact update exactly, which
    /// is what lets a test central stay in lockstep.
    #[must_use]
    pub fn advance_transcript(
        pairing_secret: &[u8],
        round: PakeRound,
        artifacts: &RoundArtifacts,
        sent: &[u8],
        received: &[u8],
    ) -> RoundArtifacts {
        let key = Self::transcript_key(pairing_secret);
        let next = Self::next_transcript(&key, round, artifacts, sent, received);
        RoundArtifacts::from_bytes(next.to_vec())
    }

    /// The confirmation value a central must present in round four, given
    /// the transcript accumulated through round three.
    #[must_use]
    pub fn central_confirmation(artifacts: &RoundArtifacts) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_CONFIRM);
        hasher.update(artifacts.as_bytes());
        hasher.finalize().as_bytes().to_vec()
    }

    /// The secret both endpoints derive once confirmation succeeds.
    #[must_use]
    pub fn derived_secret(artifacts: &RoundArtifacts) -> SharedSecret {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_SECRET);
        hasher.update(artifacts.as_bytes());
        SharedSecret::from_bytes(hasher.finalize().as_bytes().to_vec())
    }
}

#[async_trait]
impl RoundProvider for DigestProvider {
    async fn compute_round(
        &self,
        round: PakeRound,
        pairing_secret: &[u8],
        artifacts: &RoundArtifacts,
        peer_input: &[u8],
    ) -> Result<RoundOutput, PakeError> {
        let key = Self::transcript_key(pairing_secret);
        let output = Self::round_output(&key, round, artifacts, peer_input);
        let transcript = Self::next_transcript(&key, round, artifacts, peer_input, &output);

        tracing::trace!(round = round.index(), "digest provider computed round");

        Ok(RoundOutput {
            local_output: output.to_vec(),
            artifacts: RoundArtifacts::from_bytes(transcript.to_vec()),
        })
    }

    async fn confirm_final(
        &self,
        artifacts: &RoundArtifacts,
        peer_confirmation: &[u8],
    ) -> Result<Confirmation, PakeError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_CONFIRM);
        hasher.update(artifacts.as_bytes());
        let expected = hasher.finalize();

        // blake3::Hash compares in constant time
        let valid = expected == *peer_confirmation;

        Ok(Confirmation {
            valid,
            secret: Self::derived_secret(artifacts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRING_CODE: &[u8] = b"123456";

    /// Drive rounds one through three on both sides of the exchange,
    /// returning (device artifacts, central mirror).
    async fn run_key_agreement(secret: &[u8]) -> (RoundArtifacts, RoundArtifacts) {
        let provider = DigestProvider::new();
        let mut device = RoundArtifacts::empty();
        let mut central = RoundArtifacts::empty();

        for round in [PakeRound::One, PakeRound::Two, PakeRound::Three] {
            let input = vec![round.index(); 16];
            let out = provider
                .compute_round(round, secret, &device, &input)
                .await
                .unwrap();
            central =
                DigestProvider::advance_transcript(secret, round, &central, &input, &out.local_output);
            device = out.artifacts;
        }

        (device, central)
    }

    #[tokio::test]
    async fn test_transcripts_converge() {
        let (device, central) = run_key_agreement(PAIRING_CODE).await;
        assert!(!device.is_empty());
        assert_eq!(device.as_bytes(), central.as_bytes());
    }

    #[tokio::test]
    async fn test_confirmation_accepts_matching_secret() {
        let provider = DigestProvider::new();
        let (device, central) = run_key_agreement(PAIRING_CODE).await;

        let confirmation = DigestProvider::central_confirmation(&central);
        let result = provider.confirm_final(&device, &confirmation).await.unwrap();

        assert!(result.valid);
        assert!(!result.secret.is_empty());
        assert_eq!(result.secret, DigestProvider::derived_secret(&central));
    }

    #[tokio::test]
    async fn test_confirmation_rejects_wrong_pairing_secret() {
        let provider = DigestProvider::new();
        let (device, _) = run_key_agreement(PAIRING_CODE).await;
        let (_, imposter) = run_key_agreement(b"000000").await;

        let confirmation = DigestProvider::central_confirmation(&imposter);
        let result = provider.confirm_final(&device, &confirmation).await.unwrap();

        assert!(!result.valid);
    }

    #[tokio::test]
    async fn test_confirmation_rejects_garbage() {
        let provider = DigestProvider::new();
        let (device, _) = run_key_agreement(PAIRING_CODE).await;

        for garbage in [&b""[..], &[0u8; 16][..], &[0xFF; 32][..], &[0u8; 64][..]] {
            let result = provider.confirm_final(&device, garbage).await.unwrap();
            assert!(!result.valid);
        }
    }

    #[tokio::test]
    async fn test_rounds_are_deterministic() {
        let provider = DigestProvider::new();
        let artifacts = RoundArtifacts::empty();

        let a = provider
            .compute_round(PakeRound::One, PAIRING_CODE, &artifacts, b"hello")
            .await
            .unwrap();
        let b = provider
            .compute_round(PakeRound::One, PAIRING_CODE, &artifacts, b"hello")
            .await
            .unwrap();

        assert_eq!(a.local_output, b.local_output);
        assert_eq!(a.artifacts, b.artifacts);
    }

    #[tokio::test]
    async fn test_rounds_separate_by_input() {
        let provider = DigestProvider::new();
        let artifacts = RoundArtifacts::empty();

        let a = provider
            .compute_round(PakeRound::One, PAIRING_CODE, &artifacts, b"hello")
            .await
            .unwrap();
        let b = provider
            .compute_round(PakeRound::One, PAIRING_CODE, &artifacts, b"world")
            .await
            .unwrap();
        let c = provider
            .compute_round(PakeRound::Two, PAIRING_CODE, &artifacts, b"hello")
            .await
            .unwrap();

        assert_ne!(a.local_output, b.local_output);
        assert_ne!(a.local_output, c.local_output);
    }
}
