//! Authentication sessions and their registry.
//!
//! One session per link walks the four handshake rounds in strict order:
//! round `n` is accepted only when `n` equals the session round plus one,
//! anything else is rejected with the state untouched. The final round must
//! pass key confirmation before the shared secret becomes retrievable; a
//! failed confirmation leaves the session at round three so a central may
//! retry. The cryptography itself lives behind
//! [`RoundProvider`](shade_pake::RoundProvider).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use shade_pake::{HANDSHAKE_ROUNDS, PakeRound, RoundArtifacts, RoundProvider, SharedSecret};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::HandshakeError;

/// Opaque identity of one central link
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey([u8; 8]);

impl LinkKey {
    /// Create a key from its raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the key
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<[u8; 8]> for LinkKey {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkKey({})", hex::encode(self.0))
    }
}

/// Handshake state for one link
pub struct AuthSession {
    link: LinkKey,
    pairing_secret: Zeroizing<Vec<u8>>,
    round: u8,
    artifacts: RoundArtifacts,
    secret: Option<SharedSecret>,
    provider: Arc<dyn RoundProvider>,
}

impl AuthSession {
    /// Create a fresh session at round zero
    pub fn new(link: LinkKey, pairing_secret: &[u8], provider: Arc<dyn RoundProvider>) -> Self {
        Self {
            link,
            pairing_secret: Zeroizing::new(pairing_secret.to_vec()),
            round: 0,
            artifacts: RoundArtifacts::empty(),
            secret: None,
            provider,
        }
    }

    /// Process one handshake round and produce the reply payload.
    ///
    /// Rounds advance monotonically by exactly one. The final round runs key
    /// confirmation first and fails closed: on an invalid confirmation the
    /// session stays at round three with no secret stored.
    pub async fn process_round(
        &mut self,
        round: PakeRound,
        peer_input: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        if self.is_complete() {
            return Err(HandshakeError::AlreadyComplete);
        }

        let expected = self.round + 1;
        if round.index() != expected {
            warn!(
                link = %self.link,
                expected,
                got = round.index(),
                "handshake round out of order"
            );
            return Err(HandshakeError::OutOfOrderRound {
                expected,
                got: round.index(),
            });
        }

        let secret = if round.is_final() {
            let confirmation = self
                .provider
                .confirm_final(&self.artifacts, peer_input)
                .await?;
            if !confirmation.valid {
                warn!(link = %self.link, "key confirmation failed, session stays unauthenticated");
                return Err(HandshakeError::ConfirmationFailed);
            }
            Some(confirmation.secret)
        } else {
            None
        };

        let output = self
            .provider
            .compute_round(round, &self.pairing_secret, &self.artifacts, peer_input)
            .await?;

        self.artifacts = output.artifacts;
        self.round = round.index();

        if let Some(secret) = secret {
            self.secret = Some(secret);
            info!(link = %self.link, "authentication handshake complete");
        } else {
            debug!(link = %self.link, round = self.round, "handshake round accepted");
        }

        Ok(output.local_output)
    }

    /// Link this session belongs to
    #[must_use]
    pub fn link(&self) -> LinkKey {
        self.link
    }

    /// Last accepted round, 0 before any
    #[must_use]
    pub fn round(&self) -> u8 {
        self.round
    }

    /// Whether all rounds have been accepted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.round >= HANDSHAKE_ROUNDS as u8
    }

    /// The shared secret derived by the completed handshake
    pub fn shared_secret(&self) -> Result<SharedSecret, HandshakeError> {
        self.secret.clone().ok_or(HandshakeError::NotComplete)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("link", &self.link)
            .field("round", &self.round)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Sessions for every connected link, keyed by link identity
pub struct SessionRegistry {
    sessions: DashMap<LinkKey, Arc<Mutex<AuthSession>>>,
    provider: Arc<dyn RoundProvider>,
    pairing_secret: Zeroizing<Vec<u8>>,
}

impl SessionRegistry {
    /// Create a registry that builds sessions with the given provider and
    /// pairing secret
    pub fn new(provider: Arc<dyn RoundProvider>, pairing_secret: &[u8]) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            pairing_secret: Zeroizing::new(pairing_secret.to_vec()),
        }
    }

    /// Fetch the session for a link, creating it at round zero on first
    /// sight. Concurrent callers receive the same instance.
    pub fn get_or_create(&self, link: LinkKey) -> Arc<Mutex<AuthSession>> {
        self.sessions
            .entry(link)
            .or_insert_with(|| {
                debug!(link = %link, "created authentication session");
                Arc::new(Mutex::new(AuthSession::new(
                    link,
                    &self.pairing_secret,
                    Arc::clone(&self.provider),
                )))
            })
            .clone()
    }

    /// Tear down a link's session, returning whether one existed
    pub fn remove(&self, link: &LinkKey) -> bool {
        let removed = self.sessions.remove(link).is_some();
        if removed {
            debug!(link = %link, "removed authentication session");
        }
        removed
    }

    /// Best-effort completion check for the routing gate.
    ///
    /// Fails closed: a missing session or one mid-round counts as
    /// incomplete.
    #[must_use]
    pub fn is_complete(&self, link: &LinkKey) -> bool {
        match self.sessions.get(link) {
            Some(session) => session
                .try_lock()
                .map(|guard| guard.is_complete())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use shade_pake::{Confirmation, PakeError, RoundOutput};

    use super::*;

    /// Provider whose rounds are canned bytes, with a switchable
    /// confirmation verdict.
    struct StubProvider {
        confirm: AtomicBool,
    }

    impl StubProvider {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                confirm: AtomicBool::new(true),
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                confirm: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl RoundProvider for StubProvider {
        async fn compute_round(
            &self,
            round: PakeRound,
            _pairing_secret: &[u8],
            _artifacts: &RoundArtifacts,
            _peer_input: &[u8],
        ) -> Result<RoundOutput, PakeError> {
            Ok(RoundOutput {
                local_output: vec![round.index(); 4],
                artifacts: RoundArtifacts::from_bytes(vec![round.index(); 8]),
            })
        }

        async fn confirm_final(
            &self,
            _artifacts: &RoundArtifacts,
            _peer_confirmation: &[u8],
        ) -> Result<Confirmation, PakeError> {
            Ok(Confirmation {
                valid: self.confirm.load(Ordering::SeqCst),
                secret: SharedSecret::from_bytes(vec![0xAB; 32]),
            })
        }
    }

    fn session(provider: Arc<StubProvider>) -> AuthSession {
        AuthSession::new(LinkKey::new(*b"central1"), b"123456", provider)
    }

    #[tokio::test]
    async fn test_ordered_rounds_complete() {
        let mut session = session(StubProvider::accepting());
        assert!(session.shared_secret().is_err());

        for round in PakeRound::ALL {
            let output = session.process_round(round, b"input").await.unwrap();
            assert_eq!(output, vec![round.index(); 4]);
            assert_eq!(session.round(), round.index());
        }

        assert!(session.is_complete());
        assert!(!session.shared_secret().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_round_rejected() {
        let mut session = session(StubProvider::accepting());

        let err = session.process_round(PakeRound::Two, b"").await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::OutOfOrderRound {
                expected: 1,
                got: 2
            }
        ));
        assert_eq!(session.round(), 0);
    }

    #[tokio::test]
    async fn test_repeated_round_rejected() {
        let mut session = session(StubProvider::accepting());
        session.process_round(PakeRound::One, b"").await.unwrap();

        let err = session.process_round(PakeRound::One, b"").await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::OutOfOrderRound {
                expected: 2,
                got: 1
            }
        ));
        assert_eq!(session.round(), 1);
    }

    #[tokio::test]
    async fn test_failed_confirmation_fails_closed_and_is_retryable() {
        let provider = StubProvider::rejecting();
        let mut session = session(Arc::clone(&provider));

        for round in [PakeRound::One, PakeRound::Two, PakeRound::Three] {
            session.process_round(round, b"").await.unwrap();
        }

        let err = session.process_round(PakeRound::Four, b"bad").await.unwrap_err();
        assert!(matches!(err, HandshakeError::ConfirmationFailed));
        assert_eq!(session.round(), 3);
        assert!(session.shared_secret().is_err());

        // a corrected confirmation still completes the session
        provider.confirm.store(true, Ordering::SeqCst);
        session.process_round(PakeRound::Four, b"good").await.unwrap();
        assert!(session.is_complete());
        assert!(session.shared_secret().is_ok());
    }

    #[tokio::test]
    async fn test_round_after_completion_rejected() {
        let mut session = session(StubProvider::accepting());
        for round in PakeRound::ALL {
            session.process_round(round, b"").await.unwrap();
        }

        let err = session.process_round(PakeRound::Four, b"").await.unwrap_err();
        assert!(matches!(err, HandshakeError::AlreadyComplete));
    }

    #[tokio::test]
    async fn test_registry_returns_one_instance_per_link() {
        let registry = SessionRegistry::new(StubProvider::accepting(), b"123456");
        let link = LinkKey::new(*b"central1");

        let first = registry.get_or_create(link);
        let second = registry.get_or_create(link);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        let other = registry.get_or_create(LinkKey::new(*b"central2"));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_completion_gate() {
        let registry = SessionRegistry::new(StubProvider::accepting(), b"123456");
        let link = LinkKey::new(*b"central1");
        assert!(!registry.is_complete(&link));

        let session = registry.get_or_create(link);
        assert!(!registry.is_complete(&link));

        {
            let mut guard = session.lock().await;
            for round in PakeRound::ALL {
                guard.process_round(round, b"").await.unwrap();
            }
        }
        assert!(registry.is_complete(&link));

        assert!(registry.remove(&link));
        assert!(!registry.is_complete(&link));
    }

    #[tokio::test]
    async fn test_registry_fails_closed_while_round_in_flight() {
        let registry = SessionRegistry::new(StubProvider::accepting(), b"123456");
        let link = LinkKey::new(*b"central1");
        let session = registry.get_or_create(link);

        let _held = session.lock().await;
        assert!(!registry.is_complete(&link));
    }

    #[test]
    fn test_link_key_display() {
        let key = LinkKey::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
        assert_eq!(key.to_string(), "123456789abcdef0");
        assert_eq!(format!("{key:?}"), "LinkKey(123456789abcdef0)");
    }
}
