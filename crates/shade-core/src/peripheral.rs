//! Peripheral orchestrator.
//!
//! [`Peripheral`] is the top-level entry point: it owns the link table, the
//! session registry, the router, the codec, and the transport, and wires the
//! frame path through them. Frames arrive per link, reassemble in arrival
//! order, and each completed message is either a handshake round (driven
//! directly against the link's session), a reply to a pending request
//! (delivered to its waiter), or an unsolicited message (routed).
//!
//! Handshake traffic on the authorization channel never touches the codec or
//! the router. The wire format is `[round: u8][peer input]`; the reply
//! mirrors the round byte ahead of the provider's output under the same
//! transaction id.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shade_pake::{PakeRound, RoundProvider};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::auth::{LinkKey, SessionRegistry};
use crate::channel::Channel;
use crate::config::PeripheralConfig;
use crate::error::{Error, HandshakeError, Result, TransactionError};
use crate::frame;
use crate::message::{InboundMessage, MessageCodec, OutboundMessage};
use crate::reassembly::{ReassembledMessage, Reassembler};
use crate::router::Router;
use crate::transaction::TransactionManager;
use crate::transport::FrameTransport;

/// One raw frame arriving from a central, as fed to [`Peripheral::serve`]
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Link the frame arrived on
    pub link: LinkKey,
    /// Characteristic the frame was written to
    pub channel: Channel,
    /// Raw frame bytes, header included
    pub frame: Vec<u8>,
}

/// Transport-layer state for one connected central
#[derive(Debug)]
pub struct Link {
    key: LinkKey,
    reassembler: Reassembler,
    transactions: TransactionManager,
    connected_at: Instant,
}

impl Link {
    fn new(key: LinkKey, config: &PeripheralConfig) -> Self {
        Self {
            key,
            reassembler: Reassembler::new(config.reassembly.clone()),
            transactions: TransactionManager::new(),
            connected_at: Instant::now(),
        }
    }

    /// Identity of the central behind this link
    #[must_use]
    pub fn key(&self) -> LinkKey {
        self.key
    }

    /// When the central connected
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Pending requests awaiting replies on this link
    #[must_use]
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Partial inbound messages on this link
    #[must_use]
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }
}

/// Monotonic counters for the frame path
#[derive(Debug, Default)]
pub struct PeripheralStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    messages_routed: AtomicU64,
    replies_matched: AtomicU64,
    auth_rounds: AtomicU64,
}

impl PeripheralStats {
    /// Raw frames fed into the peripheral
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Frames dropped before a message completed
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Completed messages handed to the router
    #[must_use]
    pub fn messages_routed(&self) -> u64 {
        self.messages_routed.load(Ordering::Relaxed)
    }

    /// Completed messages delivered to a pending request
    #[must_use]
    pub fn replies_matched(&self) -> u64 {
        self.replies_matched.load(Ordering::Relaxed)
    }

    /// Handshake rounds received on the authorization channel
    #[must_use]
    pub fn auth_rounds(&self) -> u64 {
        self.auth_rounds.load(Ordering::Relaxed)
    }
}

struct PeripheralInner<S> {
    config: PeripheralConfig,
    links: DashMap<LinkKey, Arc<Link>>,
    sessions: SessionRegistry,
    router: Router<S>,
    transport: Arc<dyn FrameTransport>,
    codec: Arc<dyn MessageCodec>,
    state: RwLock<S>,
    running: AtomicBool,
    stats: PeripheralStats,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
}

/// The emulated device
pub struct Peripheral<S> {
    inner: Arc<PeripheralInner<S>>,
}

impl<S> Clone for Peripheral<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + Sync + 'static> Peripheral<S> {
    /// Assemble a peripheral from its collaborators
    pub fn new(
        config: PeripheralConfig,
        pairing_secret: &[u8],
        provider: Arc<dyn RoundProvider>,
        transport: Arc<dyn FrameTransport>,
        codec: Arc<dyn MessageCodec>,
        router: Router<S>,
        state: S,
    ) -> Self {
        Self {
            inner: Arc::new(PeripheralInner {
                config,
                links: DashMap::new(),
                sessions: SessionRegistry::new(provider, pairing_secret),
                router,
                transport,
                codec,
                state: RwLock::new(state),
                running: AtomicBool::new(false),
                stats: PeripheralStats::default(),
                maintenance: Mutex::new(None),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Start the peripheral and its maintenance task
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let period = self.inner.config.reassembly.timeout / 2;
        let peripheral = self.clone();
        let handle = tokio::spawn(async move {
            peripheral.maintenance_loop(period).await;
        });
        *self.inner.maintenance.lock().await = Some(handle);

        info!("peripheral started");
        Ok(())
    }

    /// Stop the peripheral, its maintenance task, and any serve loops
    pub async fn stop(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::NotRunning);
        }

        self.inner.shutdown.notify_waiters();
        if let Some(handle) = self.inner.maintenance.lock().await.take() {
            handle.abort();
        }

        info!("peripheral stopped");
        Ok(())
    }

    /// Whether the peripheral is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn maintenance_loop(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }

            let now = Instant::now();
            let mut evicted = 0;
            for entry in self.inner.links.iter() {
                evicted += entry.value().reassembler.evict_stale(now);
            }
            if evicted > 0 {
                debug!(evicted, "maintenance evicted stale reassembly buffers");
            }
        }
    }

    /// Register a central under its link key.
    ///
    /// Idempotent: a key that is already connected keeps its existing state.
    pub fn connect(&self, key: LinkKey) -> Arc<Link> {
        match self.inner.links.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(slot) => {
                let link = Arc::new(Link::new(key, &self.inner.config));
                slot.insert(Arc::clone(&link));
                info!(link = %key, "central connected");
                link
            }
        }
    }

    /// Tear down a link: cancel its pending requests, discard its auth
    /// session, drop its buffers. Returns whether the link existed.
    ///
    /// The session is removed so a reconnect under the same key starts the
    /// handshake from round zero.
    pub fn disconnect(&self, key: &LinkKey) -> bool {
        let Some((_, link)) = self.inner.links.remove(key) else {
            return false;
        };

        let cancelled = link.transactions.cancel_all();
        self.inner.sessions.remove(key);
        info!(link = %key, cancelled, "central disconnected");
        true
    }

    /// The link connected under a key, if any
    #[must_use]
    pub fn link(&self, key: &LinkKey) -> Option<Arc<Link>> {
        self.inner
            .links
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of connected centrals
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    /// Whether a link has completed the authentication handshake
    #[must_use]
    pub fn is_authenticated(&self, key: &LinkKey) -> bool {
        self.inner.sessions.is_complete(key)
    }

    /// Handlers keyed by message kind
    #[must_use]
    pub fn router(&self) -> &Router<S> {
        &self.inner.router
    }

    /// Shared device state
    #[must_use]
    pub fn state(&self) -> &RwLock<S> {
        &self.inner.state
    }

    /// Frame-path counters
    #[must_use]
    pub fn stats(&self) -> &PeripheralStats {
        &self.inner.stats
    }

    /// Feed one raw frame and dispatch the message it completes, if any.
    ///
    /// Reassembly happens on the caller's task: writes arrive in order per
    /// link, and ordering is what the fragment run check relies on.
    pub async fn handle_frame(&self, key: LinkKey, channel: Channel, raw: &[u8]) -> Result<()> {
        let (link, completed) = self.ingest(key, channel, raw)?;
        match completed {
            Some(message) => self.dispatch(&link, channel, message).await,
            None => Ok(()),
        }
    }

    /// Drain a frame feed until the peripheral stops or the feed closes.
    ///
    /// Each completed message dispatches on its own task; per-frame and
    /// per-message failures are logged and never end the loop.
    pub async fn serve(&self, mut frames: mpsc::Receiver<InboundFrame>) {
        loop {
            let inbound = tokio::select! {
                _ = self.inner.shutdown.notified() => break,
                inbound = frames.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            match self.ingest(inbound.link, inbound.channel, &inbound.frame) {
                Ok((link, Some(message))) => {
                    let peripheral = self.clone();
                    let channel = inbound.channel;
                    tokio::spawn(async move {
                        if let Err(err) = peripheral.dispatch(&link, channel, message).await {
                            debug!(
                                link = %link.key,
                                channel = %channel,
                                %err,
                                "message dispatch failed"
                            );
                        }
                    });
                }
                Ok((_, None)) => {}
                Err(err) => {
                    debug!(link = %inbound.link, channel = %inbound.channel, %err, "frame dropped");
                }
            }
        }
        debug!("frame feed drained");
    }

    /// Send a request and await its reply.
    ///
    /// Allocates a transaction id unless the message pins one. A reply
    /// channel that closes before delivering surfaces as
    /// [`TransactionError::Timeout`]; cancellation closes it the same way.
    pub async fn send_request(
        &self,
        key: LinkKey,
        channel: Channel,
        message: OutboundMessage,
    ) -> Result<InboundMessage> {
        let link = self.link(&key).ok_or(Error::UnknownLink(key))?;

        let tx_id = message
            .tx_id
            .unwrap_or_else(|| link.transactions.allocate());
        let receiver =
            link.transactions
                .register(tx_id, &message.kind, self.inner.config.transaction.timeout)?;

        let bytes = self.inner.codec.encode(&message)?;
        if let Err(err) = self.transmit(channel, tx_id, &bytes).await {
            link.transactions.cancel(tx_id);
            return Err(err);
        }
        debug!(link = %key, channel = %channel, tx_id, kind = %message.kind, "request sent");

        receiver
            .await
            .map_err(|_| TransactionError::Timeout(tx_id).into())
    }

    /// Send an unsolicited outbound message, fire and forget
    pub async fn notify(
        &self,
        key: LinkKey,
        channel: Channel,
        message: &OutboundMessage,
    ) -> Result<()> {
        let link = self.link(&key).ok_or(Error::UnknownLink(key))?;

        let tx_id = message
            .tx_id
            .unwrap_or_else(|| link.transactions.allocate());
        let bytes = self.inner.codec.encode(message)?;
        self.transmit(channel, tx_id, &bytes).await?;
        debug!(link = %key, channel = %channel, tx_id, kind = %message.kind, "notification sent");
        Ok(())
    }

    /// Reassemble one frame, accounting for drops
    fn ingest(
        &self,
        key: LinkKey,
        channel: Channel,
        raw: &[u8],
    ) -> Result<(Arc<Link>, Option<ReassembledMessage>)> {
        self.inner.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let Some(link) = self.link(&key) else {
            self.inner.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::UnknownLink(key));
        };

        match link.reassembler.push(channel, raw) {
            Ok(completed) => Ok((link, completed)),
            Err(err) => {
                self.inner.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    /// Hand one completed message to its consumer
    async fn dispatch(
        &self,
        link: &Arc<Link>,
        channel: Channel,
        message: ReassembledMessage,
    ) -> Result<()> {
        if channel == Channel::Authorization {
            self.inner.stats.auth_rounds.fetch_add(1, Ordering::Relaxed);
            return self.process_auth(link, message).await;
        }

        if link.transactions.is_pending(message.tx_id) {
            let reply = self
                .inner
                .codec
                .decode(channel, message.tx_id, &message.payload)?;
            return match link.transactions.complete(message.tx_id, reply) {
                Ok(()) => {
                    self.inner.stats.replies_matched.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                // the timer reclaimed the entry between the pending check
                // and the completion; the reply has no waiter left
                Err(TransactionError::Unknown(_)) => {
                    debug!(link = %link.key, tx_id = message.tx_id, "reply raced its timeout");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            };
        }

        let decoded = self
            .inner
            .codec
            .decode(channel, message.tx_id, &message.payload)?;
        self.inner
            .router
            .route(
                link.key,
                decoded,
                self.inner.sessions.is_complete(&link.key),
                self.inner.codec.as_ref(),
                self.inner.transport.as_ref(),
                &self.inner.state,
            )
            .await?;
        self.inner.stats.messages_routed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drive one handshake round from the authorization channel
    async fn process_auth(&self, link: &Arc<Link>, message: ReassembledMessage) -> Result<()> {
        let Some((&round_byte, peer_input)) = message.payload.split_first() else {
            warn!(link = %link.key, "handshake message carries no round byte");
            return Err(HandshakeError::MalformedRound.into());
        };
        let round = PakeRound::try_from(round_byte).map_err(HandshakeError::from)?;
        trace!(link = %link.key, round = round_byte, len = peer_input.len(), "handshake round received");

        let session = self.inner.sessions.get_or_create(link.key);
        let local_output = {
            let mut guard = session.lock().await;
            guard.process_round(round, peer_input).await?
        };

        let mut reply = Vec::with_capacity(1 + local_output.len());
        reply.push(round_byte);
        reply.extend_from_slice(&local_output);
        self.transmit(Channel::Authorization, message.tx_id, &reply).await
    }

    /// Chunk and send one outbound payload
    async fn transmit(&self, channel: Channel, tx_id: u8, payload: &[u8]) -> Result<()> {
        for piece in frame::chunk(channel, tx_id, payload)? {
            self.inner.transport.send_frame(channel, &piece).await?;
        }
        trace!(channel = %channel, tx_id, len = payload.len(), "transmitted");
        Ok(())
    }
}

impl<S> fmt::Debug for Peripheral<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral")
            .field("links", &self.inner.links.len())
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}
