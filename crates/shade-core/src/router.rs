//! Message routing under the authentication gate.
//!
//! Handlers register by message kind. [`Router::route`] is the only place
//! the gate is enforced: a handler that requires authentication never runs
//! against a link whose handshake is incomplete. After a handler runs, its
//! reply and notifications are transmitted first and its state directives
//! applied last, so notifications always describe the pre-change state.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::auth::LinkKey;
use crate::channel::Channel;
use crate::error::RouterError;
use crate::frame;
use crate::message::{InboundMessage, MessageCodec, OutboundMessage};
use crate::transport::FrameTransport;

/// A stateful handler for one message kind
#[async_trait]
pub trait MessageHandler<S>: Send + Sync {
    /// Message kind this handler consumes
    fn kind(&self) -> &str;

    /// Whether the link must have completed the handshake first
    fn requires_auth(&self) -> bool {
        true
    }

    /// Process one message against the shared state
    async fn handle(
        &self,
        message: &InboundMessage,
        state: &S,
    ) -> Result<HandlerResponse<S>, RouterError>;
}

/// What a handler wants done after it ran.
///
/// Directives run against exclusive state only after the reply and
/// notifications have been transmitted.
pub struct HandlerResponse<S> {
    /// Reply to the inbound message, if any
    pub reply: Option<OutboundMessage>,
    /// Channel override for the reply and notifications; defaults to the
    /// inbound channel
    pub channel: Option<Channel>,
    /// Additional unsolicited messages to transmit
    pub notifications: Vec<OutboundMessage>,
    /// Deferred state changes
    pub directives: Vec<Box<dyn FnOnce(&mut S) + Send>>,
}

impl<S> HandlerResponse<S> {
    /// Respond with a reply message
    pub fn reply(message: OutboundMessage) -> Self {
        Self {
            reply: Some(message),
            ..Self::default()
        }
    }

    /// Redirect the reply and notifications to another channel
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Add an unsolicited outbound message
    #[must_use]
    pub fn with_notification(mut self, message: OutboundMessage) -> Self {
        self.notifications.push(message);
        self
    }

    /// Add a deferred state change
    #[must_use]
    pub fn with_directive(mut self, directive: impl FnOnce(&mut S) + Send + 'static) -> Self {
        self.directives.push(Box::new(directive));
        self
    }
}

impl<S> Default for HandlerResponse<S> {
    fn default() -> Self {
        Self {
            reply: None,
            channel: None,
            notifications: Vec::new(),
            directives: Vec::new(),
        }
    }
}

impl<S> fmt::Debug for HandlerResponse<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerResponse")
            .field("reply", &self.reply.as_ref().map(|m| m.kind.as_str()))
            .field("channel", &self.channel)
            .field("notifications", &self.notifications.len())
            .field("directives", &self.directives.len())
            .finish()
    }
}

/// Fallback for kinds nobody registered. Must not assume authentication.
struct UnregisteredKind;

#[async_trait]
impl<S: Send + Sync> MessageHandler<S> for UnregisteredKind {
    fn kind(&self) -> &str {
        "unhandled"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        message: &InboundMessage,
        _state: &S,
    ) -> Result<HandlerResponse<S>, RouterError> {
        debug!(
            kind = %message.kind,
            channel = %message.channel,
            tx_id = message.tx_id,
            "no handler registered, ignoring message"
        );
        Ok(HandlerResponse::default())
    }
}

/// Dispatches inbound messages to handlers by kind
pub struct Router<S> {
    handlers: DashMap<String, Arc<dyn MessageHandler<S>>>,
    fallback: Arc<dyn MessageHandler<S>>,
}

impl<S: Send + Sync + 'static> Router<S> {
    /// Create a router whose fallback ignores unregistered kinds
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            fallback: Arc::new(UnregisteredKind),
        }
    }

    /// Register a handler under its kind.
    ///
    /// The last registration for a kind wins; replacing an existing handler
    /// is logged because it is almost always a startup-ordering mistake.
    pub fn register(&self, handler: Arc<dyn MessageHandler<S>>) {
        let kind = handler.kind().to_string();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            warn!(kind = %kind, "replaced an already registered handler");
        }
    }

    /// Replace the fallback invoked for unregistered kinds
    pub fn set_fallback(&mut self, handler: Arc<dyn MessageHandler<S>>) {
        self.fallback = handler;
    }

    /// Number of registered kinds, fallback excluded
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn resolve(&self, kind: &str) -> Arc<dyn MessageHandler<S>> {
        self.handlers
            .get(kind)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Route one inbound message: enforce the gate, run the handler,
    /// transmit its output, then apply its directives.
    pub async fn route(
        &self,
        link: LinkKey,
        message: InboundMessage,
        session_complete: bool,
        codec: &dyn MessageCodec,
        transport: &dyn FrameTransport,
        state: &RwLock<S>,
    ) -> Result<(), RouterError> {
        let handler = self.resolve(&message.kind);

        if handler.requires_auth() && !session_complete {
            warn!(
                link = %link,
                kind = %message.kind,
                "rejected message from unauthenticated link"
            );
            return Err(RouterError::AuthenticationRequired { kind: message.kind });
        }

        trace!(link = %link, kind = %message.kind, tx_id = message.tx_id, "routing message");
        let response = {
            let guard = state.read().await;
            handler.handle(&message, &guard).await?
        };

        let HandlerResponse {
            reply,
            channel,
            notifications,
            directives,
        } = response;
        let target = channel.unwrap_or(message.channel);

        if let Some(reply) = reply {
            let tx_id = reply.tx_id.unwrap_or(message.tx_id);
            transmit(codec, transport, target, tx_id, &reply).await?;
        }

        for notification in &notifications {
            let tx_id = notification.tx_id.unwrap_or(message.tx_id);
            transmit(codec, transport, target, tx_id, notification).await?;
        }

        if !directives.is_empty() {
            let mut guard = state.write().await;
            for directive in directives {
                directive(&mut guard);
            }
            debug!(link = %link, kind = %message.kind, "applied state directives");
        }

        Ok(())
    }
}

impl<S: Send + Sync + 'static> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for Router<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Encode, chunk, and send one outbound message
async fn transmit(
    codec: &dyn MessageCodec,
    transport: &dyn FrameTransport,
    channel: Channel,
    tx_id: u8,
    message: &OutboundMessage,
) -> Result<(), RouterError> {
    let bytes = codec.encode(message)?;
    for piece in frame::chunk(channel, tx_id, &bytes)? {
        transport.send_frame(channel, &piece).await?;
    }
    trace!(channel = %channel, tx_id, kind = %message.kind, "transmitted message");
    Ok(())
}
