//! Message envelopes and the codec seam.
//!
//! The emulator never interprets vendor opcode catalogs itself. Reassembled
//! bytes pass through a [`MessageCodec`] that produces the routing envelope,
//! and outbound envelopes pass back through it before chunking. [`TagCodec`]
//! is the reference implementation used by tests and loopback wiring.

use crate::channel::Channel;
use crate::error::CodecError;

/// A fully reassembled inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel the message arrived on
    pub channel: Channel,
    /// Transaction id carried by the message's fragments
    pub tx_id: u8,
    /// Routing key
    pub kind: String,
    /// Decoded body
    pub body: Vec<u8>,
}

/// An outbound message before encoding and chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Routing key
    pub kind: String,
    /// Transaction id; `None` inherits the id of the exchange that produced
    /// the message
    pub tx_id: Option<u8>,
    /// Message body
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Create a message that inherits its transaction id
    pub fn new(kind: &str, body: Vec<u8>) -> Self {
        Self {
            kind: kind.to_string(),
            tx_id: None,
            body,
        }
    }

    /// Pin the message to an explicit transaction id
    #[must_use]
    pub fn with_tx_id(mut self, tx_id: u8) -> Self {
        self.tx_id = Some(tx_id);
        self
    }
}

/// Translates between reassembled bytes and routing envelopes.
///
/// The vendor opcode catalog lives behind this trait; the emulator only sees
/// kinds and opaque bodies.
pub trait MessageCodec: Send + Sync {
    /// Decode one reassembled message
    fn decode(
        &self,
        channel: Channel,
        tx_id: u8,
        body: &[u8],
    ) -> Result<InboundMessage, CodecError>;

    /// Encode one outbound message into transmittable bytes
    fn encode(&self, message: &OutboundMessage) -> Result<Vec<u8>, CodecError>;
}

/// Length-prefixed tag codec: `[kind_len: u8][kind bytes][body]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagCodec;

impl TagCodec {
    /// Create the reference codec
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for TagCodec {
    fn decode(
        &self,
        channel: Channel,
        tx_id: u8,
        body: &[u8],
    ) -> Result<InboundMessage, CodecError> {
        let (&kind_len, rest) = body
            .split_first()
            .ok_or_else(|| CodecError::malformed("empty message body"))?;
        let kind_len = usize::from(kind_len);

        if rest.len() < kind_len {
            return Err(CodecError::Truncated {
                expected: kind_len,
                actual: rest.len(),
            });
        }

        let (kind, payload) = rest.split_at(kind_len);
        let kind = std::str::from_utf8(kind)
            .map_err(|_| CodecError::malformed("kind is not utf-8"))?
            .to_string();

        Ok(InboundMessage {
            channel,
            tx_id,
            kind,
            body: payload.to_vec(),
        })
    }

    fn encode(&self, message: &OutboundMessage) -> Result<Vec<u8>, CodecError> {
        let kind = message.kind.as_bytes();
        if kind.len() > u8::MAX as usize {
            return Err(CodecError::malformed("kind longer than 255 bytes"));
        }

        let mut bytes = Vec::with_capacity(1 + kind.len() + message.body.len());
        bytes.push(kind.len() as u8);
        bytes.extend_from_slice(kind);
        bytes.extend_from_slice(&message.body);
        Ok(bytes)
    }
}
