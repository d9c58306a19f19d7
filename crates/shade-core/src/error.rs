//! Error types for the SHADE transport emulator.
//!
//! Each subsystem owns a small enum; [`Error`] aggregates them for the
//! peripheral API. Frame-level failures are dropped per-frame by the serve
//! loop, reassembly failures discard one buffer, handshake failures leave the
//! session state untouched. None of them are fatal to the peripheral.

use std::borrow::Cow;

use thiserror::Error;

use crate::auth::LinkKey;
use crate::channel::Channel;
use crate::transport::TransportError;

/// Aggregate error for peripheral operations
#[derive(Debug, Error)]
pub enum Error {
    /// Frame codec error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Reassembly error
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// Transaction error
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Handshake error
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Routing error
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// Message codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No link is connected under the given key
    #[error("unknown link: {0}")]
    UnknownLink(LinkKey),

    /// The peripheral has not been started
    #[error("peripheral is not running")]
    NotRunning,

    /// The peripheral is already running
    #[error("peripheral is already running")]
    AlreadyRunning,
}

impl Error {
    /// Returns true if the operation may succeed on retry.
    ///
    /// Timeouts clear once the peer answers, buffer limits clear once the
    /// maintenance task evicts, transport errors may be congestion.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transaction(TransactionError::Timeout(_))
                | Error::Reassembly(ReassemblyError::BufferLimit { .. })
                | Error::Transport(_)
        )
    }

    /// Returns true if retrying the same operation cannot succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Frame(_) | Error::Codec(_) | Error::Handshake(_) | Error::UnknownLink(_)
        )
    }
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame too short to carry a header
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Message does not fit in the fragment counter's range
    #[error("message needs {fragments} fragments, limit is {limit}")]
    MessageTooLarge {
        /// Fragments the message would need
        fragments: usize,
        /// Largest representable fragment count
        limit: usize,
    },

    /// Invalid channel byte
    #[error("invalid channel: 0x{0:02X}")]
    InvalidChannel(u8),
}

/// Fragment reassembly errors
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// Frame could not be parsed
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Fragment broke the strictly decreasing remaining-count sequence
    #[error("fragment sequence broken on {channel} tx {tx_id}: expected remaining {expected}, got {got}")]
    FragmentMismatch {
        /// Channel the buffer belongs to
        channel: Channel,
        /// Transaction id of the buffer
        tx_id: u8,
        /// Remaining count the sequence required
        expected: u8,
        /// Remaining count actually received
        got: u8,
    },

    /// Message grew past the channel's per-message byte bound
    #[error("message on {channel} tx {tx_id} exceeds {limit} bytes")]
    MessageOversize {
        /// Channel the buffer belongs to
        channel: Channel,
        /// Transaction id of the buffer
        tx_id: u8,
        /// Per-message byte bound
        limit: usize,
    },

    /// Too many concurrent partial messages
    #[error("reassembly buffer limit reached: {limit}")]
    BufferLimit {
        /// Configured buffer cap
        limit: usize,
    },
}

/// Transaction lifecycle errors
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The id is still pending from an earlier registration
    #[error("transaction {0} already pending")]
    Duplicate(u8),

    /// No pending entry under the id
    #[error("unknown transaction: {0}")]
    Unknown(u8),

    /// No reply arrived within the registered timeout
    #[error("transaction {0} timed out")]
    Timeout(u8),
}

/// Authentication handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Round arrived outside the strict one-step ordering
    #[error("handshake round out of order: expected {expected}, got {got}")]
    OutOfOrderRound {
        /// Round the session would accept next
        expected: u8,
        /// Round actually received
        got: u8,
    },

    /// Key confirmation did not verify
    #[error("key confirmation failed")]
    ConfirmationFailed,

    /// Secret requested before the handshake finished
    #[error("handshake not complete")]
    NotComplete,

    /// Round received after the handshake finished
    #[error("handshake already complete")]
    AlreadyComplete,

    /// Handshake message too short to carry a round byte
    #[error("malformed handshake message")]
    MalformedRound,

    /// The round provider rejected its input
    #[error("provider error: {0}")]
    Provider(#[from] shade_pake::PakeError),
}

/// Message routing errors
#[derive(Debug, Error)]
pub enum RouterError {
    /// Handler requires a completed handshake
    #[error("authentication required for {kind:?} messages")]
    AuthenticationRequired {
        /// Kind of the rejected message
        kind: String,
    },

    /// A handler failed
    #[error("handler error: {0}")]
    Handler(Cow<'static, str>),

    /// Encoding the response failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Chunking the response failed
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transmitting the response failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RouterError {
    /// Create a handler error with static context (zero allocation)
    #[must_use]
    pub const fn handler(context: &'static str) -> Self {
        RouterError::Handler(Cow::Borrowed(context))
    }
}

/// Message codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Body does not follow the codec's wire format
    #[error("malformed message body: {0}")]
    Malformed(Cow<'static, str>),

    /// Body ended before a declared field
    #[error("message body truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the declared fields required
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },
}

impl CodecError {
    /// Create a malformed-body error with static context (zero allocation)
    #[must_use]
    pub const fn malformed(context: &'static str) -> Self {
        CodecError::Malformed(Cow::Borrowed(context))
    }
}

/// Result type for peripheral operations
pub type Result<T> = std::result::Result<T, Error>;
