//! Frame transport seam.
//!
//! The OS radio stack is out of scope; the peripheral only ever talks to
//! [`FrameTransport`]. [`MemoryTransport`] is the in-process implementation
//! used by tests and loopback wiring, and it enforces the same per-channel
//! frame budgets a real characteristic write would.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::channel::Channel;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport is closed
    #[error("transport is closed")]
    Closed,

    /// Frame exceeds the channel's budget
    #[error("frame of {len} bytes exceeds the {limit}-byte channel budget")]
    FrameTooLarge {
        /// Size of the rejected frame
        len: usize,
        /// Channel frame budget
        limit: usize,
    },

    /// Transport-specific error
    #[error("transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Async seam between the peripheral and whatever carries its frames
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Queue one frame for delivery on a channel
    async fn send_frame(&self, channel: Channel, frame: &[u8]) -> TransportResult<()>;

    /// Close the transport; subsequent sends return
    /// [`TransportError::Closed`]
    async fn close(&self) -> TransportResult<()>;

    /// Whether the transport has been closed
    fn is_closed(&self) -> bool;
}

/// In-process transport delivering frames over an unbounded channel
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<(Channel, Vec<u8>)>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport and the receiver observing what it sends
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Channel, Vec<u8>)>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                closed: AtomicBool::new(false),
            },
            receiver,
        )
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frame(&self, channel: Channel, frame: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let limit = channel.max_frame_len();
        if frame.len() > limit {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                limit,
            });
        }

        self.outbound
            .send((channel, frame.to_vec()))
            .map_err(|_| TransportError::Closed)?;
        trace!(channel = %channel, len = frame.len(), "frame sent");
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("memory transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
