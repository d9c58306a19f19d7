//! Fragment reassembly keyed by channel and transaction id.
//!
//! Buffers are created on the first fragment of an unknown key and destroyed
//! on completion, on a broken fragment run, or by idle eviction. Payloads are
//! concatenated in arrival order: the remaining count only sizes the buffer
//! and polices the strictly decreasing run, the transport is trusted to
//! deliver fragments in order.

use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::config::ReassemblyConfig;
use crate::error::ReassemblyError;
use crate::frame::Frame;

/// A message restored from its fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    /// Transaction id carried by every fragment
    pub tx_id: u8,
    /// Concatenated fragment payloads
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct ReassemblyBuffer {
    fragments: Vec<Vec<u8>>,
    next_remaining: u8,
    received_bytes: usize,
    last_activity: Instant,
}

impl ReassemblyBuffer {
    fn open(remaining: u8, first_payload: &[u8]) -> Self {
        Self {
            fragments: vec![first_payload.to_vec()],
            next_remaining: remaining - 1,
            received_bytes: first_payload.len(),
            last_activity: Instant::now(),
        }
    }

    fn concatenate(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.received_bytes);
        for fragment in self.fragments {
            payload.extend_from_slice(&fragment);
        }
        payload
    }
}

/// Reassembles fragmented messages for one link
#[derive(Debug)]
pub struct Reassembler {
    buffers: DashMap<(Channel, u8), ReassemblyBuffer>,
    config: ReassemblyConfig,
}

impl Reassembler {
    /// Create a reassembler with the given configuration
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            buffers: DashMap::new(),
            config,
        }
    }

    /// Feed one raw frame, returning the restored message once its final
    /// fragment arrives.
    ///
    /// A broken fragment run or an oversize message discards the whole
    /// buffer; the error names the discarded key.
    pub fn push(
        &self,
        channel: Channel,
        raw: &[u8],
    ) -> Result<Option<ReassembledMessage>, ReassemblyError> {
        let frame = Frame::parse(raw)?;
        let tx_id = frame.tx_id();
        let key = (channel, tx_id);
        let limit = channel.max_message_len();

        if frame.payload().len() > limit {
            warn!(channel = %channel, tx_id, limit, "oversize fragment dropped");
            return Err(ReassemblyError::MessageOversize {
                channel,
                tx_id,
                limit,
            });
        }

        // DashMap::len locks every shard, so the capacity reading must be
        // taken before the entry guard below.
        let open_buffers = self.buffers.len();

        match self.buffers.entry(key) {
            Entry::Vacant(slot) => {
                if frame.is_final() {
                    trace!(channel = %channel, tx_id, len = frame.payload().len(), "single-fragment message");
                    return Ok(Some(ReassembledMessage {
                        tx_id,
                        payload: frame.payload().to_vec(),
                    }));
                }

                if open_buffers >= self.config.max_buffers {
                    warn!(
                        channel = %channel,
                        tx_id,
                        limit = self.config.max_buffers,
                        "reassembly buffer limit reached, dropping fragment"
                    );
                    return Err(ReassemblyError::BufferLimit {
                        limit: self.config.max_buffers,
                    });
                }

                trace!(
                    channel = %channel,
                    tx_id,
                    expected = u16::from(frame.remaining()) + 1,
                    "opened reassembly buffer"
                );
                slot.insert(ReassemblyBuffer::open(frame.remaining(), frame.payload()));
                Ok(None)
            }
            Entry::Occupied(mut slot) => {
                let expected = slot.get().next_remaining;
                let held = slot.get().fragments.len();
                let would_be = slot.get().received_bytes + frame.payload().len();

                if frame.remaining() != expected {
                    slot.remove();
                    warn!(
                        channel = %channel,
                        tx_id,
                        expected,
                        got = frame.remaining(),
                        held,
                        "fragment run broken, discarding buffer"
                    );
                    return Err(ReassemblyError::FragmentMismatch {
                        channel,
                        tx_id,
                        expected,
                        got: frame.remaining(),
                    });
                }

                if would_be > limit {
                    slot.remove();
                    warn!(channel = %channel, tx_id, limit, "message oversize, discarding buffer");
                    return Err(ReassemblyError::MessageOversize {
                        channel,
                        tx_id,
                        limit,
                    });
                }

                if frame.is_final() {
                    let mut buffer = slot.remove();
                    buffer.fragments.push(frame.payload().to_vec());
                    buffer.received_bytes = would_be;
                    trace!(
                        channel = %channel,
                        tx_id,
                        fragments = buffer.fragments.len(),
                        bytes = buffer.received_bytes,
                        "message reassembled"
                    );
                    return Ok(Some(ReassembledMessage {
                        tx_id,
                        payload: buffer.concatenate(),
                    }));
                }

                let buffer = slot.get_mut();
                buffer.fragments.push(frame.payload().to_vec());
                buffer.received_bytes = would_be;
                buffer.last_activity = Instant::now();
                buffer.next_remaining -= 1;
                Ok(None)
            }
        }
    }

    /// Drop buffers idle past the configured timeout, returning how many
    /// were evicted.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let timeout = self.config.timeout;
        let mut evicted = 0;

        self.buffers.retain(|key, buffer| {
            if now.duration_since(buffer.last_activity) >= timeout {
                warn!(
                    channel = %key.0,
                    tx_id = key.1,
                    fragments = buffer.fragments.len(),
                    bytes = buffer.received_bytes,
                    "evicting stale reassembly buffer"
                );
                evicted += 1;
                false
            } else {
                true
            }
        });

        evicted
    }

    /// Discard one partial message, returning whether a buffer existed
    pub fn abandon(&self, channel: Channel, tx_id: u8) -> bool {
        let removed = self.buffers.remove(&(channel, tx_id)).is_some();
        if removed {
            debug!(channel = %channel, tx_id, "abandoned reassembly buffer");
        }
        removed
    }

    /// Number of partial messages currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True when no partial message is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(ReassemblyConfig::default())
    }
}
