//! Frame encoding and decoding for the split-frame wire format.
//!
//! Every frame is a 2-byte header followed by payload. The first header byte
//! counts the fragments still to come after this one (0 marks the last), the
//! second carries the transaction id. Across one message the remaining counts
//! form a strictly decreasing contiguous run ending at 0, so the first frame
//! announces the total fragment count as `remaining + 1`.

use crate::FRAME_HEADER_SIZE;
use crate::MAX_FRAGMENTS;
use crate::channel::Channel;
use crate::error::FrameError;

/// Parsed 2-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Fragments still to come after this one
    pub remaining: u8,
    /// Transaction id the fragment belongs to
    pub tx_id: u8,
}

impl FrameHeader {
    /// Parse a header from the front of a raw frame
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        Ok(Self {
            remaining: data[0],
            tx_id: data[1],
        })
    }

    /// Encode the header into its wire form
    pub const fn encode(self) -> [u8; FRAME_HEADER_SIZE] {
        [self.remaining, self.tx_id]
    }
}

/// Zero-copy frame view into a raw buffer
#[derive(Debug)]
pub struct Frame<'a> {
    raw: &'a [u8],
    header: FrameHeader,
}

impl<'a> Frame<'a> {
    /// Parse a frame from raw bytes (zero-copy)
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(data)?;
        Ok(Self { raw: data, header })
    }

    /// Get the parsed header
    pub fn header(&self) -> FrameHeader {
        self.header
    }

    /// Fragments still to come after this one
    pub fn remaining(&self) -> u8 {
        self.header.remaining
    }

    /// Transaction id the fragment belongs to
    pub fn tx_id(&self) -> u8 {
        self.header.tx_id
    }

    /// True for the last fragment of its message
    pub fn is_final(&self) -> bool {
        self.header.remaining == 0
    }

    /// Get the payload slice (zero-copy)
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[FRAME_HEADER_SIZE..]
    }
}

/// Split a message into transmittable frames for a channel.
///
/// Frame `i` of `n` carries `remaining = n - 1 - i`; every frame fits the
/// channel's budget. An empty message still produces one frame so the
/// transaction id reaches the peer.
pub fn chunk(channel: Channel, tx_id: u8, message: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    let max_payload = channel.max_payload();

    if message.is_empty() {
        let header = FrameHeader {
            remaining: 0,
            tx_id,
        };
        return Ok(vec![header.encode().to_vec()]);
    }

    let fragments = message.len().div_ceil(max_payload);
    if fragments > MAX_FRAGMENTS {
        return Err(FrameError::MessageTooLarge {
            fragments,
            limit: MAX_FRAGMENTS,
        });
    }

    let mut frames = Vec::with_capacity(fragments);
    for (index, piece) in message.chunks(max_payload).enumerate() {
        let header = FrameHeader {
            remaining: (fragments - 1 - index) as u8,
            tx_id,
        };
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + piece.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(piece);
        frames.push(frame);
    }

    Ok(frames)
}

/// Parse one raw frame received from a central.
///
/// Companion to [`chunk`]: concatenating the payloads of a chunked message's
/// frames in transmission order restores the message exactly.
pub fn unchunk(raw: &[u8]) -> Result<Frame<'_>, FrameError> {
    Frame::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fragment_roundtrip() {
        let frames = chunk(Channel::Control, 7, b"bolus").unwrap();
        assert_eq!(frames.len(), 1);

        let frame = unchunk(&frames[0]).unwrap();
        assert_eq!(frame.remaining(), 0);
        assert_eq!(frame.tx_id(), 7);
        assert!(frame.is_final());
        assert_eq!(frame.payload(), b"bolus");
    }

    #[test]
    fn test_multi_fragment_remaining_counts() {
        // 40 bytes over 16-byte payloads: 3 fragments
        let message = vec![0xA5u8; 40];
        let frames = chunk(Channel::Control, 9, &message).unwrap();
        assert_eq!(frames.len(), 3);

        let remaining: Vec<u8> = frames
            .iter()
            .map(|f| Frame::parse(f).unwrap().remaining())
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        for frame in &frames {
            assert!(frame.len() <= Channel::Control.max_frame_len());
            assert_eq!(Frame::parse(frame).unwrap().tx_id(), 9);
        }

        let rebuilt: Vec<u8> = frames
            .iter()
            .flat_map(|f| Frame::parse(f).unwrap().payload().to_vec())
            .collect();
        assert_eq!(rebuilt, message);
    }

    #[test]
    fn test_authorization_channel_uses_wider_frames() {
        let message = vec![0x5Au8; 100];
        let frames = chunk(Channel::Authorization, 1, &message).unwrap();
        // 100 bytes over 38-byte payloads: 3 fragments
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() <= 40));

        let narrow = chunk(Channel::CurrentStatus, 1, &message).unwrap();
        assert_eq!(narrow.len(), 7);
    }

    #[test]
    fn test_empty_message_yields_one_header_only_frame() {
        let frames = chunk(Channel::Control, 3, b"").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![0, 3]);

        let frame = unchunk(&frames[0]).unwrap();
        assert!(frame.is_final());
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_message_too_large() {
        let message = vec![0u8; Channel::Control.max_message_len() + 1];
        assert!(matches!(
            chunk(Channel::Control, 0, &message),
            Err(FrameError::MessageTooLarge { fragments: 257, .. })
        ));
    }

    #[test]
    fn test_largest_message_fits_exactly() {
        let message = vec![1u8; Channel::Control.max_message_len()];
        let frames = chunk(Channel::Control, 0, &message).unwrap();
        assert_eq!(frames.len(), MAX_FRAGMENTS);
        assert_eq!(Frame::parse(&frames[0]).unwrap().remaining(), 255);
    }

    #[test]
    fn test_frame_too_short() {
        assert!(matches!(
            Frame::parse(&[0x01]),
            Err(FrameError::TooShort {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(Frame::parse(&[]), Err(FrameError::TooShort { .. })));
    }

    #[test]
    fn test_header_encode_parse() {
        let header = FrameHeader {
            remaining: 5,
            tx_id: 250,
        };
        assert_eq!(FrameHeader::parse(&header.encode()).unwrap(), header);
    }
}
