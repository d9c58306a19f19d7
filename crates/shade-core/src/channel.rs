//! Logical channel table.
//!
//! Each channel models one GATT characteristic of the emulated device.
//! Frame budgets are fixed properties of the characteristic, never
//! negotiated: the authorization channel carries 40-byte frames, every other
//! channel 18.

use std::fmt;

use crate::error::FrameError;
use crate::{AUTHORIZATION_FRAME_LEN, FRAME_HEADER_SIZE, MAX_FRAGMENTS, STANDARD_FRAME_LEN};

/// Logical channels of the emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Periodic device status notifications
    CurrentStatus = 0x01,
    /// Alarm and event notifications
    QualifyingEvents = 0x02,
    /// Therapy history records
    HistoryLog = 0x03,
    /// Authentication handshake traffic
    Authorization = 0x04,
    /// Command request/reply exchange
    Control = 0x05,
    /// Bulk command payloads
    ControlStream = 0x06,
}

impl Channel {
    /// Every channel, in wire-value order
    pub const ALL: [Self; 6] = [
        Self::CurrentStatus,
        Self::QualifyingEvents,
        Self::HistoryLog,
        Self::Authorization,
        Self::Control,
        Self::ControlStream,
    ];

    /// Largest frame the channel carries, header included
    #[must_use]
    pub const fn max_frame_len(self) -> usize {
        match self {
            Self::Authorization => AUTHORIZATION_FRAME_LEN,
            _ => STANDARD_FRAME_LEN,
        }
    }

    /// Largest payload one frame carries
    #[must_use]
    pub const fn max_payload(self) -> usize {
        self.max_frame_len() - FRAME_HEADER_SIZE
    }

    /// Largest message the channel carries in one chunked transmission
    #[must_use]
    pub const fn max_message_len(self) -> usize {
        self.max_payload() * MAX_FRAGMENTS
    }

    /// Stable channel name for logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CurrentStatus => "current-status",
            Self::QualifyingEvents => "qualifying-events",
            Self::HistoryLog => "history-log",
            Self::Authorization => "authorization",
            Self::Control => "control",
            Self::ControlStream => "control-stream",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Channel {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::CurrentStatus),
            0x02 => Ok(Self::QualifyingEvents),
            0x03 => Ok(Self::HistoryLog),
            0x04 => Ok(Self::Authorization),
            0x05 => Ok(Self::Control),
            0x06 => Ok(Self::ControlStream),
            _ => Err(FrameError::InvalidChannel(value)),
        }
    }
}
