//! # SHADE Core
//!
//! Core implementation of the SHADE (Split-frame Handshake-Authenticated
//! Device Emulator) transport layer. SHADE emulates the session plumbing of a
//! BLE medical device: binary messages tagged with an 8-bit transaction id
//! travel over a fixed set of logical channels, split into small frames on
//! send and reassembled on receive, with a four-round authentication
//! handshake gating privileged operations.
//!
//! This crate provides:
//! - Frame chunking and zero-copy parsing
//! - Per-link fragment reassembly with idle eviction
//! - Transaction-id lifecycle with reply correlation and timeouts
//! - The authentication session state machine and its registry
//! - Message routing under the authentication gate
//! - The peripheral orchestrator tying the pieces together
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Peripheral                               │
//! │   (links, serve loop, request/reply correlation, maintenance)    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                Router  +  Authentication sessions                │
//! │   (handler dispatch behind the handshake-completion gate)        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                  Channels / Frames / Reassembly                  │
//! │   (2-byte headers, per-characteristic frame budgets)             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod peripheral;
pub mod reassembly;
pub mod router;
pub mod transaction;
pub mod transport;

pub use auth::{AuthSession, LinkKey, SessionRegistry};
pub use channel::Channel;
pub use config::{PeripheralConfig, ReassemblyConfig, TransactionConfig};
pub use error::{
    CodecError, Error, FrameError, HandshakeError, ReassemblyError, Result, RouterError,
    TransactionError,
};
pub use frame::{Frame, FrameHeader, chunk, unchunk};
pub use message::{InboundMessage, MessageCodec, OutboundMessage, TagCodec};
pub use peripheral::{InboundFrame, Link, Peripheral, PeripheralStats};
pub use reassembly::{ReassembledMessage, Reassembler};
pub use router::{HandlerResponse, MessageHandler, Router};
pub use transaction::{PendingRequest, TransactionManager};
pub use transport::{FrameTransport, MemoryTransport, TransportError};

/// Fixed frame header size in bytes (remaining-fragment count + transaction id)
pub const FRAME_HEADER_SIZE: usize = 2;

/// Maximum fragments per message (the remaining counter is 8-bit)
pub const MAX_FRAGMENTS: usize = 256;

/// Frame length of the authorization channel
pub const AUTHORIZATION_FRAME_LEN: usize = 40;

/// Frame length of every other channel
pub const STANDARD_FRAME_LEN: usize = 18;
