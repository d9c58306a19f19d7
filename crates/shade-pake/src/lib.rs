//! # SHADE PAKE
//!
//! Round-provider boundary for the SHADE authentication handshake.
//!
//! The SHADE session layer drives a four-round password-authenticated key
//! exchange but never performs the cryptography itself. This crate defines
//! the seam between the two:
//! - [`RoundProvider`] - the async interface a cryptographic backend
//!   implements (curve arithmetic, zero-knowledge proofs, key confirmation)
//! - [`PakeRound`], [`RoundArtifacts`], [`RoundOutput`], [`Confirmation`],
//!   [`SharedSecret`] - the types carried across that seam
//! - [`DigestProvider`] - a deterministic keyed-BLAKE3 reference provider
//!   for loopback wiring and tests; it converges like a PAKE but proves
//!   nothing and must never face a real peer
//!
//! ## Handshake shape
//!
//! ```text
//! Central                         Device
//!     |                               |
//!     |------ round 1 input --------->|  compute_round(One)
//!     |<----- round 1 output ---------|
//!     |------ round 2 input --------->|  compute_round(Two)
//!     |<----- round 2 output ---------|
//!     |------ round 3 input --------->|  compute_round(Three)
//!     |<----- round 3 output ---------|
//!     |------ confirmation ---------->|  confirm_final + compute_round(Four)
//!     |<----- confirmation reply -----|
//!     |                               |
//!     |      [secret available]       |
//! ```
//!
//! All key material crossing this boundary is zeroized on drop.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod digest;
pub mod error;
pub mod provider;
pub mod round;

pub use digest::DigestProvider;
pub use error::PakeError;
pub use provider::{Confirmation, RoundArtifacts, RoundOutput, RoundProvider, SharedSecret};
pub use round::PakeRound;

/// Number of rounds in the handshake
pub const HANDSHAKE_ROUNDS: usize = 4;

/// Output size of the reference provider's rounds and secrets
pub const DIGEST_OUTPUT_SIZE: usize = 32;
