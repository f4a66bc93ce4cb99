//! # Tether core
//!
//! Pure protocol logic for the tether client stack: the resumable session
//! state machine, the request/response client above it, and the primitives
//! both lean on. Nothing in this crate performs I/O, reads a clock, or
//! touches a global RNG.
//!
//! # Architecture
//!
//! ```text
//!      ┌───────────────────────────────┐
//!      │ tether-core                   │
//!      │ - session state machine       │
//!      │ - request/response client     │
//!      │ - replay cache, frame buffer  │
//!      │ - DH / HMAC-MD5 resumption    │
//!      └───────────────────────────────┘
//!         ↓ FrameSocket      ↓ Entropy
//! ┌────────────────┐  ┌────────────────┐
//! │ tether-harness │  │ production     │
//! │ in-memory pipe │  │ websocket/TCP  │
//! │ seeded RNG     │  │ OS entropy     │
//! └────────────────┘  └────────────────┘
//! ```
//!
//! Side effects enter through two seams: [`socket::FrameSocket`] for the
//! transport and [`entropy::Entropy`] for key material. The deterministic
//! harness implements both over a seeded, in-memory world; production wires
//! them to a real transport and the OS entropy pool. Protocol behavior is
//! identical in either, which is what makes the resume path testable at
//! all.
//!
//! # Modules
//!
//! - [`buffer`]: length-prefixed frame reassembly
//! - [`cache`]: bounded replay cache for resume retransmission
//! - [`crypto`]: DH key exchange, MD5/HMAC-MD5, base64
//! - [`session`]: the resumable session state machine
//! - [`client`]: request/response multiplexing over a session
//! - [`socket`] / [`entropy`]: the injection seams
//! - [`error`]: session- and client-level error taxonomies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod cache;
pub mod client;
pub mod crypto;
pub mod entropy;
pub mod error;
pub mod session;
pub mod socket;

#[cfg(test)]
pub(crate) mod testutil;

pub use buffer::{Endian, FrameBuffer};
pub use cache::{ReplayCache, REPLAY_CAPACITY};
pub use client::{CallHandle, Client, Handler, DEFAULT_PACKAGE_TYPE};
pub use entropy::{Entropy, OsEntropy};
pub use error::{ClientError, SessionError};
pub use session::{ReconnectCallback, Session, SessionState, Tick};
pub use socket::{FrameSocket, SocketError, SocketStatus};
