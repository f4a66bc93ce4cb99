//! Transport abstraction for the session layer.
//!
//! The session runs over any transport that can deliver byte chunks in
//! order: a websocket, a TCP stream, or the in-memory pipe the test harness
//! uses. The trait is deliberately poll-shaped — the whole stack is driven
//! from a single cooperative tick, so nothing here may block.
//!
//! Chunk boundaries carry no meaning. The session reassembles its own
//! length-prefixed frames from whatever slicing the transport produces.

use bytes::Bytes;
use thiserror::Error;

/// Transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The dial attempt did not complete in time
    #[error("dial timed out")]
    DialTimeout,

    /// The underlying websocket/stream reported a failure
    #[error("transport error: {0}")]
    Websocket(String),

    /// The transport was closed and cannot carry further traffic
    #[error("connection closed")]
    ConnectionClosed,
}

/// Transport condition reported by each pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    /// Connected and flowing
    Ready,
    /// Still dialing; no traffic yet
    Pending,
    /// The link dropped; the caller may elect to reconnect
    ConnectBreak,
    /// Closed for good
    Closed,
}

/// A non-blocking, chunk-delivering transport.
///
/// Implementations must never block: [`FrameSocket::update`] performs one
/// pump pass and returns, and [`FrameSocket::recv`] only reports chunks that
/// have already arrived.
pub trait FrameSocket {
    /// Pump the transport once: progress dialing, flush writes, collect
    /// arrived chunks for [`FrameSocket::recv`].
    ///
    /// # Errors
    ///
    /// Returns [`SocketError`] on unrecoverable transport failure. A clean
    /// link drop is not an error — it surfaces as
    /// [`SocketStatus::ConnectBreak`] so the caller can decide to resume.
    fn update(&mut self) -> Result<SocketStatus, SocketError>;

    /// Queue one chunk for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::ConnectionClosed`] when the transport cannot
    /// accept writes.
    fn send(&mut self, chunk: &[u8]) -> Result<(), SocketError>;

    /// Take the next received chunk, if any arrived.
    fn recv(&mut self) -> Option<Bytes>;

    /// Drop the current link and dial again.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError`] when a new dial cannot be started.
    fn reconnect(&mut self) -> Result<(), SocketError>;

    /// Tear the transport down.
    fn close(&mut self);
}
