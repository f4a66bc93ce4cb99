//! Error types for the session and client layers.
//!
//! Transport failures stay in [`SocketError`](crate::socket::SocketError)
//! and key-exchange failures in
//! [`KeyExchangeError`](crate::crypto::KeyExchangeError); this module wraps
//! both into the session-level taxonomy and adds the client-level one.
//! Terminal resumption failures are states, not just errors: the session
//! parks itself in the matching failure state and the error here reports
//! why.

use thiserror::Error;

use crate::crypto::KeyExchangeError;
use crate::session::SessionState;
use crate::socket::SocketError;

/// Errors surfaced through the session tick and session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation is not legal in the current state
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: SessionState,
        /// What was attempted
        operation: &'static str,
    },

    /// A handshake or resume reply did not parse
    #[error("malformed handshake frame: {reason}")]
    Handshake {
        /// What was wrong with it
        reason: &'static str,
    },

    /// Key exchange failed
    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),

    /// The server refused the resume attempt
    #[error("server refused resumption with code {code:?}")]
    ReconnectRefused {
        /// Status code from the reply, `"200"` being success
        code: String,
    },

    /// The server claims to have received more than was ever sent
    #[error("server claims {server} bytes received, only {sent} sent")]
    ReconnectOutOfSync {
        /// Byte count the server reported
        server: u64,
        /// Byte count this side actually sent
        sent: u64,
    },

    /// The bytes needed for retransmission were already evicted
    #[error("resumption needs {needed} bytes, {cached} still cached")]
    ReconnectCacheMiss {
        /// Bytes the server is missing
        needed: u64,
        /// Bytes the replay cache still holds
        cached: u64,
    },

    /// A frame exceeded what the length prefix can express
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge {
        /// Attempted payload length
        len: usize,
        /// Largest encodable payload
        max: usize,
    },

    /// The session was closed
    #[error("session closed")]
    Closed,

    /// Underlying transport failure
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Errors surfaced by the request/response client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The schema does not declare the named package type
    #[error("package type {name:?} missing from schema")]
    MissingPackageType {
        /// The requested package type name
        name: String,
    },

    /// The schema does not declare the named protocol
    #[error("unknown protocol {name:?}")]
    UnknownProtocol {
        /// The requested protocol name
        name: String,
    },

    /// A handler is already installed for this protocol
    #[error("handler already registered for {name:?}")]
    DuplicateHandler {
        /// The protocol name
        name: String,
    },

    /// The protocol declares no request body but one was supplied, or
    /// vice versa
    #[error("protocol {name:?} {reason}")]
    RequestShape {
        /// The protocol name
        name: String,
        /// What was mismatched
        reason: &'static str,
    },

    /// The call was abandoned because the session closed
    #[error("session closed before a response arrived")]
    SessionClosed,

    /// The schema bundle failed to load
    #[error(transparent)]
    Schema(#[from] tether_proto::SchemaError),

    /// Encode/decode failure
    #[error(transparent)]
    Codec(#[from] tether_proto::CodecError),

    /// Session-layer failure
    #[error(transparent)]
    Session(#[from] SessionError),
}
