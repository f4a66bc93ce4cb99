//! Resumable session state machine.
//!
//! A session rides an unreliable [`FrameSocket`] and gives the layers above
//! it one guarantee: the payload byte stream is delivered in order, across
//! transport drops, or the session lands in a terminal failure state that
//! says exactly why it could not.
//!
//! ```text
//!  NewConnect ──reply──> Forward <──────resume ok────── Reconnect
//!      │                   │  reconnect()                  │
//!      │                   └──────────────────────────────>│
//!      │                                                   ├──> Refused
//!      └──close()──> Closed <──close()── (any)             ├──> OutOfSync
//!                                                          └──> CacheMiss
//! ```
//!
//! On connect the session runs a Diffie-Hellman handshake; the derived
//! secret never travels, it only keys the HMAC that authenticates later
//! resume attempts. While forwarding, every transmitted frame is counted
//! and remembered in the replay cache. On resume the server reports how
//! many payload bytes it received and the session retransmits the missing
//! tail from the cache, verbatim and in order.
//!
//! The state machine is pure protocol logic: no clocks, no global RNG, no
//! blocking calls. [`Session::update`] pumps the socket once, consumes at
//! most one inbound frame, and returns; timeouts and retry policy belong to
//! the caller driving the tick loop.

use std::collections::VecDeque;
use std::str;

use bytes::Bytes;
use tracing::{debug, error};

use crate::buffer::{Endian, FrameBuffer};
use crate::cache::ReplayCache;
use crate::crypto::{self, DhKey, SHARED_SECRET_LEN};
use crate::entropy::Entropy;
use crate::error::SessionError;
use crate::socket::{FrameSocket, SocketStatus};

/// Width of the frame length prefix on the wire.
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Reply code the server sends for an accepted resume.
const RESUME_OK: &str = "200";

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake sent, waiting for the server's key and session id
    NewConnect,
    /// Established; traffic flows and is cached for resumption
    Forward,
    /// Resume request sent, waiting for the server's byte count
    Reconnect,
    /// Terminal: the server refused the resume
    ReconnectRefused,
    /// Terminal: the server claims more bytes than were sent
    ReconnectOutOfSync,
    /// Terminal: the retransmit tail was already evicted
    ReconnectCacheMiss,
    /// Closed by the caller
    Closed,
}

impl SessionState {
    /// Whether no further traffic can ever flow in this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::ReconnectRefused
                | SessionState::ReconnectOutOfSync
                | SessionState::ReconnectCacheMiss
                | SessionState::Closed
        )
    }
}

/// Result of one [`Session::update`] pass.
#[derive(Debug)]
pub struct Tick {
    /// Whether the pass completed without a session error
    pub ok: bool,
    /// Transport condition, surfaced verbatim; [`SocketStatus::ConnectBreak`]
    /// is the caller's cue to invoke [`Session::reconnect`]
    pub status: SocketStatus,
    /// The error that made `ok` false
    pub error: Option<SessionError>,
}

/// Callback invoked with the outcome of a resume attempt.
pub type ReconnectCallback = Box<dyn FnOnce(bool)>;

/// A resumable session over a [`FrameSocket`].
pub struct Session<S: FrameSocket> {
    socket: S,
    state: SessionState,
    /// Server-assigned session id, 0 until the handshake completes
    id: u64,
    /// Monotonic resume counter proving freshness to the server
    reconnect_index: u32,
    /// Payload bytes transmitted in `Forward` (length prefixes excluded)
    sent_bytes: u64,
    /// Payload bytes received in `Forward` (length prefixes excluded)
    recv_bytes: u64,
    key: Option<DhKey>,
    secret: Option<[u8; SHARED_SECRET_LEN]>,
    cache: ReplayCache,
    /// Sends queued while the handshake is still in flight
    queued: Vec<Bytes>,
    inbox: FrameBuffer,
    delivered: VecDeque<Bytes>,
    reconnect_cb: Option<ReconnectCallback>,
}

impl<S: FrameSocket> Session<S> {
    /// Start a session: generate a key pair and transmit the handshake.
    ///
    /// `target` names the backend the relay should attach to; `flag` is an
    /// opaque field the server interprets.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the handshake frame cannot be queued on
    /// the transport.
    pub fn connect(
        socket: S,
        target: &str,
        flag: &str,
        entropy: &mut dyn Entropy,
    ) -> Result<Self, SessionError> {
        let key = DhKey::generate(entropy);
        let hello = format!(
            "0\n{}\n{}\n{}",
            crypto::b64_encode(&key.public_bytes()),
            target,
            flag
        );

        let mut session = Self {
            socket,
            state: SessionState::NewConnect,
            id: 0,
            reconnect_index: 0,
            sent_bytes: 0,
            recv_bytes: 0,
            key: Some(key),
            secret: None,
            cache: ReplayCache::new(),
            queued: Vec::new(),
            inbox: FrameBuffer::new(),
            delivered: VecDeque::new(),
            reconnect_cb: None,
        };
        session.transmit(hello.as_bytes())?;
        debug!(server = target, "handshake sent");
        Ok(session)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server-assigned session id (0 before the handshake completes).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// How many resume attempts have been made.
    #[must_use]
    pub fn reconnect_index(&self) -> u32 {
        self.reconnect_index
    }

    /// Payload bytes transmitted so far.
    #[must_use]
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    /// Payload bytes received so far.
    #[must_use]
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    /// Whether traffic currently flows.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Forward
    }

    /// The negotiated shared secret, for diagnostics and test harnesses.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8; SHARED_SECRET_LEN]> {
        self.secret.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Send one application frame.
    ///
    /// Behavior depends on state: queued before the handshake completes,
    /// transmitted and cached while forwarding, cached (for the pending
    /// retransmit) while a resume is in flight, and silently dropped in
    /// terminal states.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::FrameTooLarge`] for oversized frames and
    /// transport errors from the forward path.
    pub fn send(&mut self, frame: Bytes) -> Result<(), SessionError> {
        if frame.len() > MAX_FRAME_PAYLOAD {
            return Err(SessionError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        match self.state {
            SessionState::NewConnect => {
                self.queued.push(frame);
                Ok(())
            }
            SessionState::Forward => self.forward_send(frame),
            SessionState::Reconnect => {
                // Counted and cached now; the resume reply's byte gap covers
                // it and the retransmit path flushes it.
                self.sent_bytes += frame.len() as u64;
                self.cache.insert(frame);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Take the next received application frame.
    pub fn poll_frame(&mut self) -> Option<Bytes> {
        self.delivered.pop_front()
    }

    /// One cooperative tick: pump the transport, ingest arrived chunks, and
    /// let the current state consume at most one complete frame.
    pub fn update(&mut self) -> Tick {
        if self.state == SessionState::Closed {
            return Tick {
                ok: false,
                status: SocketStatus::Closed,
                error: Some(SessionError::Closed),
            };
        }

        let status = match self.socket.update() {
            Ok(status) => status,
            Err(err) => {
                return Tick {
                    ok: false,
                    status: SocketStatus::Closed,
                    error: Some(SessionError::Socket(err)),
                }
            }
        };

        while let Some(chunk) = self.socket.recv() {
            self.inbox.push(&chunk);
        }

        let error = self.dispatch_one().err();
        Tick { ok: error.is_none(), status, error }
    }

    /// Begin a resume attempt. Legal from `Forward` (after a transport
    /// break) and from `Reconnect` (retrying a stalled attempt).
    ///
    /// The callback, if given, fires exactly once with the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] outside those states, or a
    /// transport error if the re-dial fails.
    pub fn reconnect(&mut self, cb: Option<ReconnectCallback>) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Forward | SessionState::Reconnect) {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "reconnect",
            });
        }
        let Some(secret) = self.secret else {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "reconnect without a shared secret",
            });
        };

        self.reconnect_index += 1;
        self.socket.reconnect()?;
        // Bytes from the dead link are meaningless on the new one.
        self.inbox = FrameBuffer::new();

        let content = format!("{}\n{}\n{}\n", self.id, self.reconnect_index, self.recv_bytes);
        let mac = crypto::resume_mac(&secret, content.as_bytes());
        let frame = format!("{content}{}\n", crypto::b64_encode(&mac));
        self.transmit(frame.as_bytes())?;

        if let Some(cb) = cb {
            self.reconnect_cb = Some(cb);
        }
        self.state = SessionState::Reconnect;
        debug!(
            session = self.id,
            index = self.reconnect_index,
            recv_bytes = self.recv_bytes,
            "resume requested"
        );
        Ok(())
    }

    /// Tear the session down: close the transport, drop queued traffic,
    /// and fail any pending reconnect callback.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.socket.close();
        self.state = SessionState::Closed;
        self.queued.clear();
        self.cache.clear();
        self.delivered.clear();
        self.inbox = FrameBuffer::new();
        if let Some(cb) = self.reconnect_cb.take() {
            cb(false);
        }
        debug!(session = self.id, "session closed");
    }

    /// Transmit a length-prefixed frame without touching counters or cache.
    fn transmit(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(SessionError::FrameTooLarge {
                len: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let prefix = (payload.len() as u16).to_be_bytes();
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(payload);
        self.socket.send(&buf)?;
        Ok(())
    }

    /// The forward-path send: transmit, count, cache.
    fn forward_send(&mut self, frame: Bytes) -> Result<(), SessionError> {
        self.transmit(&frame)?;
        self.sent_bytes += frame.len() as u64;
        self.cache.insert(frame);
        Ok(())
    }

    fn dispatch_one(&mut self) -> Result<(), SessionError> {
        let Some(frame) = self.inbox.pop_msg(FRAME_HEADER_LEN, Endian::Big) else {
            return Ok(());
        };
        match self.state {
            SessionState::NewConnect => self.on_handshake_reply(&frame),
            SessionState::Forward => {
                self.recv_bytes += frame.len() as u64;
                self.delivered.push_back(frame);
                Ok(())
            }
            SessionState::Reconnect => self.on_resume_reply(&frame),
            // Terminal states drop inbound traffic.
            _ => Ok(()),
        }
    }

    /// Handle `"<id>\n<server_pub_b64>\n..."`; extra lines are ignored.
    fn on_handshake_reply(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        let text = str::from_utf8(frame)
            .map_err(|_| SessionError::Handshake { reason: "reply is not UTF-8" })?;
        let mut lines = text.split('\n');
        let id = lines
            .next()
            .and_then(|l| l.trim().parse::<u64>().ok())
            .ok_or(SessionError::Handshake { reason: "missing session id" })?;
        let server_public = lines
            .next()
            .and_then(crypto::b64_decode)
            .ok_or(SessionError::Handshake { reason: "missing server public key" })?;

        let key = self
            .key
            .as_ref()
            .ok_or(SessionError::Handshake { reason: "no private key" })?;
        let secret = key.shared_secret(&server_public)?;

        self.id = id;
        self.secret = Some(secret);
        self.state = SessionState::Forward;
        debug!(session = id, "handshake complete");

        // Flush traffic queued while the handshake was in flight.
        for frame in std::mem::take(&mut self.queued) {
            self.forward_send(frame)?;
        }
        Ok(())
    }

    /// Handle `"<server_recv>\n<code>\n..."`; extra lines are ignored.
    fn on_resume_reply(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        let parsed = str::from_utf8(frame).ok().and_then(|text| {
            let mut lines = text.split('\n');
            let server_recv = lines.next()?.trim().parse::<u64>().ok()?;
            let code = lines.next()?.trim().to_string();
            Some((server_recv, code))
        });
        let Some((server_recv, code)) = parsed else {
            return self.fail_resume(
                SessionState::ReconnectRefused,
                SessionError::Handshake { reason: "malformed resume reply" },
            );
        };

        if code != RESUME_OK {
            return self.fail_resume(
                SessionState::ReconnectRefused,
                SessionError::ReconnectRefused { code },
            );
        }
        if server_recv > self.sent_bytes {
            return self.fail_resume(
                SessionState::ReconnectOutOfSync,
                SessionError::ReconnectOutOfSync { server: server_recv, sent: self.sent_bytes },
            );
        }

        let needed = self.sent_bytes - server_recv;
        if needed > 0 {
            let tail = usize::try_from(needed)
                .ok()
                .and_then(|n| self.cache.tail(n));
            let Some(tail) = tail else {
                return self.fail_resume(
                    SessionState::ReconnectCacheMiss,
                    SessionError::ReconnectCacheMiss {
                        needed,
                        cached: self.cache.cached_bytes() as u64,
                    },
                );
            };
            // Verbatim tail, re-framed; counters and cache are untouched
            // because these bytes were already accounted at first send.
            for chunk in tail.chunks(MAX_FRAME_PAYLOAD) {
                self.transmit(chunk)?;
            }
            debug!(session = self.id, bytes = needed, "retransmitted tail");
        }

        self.state = SessionState::Forward;
        if let Some(cb) = self.reconnect_cb.take() {
            cb(true);
        }
        debug!(session = self.id, "resume complete");
        Ok(())
    }

    fn fail_resume(
        &mut self,
        state: SessionState,
        err: SessionError,
    ) -> Result<(), SessionError> {
        error!(session = self.id, state = ?state, "resume failed: {err}");
        self.state = state;
        if let Some(cb) = self.reconnect_cb.take() {
            cb(false);
        }
        Err(err)
    }
}
