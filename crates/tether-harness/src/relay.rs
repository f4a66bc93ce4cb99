//! Scripted relay-server double.
//!
//! Plays the server's half of the session protocol over a [`SimPeer`]:
//! answers the key-exchange hello, counts received payload bytes the way
//! the real relay does, verifies resume authenticators, and replies to
//! resume requests with either the true byte count or a scripted override
//! (to force refusal and mismatch paths).
//!
//! This is test infrastructure. Protocol violations panic with a message
//! rather than returning errors; a failing double should stop the test
//! immediately.

use bytes::Bytes;
use tether_core::crypto::{self, DhKey};
use tether_core::{Endian, Entropy, FrameBuffer};
use tracing::debug;

use crate::link::SimPeer;

/// What the double saw in the latest resume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRecord {
    /// Session id the client presented
    pub session_id: u64,
    /// Reconnect index the client presented
    pub index: u64,
    /// Bytes the client claims to have received
    pub client_recv: u64,
    /// Whether the HMAC verified against the shared secret
    pub mac_valid: bool,
}

enum RelayState {
    AwaitHello,
    Established,
    AwaitResume,
}

/// A scripted server-side counterpart for one client session.
pub struct RelayDouble {
    peer: SimPeer,
    inbox: FrameBuffer,
    key: DhKey,
    secret: Option<[u8; 32]>,
    session_id: u64,
    recv_bytes: u64,
    state: RelayState,
    frames: Vec<Bytes>,
    responder: Option<Box<dyn FnMut(&Bytes) -> Option<Vec<u8>>>>,
    resume_reply_script: Option<String>,
    /// Latest resume request, for assertions.
    pub last_resume: Option<ResumeRecord>,
}

impl RelayDouble {
    /// A double that will assign `session_id` during the handshake.
    pub fn new(peer: SimPeer, session_id: u64, entropy: &mut dyn Entropy) -> Self {
        Self {
            peer,
            inbox: FrameBuffer::new(),
            key: DhKey::generate(entropy),
            secret: None,
            session_id,
            recv_bytes: 0,
            state: RelayState::AwaitHello,
            frames: Vec::new(),
            responder: None,
            resume_reply_script: None,
            last_resume: None,
        }
    }

    /// Install a per-frame hook; a returned payload is sent back verbatim.
    pub fn set_responder<F>(&mut self, responder: F)
    where
        F: FnMut(&Bytes) -> Option<Vec<u8>> + 'static,
    {
        self.responder = Some(Box::new(responder));
    }

    /// Force the next resume reply instead of the true byte count.
    pub fn script_resume_reply(&mut self, reply: impl Into<String>) {
        self.resume_reply_script = Some(reply.into());
    }

    /// Sever the link and expect a resume request on the next dial.
    pub fn break_link(&mut self) {
        self.peer.break_link();
        self.inbox = FrameBuffer::new();
        self.state = RelayState::AwaitResume;
    }

    /// Payload bytes received since the handshake.
    #[must_use]
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    /// Application frames received, in order.
    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// The received payload stream with frame boundaries erased.
    #[must_use]
    pub fn stream(&self) -> Vec<u8> {
        self.frames.iter().flat_map(|f| f.iter().copied()).collect()
    }

    /// The shared secret derived during the handshake.
    #[must_use]
    pub fn secret(&self) -> Option<&[u8; 32]> {
        self.secret.as_ref()
    }

    /// The server side of the link.
    #[must_use]
    pub fn peer(&self) -> &SimPeer {
        &self.peer
    }

    /// Push one application frame toward the client.
    pub fn send(&mut self, payload: &[u8]) {
        self.send_frame(payload);
    }

    /// Process everything the client has transmitted so far.
    ///
    /// # Panics
    ///
    /// Panics on protocol violations: malformed hello, resume for an
    /// unknown session id, traffic before the handshake.
    pub fn pump(&mut self) {
        while let Some(chunk) = self.peer.recv_chunk() {
            self.inbox.push(&chunk);
        }
        while let Some(frame) = self.inbox.pop_msg(2, Endian::Big) {
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &Bytes) {
        match self.state {
            RelayState::AwaitHello => self.on_hello(frame),
            RelayState::Established => self.on_app_frame(frame.clone()),
            RelayState::AwaitResume => self.on_resume(frame),
        }
    }

    fn on_hello(&mut self, frame: &[u8]) {
        let text = std::str::from_utf8(frame).expect("hello frame is text");
        let mut lines = text.split('\n');
        assert_eq!(lines.next(), Some("0"), "hello starts with a zero line");
        let client_public = lines
            .next()
            .and_then(crypto::b64_decode)
            .expect("hello carries the client public key");

        self.secret = Some(
            self.key
                .shared_secret(&client_public)
                .expect("client public key is a group element"),
        );
        let reply = format!(
            "{}\n{}\n",
            self.session_id,
            crypto::b64_encode(&self.key.public_bytes())
        );
        self.send_frame(reply.as_bytes());
        self.state = RelayState::Established;
        debug!(session = self.session_id, "relay double: handshake complete");
    }

    fn on_app_frame(&mut self, frame: Bytes) {
        self.recv_bytes += frame.len() as u64;
        let reply = self.responder.as_mut().and_then(|hook| hook(&frame));
        self.frames.push(frame);
        if let Some(payload) = reply {
            self.send_frame(&payload);
        }
    }

    fn on_resume(&mut self, frame: &[u8]) {
        let text = std::str::from_utf8(frame).expect("resume frame is text");
        let mut lines = text.split('\n');
        let session_id: u64 = lines
            .next()
            .and_then(|l| l.parse().ok())
            .expect("resume carries a session id");
        let index: u64 = lines
            .next()
            .and_then(|l| l.parse().ok())
            .expect("resume carries an index");
        let client_recv: u64 = lines
            .next()
            .and_then(|l| l.parse().ok())
            .expect("resume carries a byte count");
        let mac = lines
            .next()
            .and_then(crypto::b64_decode)
            .expect("resume carries an authenticator");

        assert_eq!(session_id, self.session_id, "resume for this session");
        let content = format!("{session_id}\n{index}\n{client_recv}\n");
        let secret = self.secret.expect("resume only after a handshake");
        let mac_valid = mac == crypto::resume_mac(&secret, content.as_bytes());

        self.last_resume = Some(ResumeRecord { session_id, index, client_recv, mac_valid });

        let reply = self
            .resume_reply_script
            .take()
            .unwrap_or_else(|| format!("{}\n200\n", self.recv_bytes));
        self.send_frame(reply.as_bytes());
        self.state = RelayState::Established;
        debug!(session = self.session_id, index, "relay double: resume answered");
    }

    fn send_frame(&mut self, payload: &[u8]) {
        let len = u16::try_from(payload.len()).expect("frame fits the length prefix");
        let mut framed = len.to_be_bytes().to_vec();
        framed.extend_from_slice(payload);
        self.peer.send_chunk(&framed);
    }
}
