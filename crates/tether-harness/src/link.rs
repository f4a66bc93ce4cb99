//! In-memory transport link.
//!
//! A [`sim_link`] pair joins the client-side [`SimSocket`] (a
//! [`FrameSocket`] the session drives) to a server-side [`SimPeer`] handle
//! the test code reads and writes. Chunks cross instantly; the only
//! scripted fault is a link break, which discards everything in flight and
//! surfaces as [`SocketStatus::ConnectBreak`] until the client re-dials.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use tether_core::{FrameSocket, SocketError, SocketStatus};

#[derive(Default)]
struct LinkState {
    to_server: VecDeque<Bytes>,
    to_client: VecDeque<Bytes>,
    broken: bool,
    closed: bool,
    dial_count: usize,
}

/// Client side of the link; implements [`FrameSocket`].
pub struct SimSocket {
    state: Rc<RefCell<LinkState>>,
}

/// Server side of the link, driven directly by test code.
pub struct SimPeer {
    state: Rc<RefCell<LinkState>>,
}

/// Create a connected link.
#[must_use]
pub fn sim_link() -> (SimSocket, SimPeer) {
    let state = Rc::new(RefCell::new(LinkState { dial_count: 1, ..LinkState::default() }));
    (SimSocket { state: Rc::clone(&state) }, SimPeer { state })
}

impl FrameSocket for SimSocket {
    fn update(&mut self) -> Result<SocketStatus, SocketError> {
        let state = self.state.borrow();
        if state.closed {
            Ok(SocketStatus::Closed)
        } else if state.broken {
            Ok(SocketStatus::ConnectBreak)
        } else {
            Ok(SocketStatus::Ready)
        }
    }

    fn send(&mut self, chunk: &[u8]) -> Result<(), SocketError> {
        let mut state = self.state.borrow_mut();
        if state.closed || state.broken {
            return Err(SocketError::ConnectionClosed);
        }
        state.to_server.push_back(Bytes::copy_from_slice(chunk));
        Ok(())
    }

    fn recv(&mut self) -> Option<Bytes> {
        self.state.borrow_mut().to_client.pop_front()
    }

    fn reconnect(&mut self) -> Result<(), SocketError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(SocketError::ConnectionClosed);
        }
        state.broken = false;
        state.dial_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

impl SimPeer {
    /// Deliver raw bytes to the client side.
    pub fn send_chunk(&self, chunk: &[u8]) {
        let mut state = self.state.borrow_mut();
        if !state.closed && !state.broken {
            state.to_client.push_back(Bytes::copy_from_slice(chunk));
        }
    }

    /// Take the next chunk the client transmitted.
    pub fn recv_chunk(&self) -> Option<Bytes> {
        self.state.borrow_mut().to_server.pop_front()
    }

    /// Sever the link: everything in flight is lost and the client sees
    /// [`SocketStatus::ConnectBreak`] until it re-dials.
    pub fn break_link(&self) {
        let mut state = self.state.borrow_mut();
        state.broken = true;
        state.to_server.clear();
        state.to_client.clear();
    }

    /// Whether the client closed its side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// How many times the client has dialed (1 for the initial connect).
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.state.borrow().dial_count
    }
}
