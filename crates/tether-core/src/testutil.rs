//! Test doubles shared by the unit suites in this crate.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::entropy::Entropy;
use crate::socket::{FrameSocket, SocketError, SocketStatus};

/// Scriptable in-memory socket: records sent chunks, serves queued ones.
pub(crate) struct MockSocket {
    pub sent: Vec<Vec<u8>>,
    pub rx: VecDeque<Bytes>,
    pub status: SocketStatus,
    pub reconnects: usize,
    pub closed: bool,
}

impl Default for MockSocket {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            rx: VecDeque::new(),
            status: SocketStatus::Ready,
            reconnects: 0,
            closed: false,
        }
    }
}

impl MockSocket {
    /// Queue an inbound frame, adding the length prefix.
    pub fn deliver(&mut self, payload: &[u8]) {
        #[allow(clippy::cast_possible_truncation)]
        let prefix = (payload.len() as u16).to_be_bytes();
        let mut framed = prefix.to_vec();
        framed.extend_from_slice(payload);
        self.rx.push_back(Bytes::from(framed));
    }

    /// Payloads of every frame sent so far, prefixes stripped.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .map(|chunk| {
                let len = usize::from(u16::from_be_bytes([chunk[0], chunk[1]]));
                assert_eq!(chunk.len(), 2 + len, "chunk is one whole frame");
                chunk[2..].to_vec()
            })
            .collect()
    }
}

impl FrameSocket for MockSocket {
    fn update(&mut self) -> Result<SocketStatus, SocketError> {
        Ok(self.status)
    }

    fn send(&mut self, chunk: &[u8]) -> Result<(), SocketError> {
        if self.closed {
            return Err(SocketError::ConnectionClosed);
        }
        self.sent.push(chunk.to_vec());
        Ok(())
    }

    fn recv(&mut self) -> Option<Bytes> {
        self.rx.pop_front()
    }

    fn reconnect(&mut self) -> Result<(), SocketError> {
        self.reconnects += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Entropy that repeats one byte, for reproducible key material.
pub(crate) struct FixedEntropy(pub u8);

impl Entropy for FixedEntropy {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        buf.fill(self.0);
    }
}

/// Minimal schema-bundle builder for client tests.
pub(crate) mod bundle {
    pub enum Entry {
        Inline(i64),
        Chunk(Vec<u8>),
    }

    pub fn record(entries: &[(u16, Entry)]) -> Vec<u8> {
        let mut slots: Vec<u16> = Vec::new();
        let mut data: Vec<u8> = Vec::new();
        let mut last: i64 = -1;
        for (tag, entry) in entries {
            let tag = i64::from(*tag);
            assert!(tag > last);
            let skipped = tag - last - 1;
            if skipped > 0 {
                slots.push(u16::try_from((skipped - 1) * 2 + 1).unwrap());
            }
            match entry {
                Entry::Inline(v) => slots.push(u16::try_from((v + 1) * 2).unwrap()),
                Entry::Chunk(c) => {
                    slots.push(0);
                    data.extend_from_slice(&u32::try_from(c.len()).unwrap().to_le_bytes());
                    data.extend_from_slice(c);
                }
            }
            last = tag;
        }
        let mut out = Vec::new();
        out.extend_from_slice(&u16::try_from(slots.len()).unwrap().to_le_bytes());
        for slot in slots {
            out.extend_from_slice(&slot.to_le_bytes());
        }
        out.extend_from_slice(&data);
        out
    }

    pub fn chunk_list(items: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for item in items {
            out.extend_from_slice(&u32::try_from(item.len()).unwrap().to_le_bytes());
            out.extend_from_slice(item);
        }
        out
    }

    /// `(name, tag, builtin_code)` triples into a type record.
    pub fn simple_type(name: &str, fields: &[(&str, u16, i64)]) -> Vec<u8> {
        let fields: Vec<Vec<u8>> = fields
            .iter()
            .map(|(fname, tag, code)| {
                record(&[
                    (0, Entry::Chunk(fname.as_bytes().to_vec())),
                    (1, Entry::Inline(*code)),
                    (3, Entry::Inline(i64::from(*tag))),
                ])
            })
            .collect();
        record(&[
            (0, Entry::Chunk(name.as_bytes().to_vec())),
            (1, Entry::Chunk(chunk_list(&fields))),
        ])
    }

    pub fn protocol(
        name: &str,
        tag: i64,
        request: Option<i64>,
        response: Option<i64>,
        confirm: bool,
    ) -> Vec<u8> {
        let mut entries = vec![
            (0u16, Entry::Chunk(name.as_bytes().to_vec())),
            (1, Entry::Inline(tag)),
        ];
        if let Some(r) = request {
            entries.push((2, Entry::Inline(r)));
        }
        if let Some(r) = response {
            entries.push((3, Entry::Inline(r)));
        }
        if confirm {
            entries.push((4, Entry::Inline(1)));
        }
        record(&entries)
    }

    pub fn assemble(types: &[Vec<u8>], protocols: &[Vec<u8>]) -> Vec<u8> {
        record(&[
            (0, Entry::Chunk(chunk_list(types))),
            (1, Entry::Chunk(chunk_list(protocols))),
        ])
    }
}
