// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Two-phase outbound message builder.

use crate::header::{Header, MsgType, OFP_VERSION};

/// Error for a finished message longer than the 16-bit length field allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("OpenFlow message of {0} bytes exceeds the 65535-byte framing limit")]
pub struct MsgTooLarge(pub usize);

/// An outbound OpenFlow message under construction.
///
/// [`MsgBuf::new`] reserves an upper bound and writes the header with a
/// placeholder length; the body is then appended incrementally and
/// [`MsgBuf::finish`] patches the length to the exact final size.  This is
/// what lets replies whose size depends on iteration (features, statistics)
/// be built in one pass.
#[derive(Debug)]
pub struct MsgBuf {
    buf: Vec<u8>,
}

impl MsgBuf {
    /// Start a message, reserving `body_hint` bytes beyond the header.
    #[must_use]
    pub fn new(msg_type: MsgType, xid: u32, body_hint: usize) -> MsgBuf {
        let mut buf = Vec::with_capacity(Header::SIZE + body_hint);
        buf.push(OFP_VERSION);
        buf.push(msg_type as u8);
        buf.extend_from_slice(&[0, 0]); // patched in finish()
        buf.extend_from_slice(&xid.to_be_bytes());
        MsgBuf { buf }
    }

    /// Bytes written so far, header included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether only the header has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.len() == Header::SIZE
    }

    /// Append a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a big-endian `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a big-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a big-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Append `n` zero bytes (padding).
    pub fn put_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Access to the accumulated bytes for body writers that encode directly.
    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Patch the length field and yield the finished message.
    ///
    /// # Errors
    ///
    /// Fails with [`MsgTooLarge`] when the message exceeds 65,535 bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, MsgTooLarge> {
        let len = self.buf.len();
        let Ok(wire_len) = u16::try_from(len) else {
            return Err(MsgTooLarge(len));
        };
        self.buf[2..4].copy_from_slice(&wire_len.to_be_bytes());
        Ok(self.buf)
    }
}
