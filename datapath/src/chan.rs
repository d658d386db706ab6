// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The control channel: transport seam, envelope framing, and every
//! OpenFlow message the datapath emits.
//!
//! Outbound messages are built in two phases: [`MsgBuf`] reserves an upper
//! bound and the exact length is patched in when the body is complete, so
//! iteration-sized replies (features, statistics) need no measuring prepass.
//! Delivery is unicast when a [`Sender`] is known and multicast on the
//! datapath's notification group otherwise.

use crate::dp::Datapath;
use crate::frame::Frame;
use crate::pipeline::RemovedFlow;
use crate::port::Port;
use concurrency::sync::Arc;
use errno::DpErrno;
use openflow::message::{ErrorKind, PacketInReason, PortStatusReason};
use openflow::port::{PortConfig, PortNo};
use openflow::{MsgBuf, MsgType, NO_BUFFER, PhyPort};
use tracing::debug;

/// Identity of a transport peer (a connected controller process).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u32);

/// One of the pre-allocated notification groups.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Number of pre-allocated notification groups.
///
/// Group allocation must not block, so a fixed, power-of-two set is created
/// up front and each datapath hashes onto one; listeners filter on the
/// envelope's `dp_idx`.
pub const NOTIFY_GROUPS: u32 = 16;

/// `dp_idx` sentinel for envelopes that concern no datapath.
pub const DP_NONE: u32 = u32::MAX;

/// Identity of one controller request, for reply correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sender {
    /// The requesting peer.
    pub peer: PeerId,
    /// Transport sequence number of the request.
    pub seq: u32,
    /// OpenFlow transaction id of the request.
    pub xid: u32,
}

/// Datagram send side of the management transport.
///
/// Sends never block; a full or vanished peer drops the message.
pub trait Transport: Send + Sync {
    /// Deliver to one peer.
    ///
    /// # Errors
    ///
    /// Returns the errno delivery failed with.
    fn unicast(&self, peer: PeerId, msg: &[u8]) -> Result<(), DpErrno>;

    /// Deliver to every member of a notification group.
    ///
    /// # Errors
    ///
    /// Returns the errno delivery failed with.
    fn multicast(&self, group: GroupId, msg: &[u8]) -> Result<(), DpErrno>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport")
    }
}

/// The management-transport envelope wrapped around every message:
/// a 16-byte header (total length, op, flags, sequence, `dp_idx`) followed
/// by 4-byte-aligned type/length/value attributes.
pub mod envelope {
    use openflow::wire::{Reader, Truncated};

    /// Create a datapath.
    pub const OP_ADD_DP: u16 = 1;
    /// Destroy a datapath.
    pub const OP_DEL_DP: u16 = 2;
    /// Query a datapath's identity.
    pub const OP_QUERY_DP: u16 = 3;
    /// Attach a named interface.
    pub const OP_ADD_PORT: u16 = 4;
    /// Detach a named interface.
    pub const OP_DEL_PORT: u16 = 5;
    /// Carry an OpenFlow payload.
    pub const OP_OPENFLOW: u16 = 6;
    /// Acknowledge an administrative request with an errno.
    pub const OP_RESULT: u16 = 7;
    /// Transport-level: join a notification group.
    pub const OP_LISTEN: u16 = 8;

    /// Attribute: OpenFlow payload bytes.
    pub const ATTR_OPENFLOW: u16 = 1;
    /// Attribute: NUL-terminated port (interface) name.
    pub const ATTR_PORT_NAME: u16 = 2;
    /// Attribute: NUL-terminated datapath name.
    pub const ATTR_DP_NAME: u16 = 3;
    /// Attribute: notification group id (u32).
    pub const ATTR_MC_GROUP: u16 = 4;
    /// Attribute: errno (u32, two's complement).
    pub const ATTR_ERRNO: u16 = 5;

    /// Incremental envelope writer.
    #[derive(Debug)]
    pub struct EnvelopeBuilder {
        buf: Vec<u8>,
    }

    impl EnvelopeBuilder {
        /// Start an envelope.
        #[must_use]
        pub fn new(op: u16, seq: u32, dp_idx: u32) -> EnvelopeBuilder {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(&[0, 0, 0, 0]); // total length, patched in finish()
            buf.extend_from_slice(&op.to_be_bytes());
            buf.extend_from_slice(&0u16.to_be_bytes()); // flags, reserved
            buf.extend_from_slice(&seq.to_be_bytes());
            buf.extend_from_slice(&dp_idx.to_be_bytes());
            EnvelopeBuilder { buf }
        }

        /// Append a byte-string attribute.
        #[must_use]
        pub fn attr(mut self, attr_type: u16, payload: &[u8]) -> EnvelopeBuilder {
            #[allow(clippy::cast_possible_truncation)] // payloads bounded by the OpenFlow limit
            let total = (4 + payload.len()) as u16;
            self.buf.extend_from_slice(&attr_type.to_be_bytes());
            self.buf.extend_from_slice(&total.to_be_bytes());
            self.buf.extend_from_slice(payload);
            while self.buf.len() % 4 != 0 {
                self.buf.push(0);
            }
            self
        }

        /// Append a `u32` attribute.
        #[must_use]
        pub fn attr_u32(self, attr_type: u16, value: u32) -> EnvelopeBuilder {
            self.attr(attr_type, &value.to_be_bytes())
        }

        /// Append a NUL-terminated string attribute.
        #[must_use]
        pub fn attr_str(self, attr_type: u16, value: &str) -> EnvelopeBuilder {
            let mut bytes = value.as_bytes().to_vec();
            bytes.push(0);
            self.attr(attr_type, &bytes)
        }

        /// Patch the total length and yield the datagram.
        #[must_use]
        pub fn finish(mut self) -> Vec<u8> {
            #[allow(clippy::cast_possible_truncation)] // bounded by the OpenFlow limit
            let len = self.buf.len() as u32;
            self.buf[0..4].copy_from_slice(&len.to_be_bytes());
            self.buf
        }
    }

    /// Build the envelope around an outbound OpenFlow message.
    #[must_use]
    pub fn wrap_openflow(dp_idx: u32, seq: u32, of_msg: &[u8]) -> Vec<u8> {
        EnvelopeBuilder::new(OP_OPENFLOW, seq, dp_idx)
            .attr(ATTR_OPENFLOW, of_msg)
            .finish()
    }

    /// Build a RESULT acknowledgement.
    #[must_use]
    pub fn result(seq: u32, dp_idx: u32, errno: i32) -> Vec<u8> {
        #[allow(clippy::cast_sign_loss)] // two's complement on the wire
        let word = errno as u32;
        EnvelopeBuilder::new(OP_RESULT, seq, dp_idx)
            .attr_u32(ATTR_ERRNO, word)
            .finish()
    }

    /// A decoded envelope view over a received datagram.
    #[derive(Debug)]
    pub struct Envelope<'buf> {
        /// Operation code.
        pub op: u16,
        /// Reserved flag word.
        pub flags: u16,
        /// Transport sequence number.
        pub seq: u32,
        /// Target datapath index, or [`super::DP_NONE`].
        pub dp_idx: u32,
        attrs: Vec<(u16, &'buf [u8])>,
    }

    impl<'buf> Envelope<'buf> {
        /// Decode a datagram.
        ///
        /// # Errors
        ///
        /// Fails with [`Truncated`] when the header or any attribute is cut
        /// short, or when the embedded total length disagrees with the
        /// datagram.
        pub fn decode(buf: &'buf [u8]) -> Result<Envelope<'buf>, Truncated> {
            let mut r = Reader::new(buf);
            let total = r.take_u32()? as usize;
            if total != buf.len() {
                return Err(Truncated {
                    expected: total,
                    actual: buf.len(),
                });
            }
            let op = r.take_u16()?;
            let flags = r.take_u16()?;
            let seq = r.take_u32()?;
            let dp_idx = r.take_u32()?;
            let mut attrs = Vec::new();
            while r.remaining() >= 4 {
                let attr_type = r.take_u16()?;
                let attr_len = r.take_u16()? as usize;
                if attr_len < 4 {
                    return Err(Truncated {
                        expected: 4,
                        actual: attr_len,
                    });
                }
                let payload = r.take(attr_len - 4)?;
                let pad = (4 - (attr_len % 4)) % 4;
                r.skip(pad.min(r.remaining()))?;
                attrs.push((attr_type, payload));
            }
            Ok(Envelope {
                op,
                flags,
                seq,
                dp_idx,
                attrs,
            })
        }

        /// The payload of the first attribute of type `attr_type`.
        #[must_use]
        pub fn attr(&self, attr_type: u16) -> Option<&'buf [u8]> {
            self.attrs
                .iter()
                .find(|(t, _)| *t == attr_type)
                .map(|(_, p)| *p)
        }

        /// A `u32` attribute.
        #[must_use]
        pub fn attr_u32(&self, attr_type: u16) -> Option<u32> {
            let p = self.attr(attr_type)?;
            if p.len() != 4 {
                return None;
            }
            Some(u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
        }

        /// A NUL-terminated string attribute.
        #[must_use]
        pub fn attr_str(&self, attr_type: u16) -> Option<&'buf str> {
            let p = self.attr(attr_type)?;
            let end = p.iter().position(|b| *b == 0)?;
            std::str::from_utf8(&p[..end]).ok()
        }
    }
}

/// The per-datapath send side: a transport handle plus the notification
/// group the datapath hashed onto.
#[derive(Debug)]
pub struct ControlChan {
    transport: Arc<dyn Transport>,
    group: GroupId,
}

impl ControlChan {
    pub(crate) fn new(transport: Arc<dyn Transport>, dp_idx: u32) -> ControlChan {
        ControlChan {
            transport,
            group: GroupId(dp_idx % NOTIFY_GROUPS),
        }
    }

    /// The notification group this datapath multicasts on.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Finish `msg`, wrap it, and deliver it: unicast to `sender` when present,
/// multicast on the datapath's group otherwise.
///
/// # Errors
///
/// Fails with `NoBuffers` when the message exceeds the 16-bit length field,
/// or with the transport's errno.
pub fn send_openflow(dp: &Datapath, sender: Option<&Sender>, msg: MsgBuf) -> Result<(), DpErrno> {
    let of_msg = msg.finish().map_err(|e| {
        debug!("refusing oversized message on dp{}: {e}", dp.dp_idx());
        DpErrno::NoBuffers
    })?;
    let seq = sender.map_or(0, |s| s.seq);
    let datagram = envelope::wrap_openflow(dp.dp_idx(), seq, &of_msg);
    match sender {
        Some(s) => dp.chan().transport.unicast(s.peer, &datagram),
        None => dp.chan().transport.multicast(dp.chan().group, &datagram),
    }
}

/// Escalate a frame to the controller as a PACKET_IN.
///
/// The frame is stashed in the buffer pool when possible and truncated to
/// `max_len` only when a buffer id accompanies it; an unbuffered packet
/// travels whole.  The frame is consumed either way.
pub fn output_control(dp: &Datapath, frame: Frame, max_len: u16, reason: PacketInReason) {
    let buffer_id = dp.pool().stash(&frame);
    let fwd_len = if buffer_id == NO_BUFFER {
        frame.len()
    } else {
        frame.len().min(max_len as usize)
    };
    let in_port = frame.in_port().unwrap_or(PortNo::LOCAL);
    let mut msg = MsgBuf::new(MsgType::PacketIn, 0, 10 + fwd_len);
    msg.put_u32(buffer_id);
    #[allow(clippy::cast_possible_truncation)] // frames are bounded well below u16::MAX
    msg.put_u16(frame.len() as u16);
    msg.put_u16(in_port.0);
    msg.put_u8(reason as u8);
    msg.put_u8(0);
    msg.put_slice(&frame.bytes()[..fwd_len]);
    if let Err(e) = send_openflow(dp, None, msg) {
        debug!("dp{}: packet-in dropped: {e}", dp.dp_idx());
    }
}

/// Escalate a table miss, honoring the ingress port's `NO_PACKET_IN` bit
/// and the datapath's `miss_send_len`.
pub fn escalate_miss(dp: &Datapath, frame: Frame) {
    if let Some(in_port) = frame.in_port()
        && let Some(port) = dp.lookup_port(in_port)
        && port.config().contains(PortConfig::NO_PACKET_IN)
    {
        return;
    }
    output_control(dp, frame, dp.miss_send_len(), PacketInReason::NoMatch);
}

/// Send the features reply: datapath id, buffering, tables, capabilities,
/// and a descriptor for the local port plus every attached port.
///
/// # Errors
///
/// Returns the errno the send failed with.
pub fn send_features_reply(dp: &Datapath, sender: &Sender) -> Result<(), DpErrno> {
    /// Capability bits this datapath implements: flow, table, and port stats.
    const CAPABILITIES: u32 = 0b111;
    /// Action types the flow machinery accepts: OUTPUT through SET_TP_DST.
    const SUPPORTED_ACTIONS: u32 = (1 << 11) - 1;

    let ports = dp.ports().physical_ports();
    let mut msg = MsgBuf::new(
        MsgType::FeaturesReply,
        sender.xid,
        24 + PhyPort::SIZE * (ports.len() + 1),
    );
    msg.put_u64(dp.id());
    msg.put_u32(dp.pool().capacity());
    #[allow(clippy::cast_possible_truncation)] // table counts are single-byte by contract
    msg.put_u8(dp.pipeline().n_tables() as u8);
    msg.put_zeros(3);
    msg.put_u32(CAPABILITIES);
    msg.put_u32(SUPPORTED_ACTIONS);
    dp.local_port().describe().encode(msg.body_mut());
    for port in ports {
        port.describe().encode(msg.body_mut());
    }
    send_openflow(dp, Some(sender), msg)
}

/// Send the config reply for a GET_CONFIG request.
///
/// # Errors
///
/// Returns the errno the send failed with.
pub fn send_config_reply(dp: &Datapath, sender: &Sender) -> Result<(), DpErrno> {
    let mut msg = MsgBuf::new(MsgType::GetConfigReply, sender.xid, 4);
    msg.put_u16(dp.config_flags());
    msg.put_u16(dp.miss_send_len());
    send_openflow(dp, Some(sender), msg)
}

/// Echo a request body back with its xid.
///
/// # Errors
///
/// Returns the errno the send failed with.
pub fn send_echo_reply(dp: &Datapath, sender: &Sender, body: &[u8]) -> Result<(), DpErrno> {
    let mut msg = MsgBuf::new(MsgType::EchoReply, sender.xid, body.len());
    msg.put_slice(body);
    send_openflow(dp, Some(sender), msg)
}

/// Acknowledge a barrier.  All requests `sender` submitted earlier have
/// been processed by the time this is built, because the control path is
/// serialized.
///
/// # Errors
///
/// Returns the errno the send failed with.
pub fn send_barrier_reply(dp: &Datapath, sender: &Sender) -> Result<(), DpErrno> {
    send_openflow(
        dp,
        Some(sender),
        MsgBuf::new(MsgType::BarrierReply, sender.xid, 0),
    )
}

/// Report an error to `sender`, echoing up to 64 bytes of the offending
/// request.
pub fn send_error(dp: &Datapath, sender: &Sender, kind: ErrorKind, offending: &[u8]) {
    const ECHO_BYTES: usize = 64;
    let (etype, code) = kind.split();
    let data = &offending[..offending.len().min(ECHO_BYTES)];
    let mut msg = MsgBuf::new(MsgType::Error, sender.xid, 4 + data.len());
    msg.put_u16(etype);
    msg.put_u16(code);
    msg.put_slice(data);
    if let Err(e) = send_openflow(dp, Some(sender), msg) {
        debug!("dp{}: error message dropped: {e}", dp.dp_idx());
    }
}

/// Announce a port change on the notification group.
pub fn send_port_status(dp: &Datapath, reason: PortStatusReason, port: &Port) {
    let mut msg = MsgBuf::new(MsgType::PortStatus, 0, 8 + PhyPort::SIZE);
    msg.put_u8(reason as u8);
    msg.put_zeros(7);
    port.describe().encode(msg.body_mut());
    if let Err(e) = send_openflow(dp, None, msg) {
        debug!("dp{}: port-status dropped: {e}", dp.dp_idx());
    }
}

/// Announce a removed flow on the notification group.
///
/// Callers go through [`Datapath::notify_flow_removed`], which applies the
/// emergency / don't-notify filter.
pub(crate) fn send_flow_removed(dp: &Datapath, removed: &RemovedFlow) {
    let mut msg = MsgBuf::new(MsgType::FlowRemoved, 0, 80);
    removed.pattern.encode(msg.body_mut());
    msg.put_u64(removed.cookie);
    msg.put_u16(removed.priority);
    msg.put_u8(removed.reason as u8);
    msg.put_u8(0);
    #[allow(clippy::cast_possible_truncation)] // duration seconds fit u32 for any realistic uptime
    msg.put_u32(removed.duration.as_secs() as u32);
    msg.put_u32(removed.duration.subsec_nanos());
    msg.put_u16(removed.idle_timeout);
    msg.put_zeros(2);
    msg.put_u64(removed.packet_count);
    msg.put_u64(removed.byte_count);
    if let Err(e) = send_openflow(dp, None, msg) {
        debug!("dp{}: flow-removed dropped: {e}", dp.dp_idx());
    }
}

/// Greet a peer with the switch's OpenFlow version.
pub fn send_hello(transport: &dyn Transport, peer: PeerId, seq: u32) {
    if let Ok(of_msg) = MsgBuf::new(MsgType::Hello, 0, 0).finish() {
        let datagram = envelope::wrap_openflow(DP_NONE, seq, &of_msg);
        if let Err(e) = transport.unicast(peer, &datagram) {
            debug!("hello to peer {} dropped: {e}", peer.0);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::envelope::{
        ATTR_DP_NAME, ATTR_MC_GROUP, ATTR_OPENFLOW, Envelope, EnvelopeBuilder, OP_QUERY_DP,
        wrap_openflow,
    };

    #[test]
    fn envelope_round_trip() {
        let datagram = EnvelopeBuilder::new(OP_QUERY_DP, 42, 3)
            .attr_str(ATTR_DP_NAME, "of3")
            .attr_u32(ATTR_MC_GROUP, 3)
            .finish();
        let env = Envelope::decode(&datagram).unwrap();
        assert_eq!(env.op, OP_QUERY_DP);
        assert_eq!(env.seq, 42);
        assert_eq!(env.dp_idx, 3);
        assert_eq!(env.attr_str(ATTR_DP_NAME), Some("of3"));
        assert_eq!(env.attr_u32(ATTR_MC_GROUP), Some(3));
    }

    #[test]
    fn odd_length_attributes_are_padded() {
        let datagram = EnvelopeBuilder::new(OP_QUERY_DP, 0, 0)
            .attr(ATTR_OPENFLOW, &[1, 2, 3])
            .attr_u32(ATTR_MC_GROUP, 9)
            .finish();
        assert_eq!(datagram.len() % 4, 0);
        let env = Envelope::decode(&datagram).unwrap();
        assert_eq!(env.attr(ATTR_OPENFLOW), Some(&[1u8, 2, 3][..]));
        assert_eq!(env.attr_u32(ATTR_MC_GROUP), Some(9));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let datagram = wrap_openflow(0, 1, &[0u8; 8]);
        assert!(Envelope::decode(&datagram[..datagram.len() - 2]).is_err());
    }
}
