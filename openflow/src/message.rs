// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Message bodies the datapath consumes, and the small shared enums of the
//! ones it emits.
//!
//! Reply bodies (features, packet-in, flow-removed, port-status, ...) are
//! written straight into a [`crate::MsgBuf`] by their emitters, so only the
//! request side needs decoded structs here.

use crate::action::{Action, ActionDecodeError};
use crate::port::{PortConfig, PortFeatures, PortNo};
use crate::wire::{Reader, Truncated};

/// Buffer-id sentinel meaning "packet not stashed".
pub const NO_BUFFER: u32 = 0xffff_ffff;

bitflags::bitflags! {
    /// `OFPC_*` switch capability bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        /// Per-flow statistics.
        const FLOW_STATS = 1 << 0;
        /// Per-table statistics.
        const TABLE_STATS = 1 << 1;
        /// Per-port statistics.
        const PORT_STATS = 1 << 2;
        /// Spanning tree.
        const STP = 1 << 3;
        /// Reserved, must be zero.
        const RESERVED = 1 << 4;
        /// Can reassemble IP fragments.
        const IP_REASM = 1 << 5;
        /// Per-queue statistics.
        const QUEUE_STATS = 1 << 6;
        /// Match IP addresses in ARP packets.
        const ARP_MATCH_IP = 1 << 7;
    }
}

/// Fragment-handling bits of the switch config `flags` word.
pub mod frag {
    /// No special fragment handling.
    pub const NORMAL: u16 = 0;
    /// Drop fragments.
    pub const DROP: u16 = 1;
    /// Reassemble fragments.
    pub const REASM: u16 = 2;
    /// Mask of the fragment bits.
    pub const MASK: u16 = 3;
}

/// Reasons carried by a packet-in (`OFPR_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketInReason {
    /// No flow matched.
    NoMatch = 0,
    /// A flow explicitly sent to the controller.
    Action = 1,
}

/// Reasons carried by a port-status (`OFPPR_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortStatusReason {
    /// Port attached.
    Add = 0,
    /// Port detached.
    Delete = 1,
    /// Port configuration or state changed.
    Modify = 2,
}

/// The 4-byte body shared by config replies and set-config requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    /// Fragment-handling flags (see [`frag`]).
    pub flags: u16,
    /// Bytes of a table-miss packet forwarded to the controller.
    pub miss_send_len: u16,
}

impl SwitchConfig {
    /// Decode a config body.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] on fewer than four bytes.
    pub fn decode(body: &[u8]) -> Result<SwitchConfig, Truncated> {
        let mut r = Reader::new(body);
        Ok(SwitchConfig {
            flags: r.take_u16()?,
            miss_send_len: r.take_u16()?,
        })
    }
}

/// A decoded `ofp_packet_out` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// Buffered packet to transmit, or [`NO_BUFFER`] when `data` carries it.
    pub buffer_id: u32,
    /// Claimed ingress port for `IN_PORT`/flood semantics.
    pub in_port: PortNo,
    /// Actions to apply.
    pub actions: Vec<Action>,
    /// Inline packet bytes when not buffered.
    pub data: Vec<u8>,
}

/// Errors decoding a packet-out.
#[derive(Debug, thiserror::Error)]
pub enum PacketOutDecodeError {
    /// Body shorter than the fixed part or the claimed action list.
    #[error(transparent)]
    Truncated(#[from] Truncated),
    /// Malformed action list.
    #[error(transparent)]
    BadActions(#[from] ActionDecodeError),
}

impl PacketOut {
    /// Decode a packet-out body.
    ///
    /// # Errors
    ///
    /// Fails when the body is short or the action list malformed.
    pub fn decode(body: &[u8]) -> Result<PacketOut, PacketOutDecodeError> {
        let mut r = Reader::new(body);
        let buffer_id = r.take_u32()?;
        let in_port = PortNo(r.take_u16()?);
        let actions_len = r.take_u16()? as usize;
        let actions = Action::decode_list(r.take(actions_len)?)?;
        Ok(PacketOut {
            buffer_id,
            in_port,
            actions,
            data: r.take_rest().to_vec(),
        })
    }
}

/// A decoded `ofp_port_mod` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMod {
    /// Port to reconfigure.
    pub port_no: PortNo,
    /// Hardware address the requester believes the port has.
    pub hw_addr: [u8; 6],
    /// New values for the bits selected by `mask`.
    pub config: PortConfig,
    /// Bits of `config` to apply.
    pub mask: PortConfig,
    /// Features to advertise, zero to leave unchanged.
    pub advertise: PortFeatures,
}

impl PortMod {
    /// Decode a port-mod body.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] on fewer than 24 bytes.
    pub fn decode(body: &[u8]) -> Result<PortMod, Truncated> {
        let mut r = Reader::new(body);
        let port_no = PortNo(r.take_u16()?);
        let mut hw_addr = [0u8; 6];
        hw_addr.copy_from_slice(r.take(6)?);
        let config = PortConfig::from_bits_retain(r.take_u32()?);
        let mask = PortConfig::from_bits_retain(r.take_u32()?);
        let advertise = PortFeatures::from_bits_retain(r.take_u32()?);
        r.skip(4)?;
        Ok(PortMod {
            port_no,
            hw_addr,
            config,
            mask,
            advertise,
        })
    }
}

/// Typed (type, code) pairs for the error messages this datapath emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `OFPET_HELLO_FAILED / OFPHFC_INCOMPATIBLE`.
    HelloIncompatible,
    /// `OFPET_BAD_REQUEST / OFPBRC_BAD_VERSION`.
    BadVersion,
    /// `OFPET_BAD_REQUEST / OFPBRC_BAD_TYPE`.
    BadType,
    /// `OFPET_BAD_REQUEST / OFPBRC_BAD_STAT`.
    BadStat,
    /// `OFPET_BAD_REQUEST / OFPBRC_BAD_VENDOR`.
    BadVendor,
    /// `OFPET_BAD_REQUEST / OFPBRC_EPERM`.
    RequestEperm,
    /// `OFPET_BAD_REQUEST / OFPBRC_BAD_LEN`.
    BadLen,
    /// `OFPET_BAD_REQUEST / OFPBRC_BUFFER_EMPTY`.
    BufferEmpty,
    /// `OFPET_BAD_REQUEST / OFPBRC_BUFFER_UNKNOWN`.
    BufferUnknown,
    /// `OFPET_BAD_ACTION / OFPBAC_BAD_TYPE`.
    BadActionType,
    /// `OFPET_BAD_ACTION / OFPBAC_BAD_OUT_PORT`.
    BadOutPort,
    /// `OFPET_PORT_MOD_FAILED / OFPPMFC_BAD_PORT`.
    PortModBadPort,
}

impl ErrorKind {
    /// The on-wire (type, code) pair.
    #[must_use]
    pub fn split(self) -> (u16, u16) {
        match self {
            ErrorKind::HelloIncompatible => (0, 0),
            ErrorKind::BadVersion => (1, 0),
            ErrorKind::BadType => (1, 1),
            ErrorKind::BadStat => (1, 2),
            ErrorKind::BadVendor => (1, 3),
            ErrorKind::RequestEperm => (1, 5),
            ErrorKind::BadLen => (1, 6),
            ErrorKind::BufferEmpty => (1, 7),
            ErrorKind::BufferUnknown => (1, 8),
            ErrorKind::BadActionType => (2, 1),
            ErrorKind::BadOutPort => (2, 4),
            ErrorKind::PortModBadPort => (4, 0),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_out_decode_inline_data() {
        let mut body = Vec::new();
        body.extend_from_slice(&NO_BUFFER.to_be_bytes());
        body.extend_from_slice(&PortNo::NONE.0.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        Action::Output {
            port: PortNo(2),
            max_len: 0,
        }
        .encode(&mut body);
        body.extend_from_slice(&[0xaa; 60]);

        let po = PacketOut::decode(&body).unwrap();
        assert_eq!(po.buffer_id, NO_BUFFER);
        assert_eq!(po.actions.len(), 1);
        assert_eq!(po.data.len(), 60);
    }

    #[test]
    fn packet_out_actions_len_beyond_body() {
        let mut body = Vec::new();
        body.extend_from_slice(&NO_BUFFER.to_be_bytes());
        body.extend_from_slice(&PortNo::NONE.0.to_be_bytes());
        body.extend_from_slice(&64u16.to_be_bytes());
        assert!(matches!(
            PacketOut::decode(&body),
            Err(PacketOutDecodeError::Truncated(_))
        ));
    }

    #[test]
    fn port_mod_decode() {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&[2, 0, 0, 0, 0, 2]);
        body.extend_from_slice(&PortConfig::NO_FLOOD.bits().to_be_bytes());
        body.extend_from_slice(&PortConfig::NO_FLOOD.bits().to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&[0; 4]);
        let pm = PortMod::decode(&body).unwrap();
        assert_eq!(pm.port_no, PortNo(2));
        assert_eq!(pm.mask, PortConfig::NO_FLOOD);
    }
}
