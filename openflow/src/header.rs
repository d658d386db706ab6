// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The fixed 8-byte header carried by every OpenFlow message.

use crate::wire::{Reader, Truncated};

/// The protocol version this switch speaks.
pub const OFP_VERSION: u8 = 0x01;

/// OpenFlow 1.0 message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Symmetric version announcement.
    Hello = 0,
    /// Error report.
    Error = 1,
    /// Liveness probe.
    EchoRequest = 2,
    /// Liveness probe answer.
    EchoReply = 3,
    /// Vendor extension.
    Vendor = 4,
    /// Switch capability query.
    FeaturesRequest = 5,
    /// Switch capability answer.
    FeaturesReply = 6,
    /// Configuration query.
    GetConfigRequest = 7,
    /// Configuration answer.
    GetConfigReply = 8,
    /// Configuration update.
    SetConfig = 9,
    /// Packet escalated to the controller.
    PacketIn = 10,
    /// Flow expired or deleted.
    FlowRemoved = 11,
    /// Port added, removed, or modified.
    PortStatus = 12,
    /// Controller-driven transmit.
    PacketOut = 13,
    /// Flow table update.
    FlowMod = 14,
    /// Port configuration update.
    PortMod = 15,
    /// Statistics query.
    StatsRequest = 16,
    /// Statistics answer, possibly multi-part.
    StatsReply = 17,
    /// Ordering fence request.
    BarrierRequest = 18,
    /// Ordering fence acknowledgement.
    BarrierReply = 19,
}

/// Error for a type byte outside the OpenFlow 1.0 message space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown OpenFlow message type {0}")]
pub struct UnknownMsgType(pub u8);

impl TryFrom<u8> for MsgType {
    type Error = UnknownMsgType;

    fn try_from(value: u8) -> Result<Self, UnknownMsgType> {
        #[allow(clippy::enum_glob_use)]
        use MsgType::*;
        Ok(match value {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            4 => Vendor,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => PortMod,
            16 => StatsRequest,
            17 => StatsReply,
            18 => BarrierRequest,
            19 => BarrierReply,
            other => return Err(UnknownMsgType(other)),
        })
    }
}

/// The OpenFlow header: version, type, total length, transaction id.
///
/// The type is kept as the raw byte so that a request with an unknown type
/// can still be echoed back inside a `BAD_REQUEST/BAD_TYPE` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Wire protocol version.
    pub version: u8,
    /// Raw message type byte.
    pub msg_type: u8,
    /// Total message length, header included.
    pub length: u16,
    /// Transaction id chosen by the requester.
    pub xid: u32,
}

impl Header {
    /// Encoded size of the header.
    pub const SIZE: usize = 8;

    /// Decode a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] when fewer than [`Header::SIZE`] bytes remain.
    pub fn decode(r: &mut Reader<'_>) -> Result<Header, Truncated> {
        let version = r.take_u8()?;
        let msg_type = r.take_u8()?;
        let length = r.take_u16()?;
        let xid = r.take_u32()?;
        Ok(Header {
            version,
            msg_type,
            length,
            xid,
        })
    }

    /// Typed view of the raw type byte.
    ///
    /// # Errors
    ///
    /// Fails with [`UnknownMsgType`] for a byte outside the 1.0 message space.
    pub fn typ(&self) -> Result<MsgType, UnknownMsgType> {
        MsgType::try_from(self.msg_type)
    }
}
