// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port numbers, port bitmaps, and the physical-port descriptor.

use crate::wire::{Reader, Truncated, put_name};
use std::fmt::{self, Display, Formatter};

/// A 16-bit OpenFlow port number.
///
/// Values above [`PortNo::MAX`] are reserved and change the meaning of an
/// output action rather than naming a physical port.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNo(pub u16);

impl PortNo {
    /// Highest legal physical port number.
    pub const MAX: PortNo = PortNo(0xff00);
    /// Send back out the ingress port.
    pub const IN_PORT: PortNo = PortNo(0xfff8);
    /// Re-submit to the flow tables (packet-out only).
    pub const TABLE: PortNo = PortNo(0xfff9);
    /// Legacy L2 processing; not implemented by this datapath.
    pub const NORMAL: PortNo = PortNo(0xfffa);
    /// All attached ports except ingress and `NO_FLOOD` ports.
    pub const FLOOD: PortNo = PortNo(0xfffb);
    /// All attached ports except ingress.
    pub const ALL: PortNo = PortNo(0xfffc);
    /// Escalate to the controller.
    pub const CONTROLLER: PortNo = PortNo(0xfffd);
    /// The datapath's own virtual interface.
    pub const LOCAL: PortNo = PortNo(0xfffe);
    /// Wildcard / "no port" sentinel.
    pub const NONE: PortNo = PortNo(0xffff);

    /// Whether this is a plain numeric port rather than a reserved value.
    #[must_use]
    pub fn is_physical(self) -> bool {
        self.0 < Self::MAX.0
    }
}

impl From<u16> for PortNo {
    fn from(value: u16) -> Self {
        PortNo(value)
    }
}

impl From<PortNo> for u16 {
    fn from(value: PortNo) -> u16 {
        value.0
    }
}

impl Display for PortNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IN_PORT => write!(f, "IN_PORT"),
            Self::TABLE => write!(f, "TABLE"),
            Self::NORMAL => write!(f, "NORMAL"),
            Self::FLOOD => write!(f, "FLOOD"),
            Self::ALL => write!(f, "ALL"),
            Self::CONTROLLER => write!(f, "CONTROLLER"),
            Self::LOCAL => write!(f, "LOCAL"),
            Self::NONE => write!(f, "NONE"),
            PortNo(n) => write!(f, "{n}"),
        }
    }
}

bitflags::bitflags! {
    /// Administrative port configuration bits (`OFPPC_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortConfig: u32 {
        /// Port is administratively down.
        const PORT_DOWN = 1 << 0;
        /// Disable spanning tree on the port.
        const NO_STP = 1 << 1;
        /// Drop everything received on the port.
        const NO_RECV = 1 << 2;
        /// Drop received spanning-tree frames.
        const NO_RECV_STP = 1 << 3;
        /// Exclude the port from flooding.
        const NO_FLOOD = 1 << 4;
        /// Drop frames output to the port.
        const NO_FWD = 1 << 5;
        /// Do not escalate table misses arriving on the port.
        const NO_PACKET_IN = 1 << 6;
    }

    /// Observed port state bits (`OFPPS_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortState: u32 {
        /// No carrier on the underlying interface.
        const LINK_DOWN = 1 << 0;
    }

    /// Speed and media bits (`OFPPF_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortFeatures: u32 {
        /// 10 Mb half duplex.
        const HD_10MB = 1 << 0;
        /// 10 Mb full duplex.
        const FD_10MB = 1 << 1;
        /// 100 Mb half duplex.
        const HD_100MB = 1 << 2;
        /// 100 Mb full duplex.
        const FD_100MB = 1 << 3;
        /// 1 Gb half duplex.
        const HD_1GB = 1 << 4;
        /// 1 Gb full duplex.
        const FD_1GB = 1 << 5;
        /// 10 Gb full duplex.
        const FD_10GB = 1 << 6;
        /// Copper medium.
        const COPPER = 1 << 7;
        /// Fiber medium.
        const FIBER = 1 << 8;
        /// Auto-negotiation.
        const AUTONEG = 1 << 9;
        /// Pause frames.
        const PAUSE = 1 << 10;
        /// Asymmetric pause.
        const PAUSE_ASYM = 1 << 11;
    }
}

/// The 48-byte `ofp_phy_port` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPort {
    /// Port number within the datapath.
    pub port_no: PortNo,
    /// Hardware address of the underlying interface.
    pub hw_addr: [u8; 6],
    /// Interface name, at most 15 bytes on the wire.
    pub name: String,
    /// Administrative configuration.
    pub config: PortConfig,
    /// Observed state.
    pub state: PortState,
    /// Current speed/media.
    pub curr: PortFeatures,
    /// Advertised speed/media.
    pub advertised: PortFeatures,
    /// Supported speed/media.
    pub supported: PortFeatures,
    /// Peer-advertised speed/media.
    pub peer: PortFeatures,
}

impl PhyPort {
    /// Encoded size of the descriptor.
    pub const SIZE: usize = 48;
    /// Width of the name field, terminating NUL included.
    pub const NAME_LEN: usize = 16;

    /// Append the descriptor to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.port_no.0.to_be_bytes());
        out.extend_from_slice(&self.hw_addr);
        put_name(out, &self.name, Self::NAME_LEN);
        out.extend_from_slice(&self.config.bits().to_be_bytes());
        out.extend_from_slice(&self.state.bits().to_be_bytes());
        out.extend_from_slice(&self.curr.bits().to_be_bytes());
        out.extend_from_slice(&self.advertised.bits().to_be_bytes());
        out.extend_from_slice(&self.supported.bits().to_be_bytes());
        out.extend_from_slice(&self.peer.bits().to_be_bytes());
    }

    /// Decode one descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] when fewer than [`PhyPort::SIZE`] bytes remain.
    pub fn decode(r: &mut Reader<'_>) -> Result<PhyPort, Truncated> {
        let port_no = PortNo(r.take_u16()?);
        let mut hw_addr = [0u8; 6];
        hw_addr.copy_from_slice(r.take(6)?);
        let raw_name = r.take(Self::NAME_LEN)?;
        let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
        Ok(PhyPort {
            port_no,
            hw_addr,
            name,
            config: PortConfig::from_bits_retain(r.take_u32()?),
            state: PortState::from_bits_retain(r.take_u32()?),
            curr: PortFeatures::from_bits_retain(r.take_u32()?),
            advertised: PortFeatures::from_bits_retain(r.take_u32()?),
            supported: PortFeatures::from_bits_retain(r.take_u32()?),
            peer: PortFeatures::from_bits_retain(r.take_u32()?),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_values_match_openflow_1_0() {
        assert_eq!(PortNo::MAX.0, 0xff00);
        assert_eq!(PortNo::IN_PORT.0, 0xfff8);
        assert_eq!(PortNo::TABLE.0, 0xfff9);
        assert_eq!(PortNo::NORMAL.0, 0xfffa);
        assert_eq!(PortNo::FLOOD.0, 0xfffb);
        assert_eq!(PortNo::ALL.0, 0xfffc);
        assert_eq!(PortNo::CONTROLLER.0, 0xfffd);
        assert_eq!(PortNo::LOCAL.0, 0xfffe);
        assert_eq!(PortNo::NONE.0, 0xffff);
    }

    #[test]
    fn phy_port_encode_decode() {
        let port = PhyPort {
            port_no: PortNo(3),
            hw_addr: [2, 0, 0, 0, 0, 7],
            name: "veth3".to_string(),
            config: PortConfig::NO_FLOOD,
            state: PortState::LINK_DOWN,
            curr: PortFeatures::FD_1GB | PortFeatures::COPPER,
            advertised: PortFeatures::empty(),
            supported: PortFeatures::empty(),
            peer: PortFeatures::empty(),
        };
        let mut out = Vec::new();
        port.encode(&mut out);
        assert_eq!(out.len(), PhyPort::SIZE);
        let decoded = PhyPort::decode(&mut Reader::new(&out)).unwrap();
        assert_eq!(decoded, port);
    }
}
