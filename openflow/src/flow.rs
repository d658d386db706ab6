// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The 12-tuple flow match and the flow-table messages built around it.

use crate::action::{Action, ActionDecodeError};
use crate::port::PortNo;
use crate::wire::{Reader, Truncated};

/// The `OFPFW_*` wildcard word.
///
/// Single-bit flags select whole fields; the source and destination network
/// prefixes are 6-bit counts of wildcarded low-order address bits, so this
/// is a plain `u32` wrapper with accessors rather than a bitflags type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Wildcards(pub u32);

impl Wildcards {
    /// Ignore the ingress port.
    pub const IN_PORT: u32 = 1 << 0;
    /// Ignore the VLAN id.
    pub const DL_VLAN: u32 = 1 << 1;
    /// Ignore the source MAC.
    pub const DL_SRC: u32 = 1 << 2;
    /// Ignore the destination MAC.
    pub const DL_DST: u32 = 1 << 3;
    /// Ignore the ethertype.
    pub const DL_TYPE: u32 = 1 << 4;
    /// Ignore the IP protocol.
    pub const NW_PROTO: u32 = 1 << 5;
    /// Ignore the transport source port.
    pub const TP_SRC: u32 = 1 << 6;
    /// Ignore the transport destination port.
    pub const TP_DST: u32 = 1 << 7;
    /// Shift of the source-prefix wildcard count.
    pub const NW_SRC_SHIFT: u32 = 8;
    /// Mask of the source-prefix wildcard count.
    pub const NW_SRC_MASK: u32 = 0x3f << Self::NW_SRC_SHIFT;
    /// Source address entirely wildcarded.
    pub const NW_SRC_ALL: u32 = 32 << Self::NW_SRC_SHIFT;
    /// Shift of the destination-prefix wildcard count.
    pub const NW_DST_SHIFT: u32 = 14;
    /// Mask of the destination-prefix wildcard count.
    pub const NW_DST_MASK: u32 = 0x3f << Self::NW_DST_SHIFT;
    /// Destination address entirely wildcarded.
    pub const NW_DST_ALL: u32 = 32 << Self::NW_DST_SHIFT;
    /// Ignore the VLAN priority.
    pub const DL_VLAN_PCP: u32 = 1 << 20;
    /// Ignore the IP TOS bits.
    pub const NW_TOS: u32 = 1 << 21;
    /// Every field wildcarded.
    pub const ALL: u32 = (1 << 22) - 1;

    /// A fully wildcarded word.
    #[must_use]
    pub fn all() -> Wildcards {
        Wildcards(Self::ALL)
    }

    /// Whether the single-bit flag `bit` is set.
    #[must_use]
    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// Number of wildcarded low-order bits of the source address, capped at 32.
    #[must_use]
    pub fn nw_src_bits(self) -> u32 {
        ((self.0 & Self::NW_SRC_MASK) >> Self::NW_SRC_SHIFT).min(32)
    }

    /// Number of wildcarded low-order bits of the destination address, capped at 32.
    #[must_use]
    pub fn nw_dst_bits(self) -> u32 {
        ((self.0 & Self::NW_DST_MASK) >> Self::NW_DST_SHIFT).min(32)
    }
}

/// The 40-byte `ofp_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowMatch {
    /// Wildcarded fields.
    pub wildcards: Wildcards,
    /// Ingress port.
    pub in_port: u16,
    /// Source MAC.
    pub dl_src: [u8; 6],
    /// Destination MAC.
    pub dl_dst: [u8; 6],
    /// VLAN id, `0xffff` for untagged.
    pub dl_vlan: u16,
    /// VLAN priority.
    pub dl_vlan_pcp: u8,
    /// Ethertype.
    pub dl_type: u16,
    /// IP TOS (DSCP, left-aligned).
    pub nw_tos: u8,
    /// IP protocol / ARP opcode.
    pub nw_proto: u8,
    /// Source IPv4 address.
    pub nw_src: u32,
    /// Destination IPv4 address.
    pub nw_dst: u32,
    /// Transport source port / ICMP type.
    pub tp_src: u16,
    /// Transport destination port / ICMP code.
    pub tp_dst: u16,
}

impl FlowMatch {
    /// Encoded size of a match.
    pub const SIZE: usize = 40;

    /// Append the match to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.wildcards.0.to_be_bytes());
        out.extend_from_slice(&self.in_port.to_be_bytes());
        out.extend_from_slice(&self.dl_src);
        out.extend_from_slice(&self.dl_dst);
        out.extend_from_slice(&self.dl_vlan.to_be_bytes());
        out.push(self.dl_vlan_pcp);
        out.push(0);
        out.extend_from_slice(&self.dl_type.to_be_bytes());
        out.push(self.nw_tos);
        out.push(self.nw_proto);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.nw_src.to_be_bytes());
        out.extend_from_slice(&self.nw_dst.to_be_bytes());
        out.extend_from_slice(&self.tp_src.to_be_bytes());
        out.extend_from_slice(&self.tp_dst.to_be_bytes());
    }

    /// Decode one match.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] when fewer than [`FlowMatch::SIZE`] bytes remain.
    pub fn decode(r: &mut Reader<'_>) -> Result<FlowMatch, Truncated> {
        let wildcards = Wildcards(r.take_u32()?);
        let in_port = r.take_u16()?;
        let mut dl_src = [0u8; 6];
        dl_src.copy_from_slice(r.take(6)?);
        let mut dl_dst = [0u8; 6];
        dl_dst.copy_from_slice(r.take(6)?);
        let dl_vlan = r.take_u16()?;
        let dl_vlan_pcp = r.take_u8()?;
        r.skip(1)?;
        let dl_type = r.take_u16()?;
        let nw_tos = r.take_u8()?;
        let nw_proto = r.take_u8()?;
        r.skip(2)?;
        Ok(FlowMatch {
            wildcards,
            in_port,
            dl_src,
            dl_dst,
            dl_vlan,
            dl_vlan_pcp,
            dl_type,
            nw_tos,
            nw_proto,
            nw_src: r.take_u32()?,
            nw_dst: r.take_u32()?,
            tp_src: r.take_u16()?,
            tp_dst: r.take_u16()?,
        })
    }
}

/// `OFPFC_*` flow-mod commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowModCommand {
    /// Install a new flow.
    Add = 0,
    /// Modify matching flows.
    Modify = 1,
    /// Modify strictly matching flows.
    ModifyStrict = 2,
    /// Delete matching flows.
    Delete = 3,
    /// Delete strictly matching flows.
    DeleteStrict = 4,
}

/// Error for a command word outside the `OFPFC_*` space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown flow-mod command {0}")]
pub struct UnknownFlowModCommand(pub u16);

impl TryFrom<u16> for FlowModCommand {
    type Error = UnknownFlowModCommand;

    fn try_from(value: u16) -> Result<Self, UnknownFlowModCommand> {
        Ok(match value {
            0 => FlowModCommand::Add,
            1 => FlowModCommand::Modify,
            2 => FlowModCommand::ModifyStrict,
            3 => FlowModCommand::Delete,
            4 => FlowModCommand::DeleteStrict,
            other => return Err(UnknownFlowModCommand(other)),
        })
    }
}

bitflags::bitflags! {
    /// `OFPFF_*` flow-mod flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowModFlags: u16 {
        /// Emit a flow-removed message when the flow dies.
        const SEND_FLOW_REM = 1 << 0;
        /// Refuse to install over an overlapping flow.
        const CHECK_OVERLAP = 1 << 1;
        /// Install into the emergency table.
        const EMERG = 1 << 2;
    }
}

/// Reasons carried by a flow-removed message (`OFPRR_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowRemovedReason {
    /// No traffic for `idle_timeout` seconds.
    IdleTimeout = 0,
    /// Flow outlived `hard_timeout`.
    HardTimeout = 1,
    /// Deleted by a flow-mod.
    Delete = 2,
}

/// Errors decoding a flow-mod.
#[derive(Debug, thiserror::Error)]
pub enum FlowModDecodeError {
    /// Body shorter than the fixed part.
    #[error(transparent)]
    Truncated(#[from] Truncated),
    /// Command word out of range.
    #[error(transparent)]
    BadCommand(#[from] UnknownFlowModCommand),
    /// Malformed action list.
    #[error(transparent)]
    BadActions(#[from] ActionDecodeError),
}

/// A decoded `ofp_flow_mod` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    /// Fields to match.
    pub pattern: FlowMatch,
    /// Opaque controller cookie.
    pub cookie: u64,
    /// What to do.
    pub command: FlowModCommand,
    /// Idle timeout in seconds, 0 for none.
    pub idle_timeout: u16,
    /// Hard timeout in seconds, 0 for none.
    pub hard_timeout: u16,
    /// Match priority for overlapping wildcards.
    pub priority: u16,
    /// Buffered packet to run through the new flow, or `NO_BUFFER`.
    pub buffer_id: u32,
    /// Output-port filter for delete commands.
    pub out_port: PortNo,
    /// Flow-mod flags.
    pub flags: FlowModFlags,
    /// Actions to apply to matching packets.
    pub actions: Vec<Action>,
}

impl FlowMod {
    /// Decode a flow-mod body (the OpenFlow header already consumed).
    ///
    /// # Errors
    ///
    /// Fails when the fixed part is short, the command is unknown, or the
    /// action list is malformed.
    pub fn decode(body: &[u8]) -> Result<FlowMod, FlowModDecodeError> {
        let mut r = Reader::new(body);
        let pattern = FlowMatch::decode(&mut r)?;
        let cookie = r.take_u64()?;
        let command = FlowModCommand::try_from(r.take_u16()?)?;
        let idle_timeout = r.take_u16()?;
        let hard_timeout = r.take_u16()?;
        let priority = r.take_u16()?;
        let buffer_id = r.take_u32()?;
        let out_port = PortNo(r.take_u16()?);
        let flags = FlowModFlags::from_bits_retain(r.take_u16()?);
        let actions = Action::decode_list(r.take_rest())?;
        Ok(FlowMod {
            pattern,
            cookie,
            command,
            idle_timeout,
            hard_timeout,
            priority,
            buffer_id,
            out_port,
            flags,
            actions,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn match_encode_decode() {
        let m = FlowMatch {
            wildcards: Wildcards(Wildcards::ALL & !Wildcards::DL_TYPE),
            dl_type: 0x0800,
            nw_src: 0x0a00_0001,
            ..FlowMatch::default()
        };
        let mut out = Vec::new();
        m.encode(&mut out);
        assert_eq!(out.len(), FlowMatch::SIZE);
        let decoded = FlowMatch::decode(&mut Reader::new(&out)).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn prefix_wildcard_counts_are_capped() {
        let w = Wildcards(0x3f << Wildcards::NW_SRC_SHIFT);
        assert_eq!(w.nw_src_bits(), 32);
        let w = Wildcards(8 << Wildcards::NW_DST_SHIFT);
        assert_eq!(w.nw_dst_bits(), 8);
    }

    #[test]
    fn decode_arbitrary_bytes_never_panics() {
        bolero::check!().with_type().for_each(|bytes: &Vec<u8>| {
            let _ = FlowMod::decode(bytes);
        });
    }

    #[test]
    fn flow_mod_decode() {
        let mut body = Vec::new();
        FlowMatch {
            wildcards: Wildcards::all(),
            ..FlowMatch::default()
        }
        .encode(&mut body);
        body.extend_from_slice(&0u64.to_be_bytes()); // cookie
        body.extend_from_slice(&0u16.to_be_bytes()); // ADD
        body.extend_from_slice(&10u16.to_be_bytes()); // idle
        body.extend_from_slice(&0u16.to_be_bytes()); // hard
        body.extend_from_slice(&0x8000u16.to_be_bytes()); // priority
        body.extend_from_slice(&u32::MAX.to_be_bytes()); // buffer
        body.extend_from_slice(&PortNo::NONE.0.to_be_bytes());
        body.extend_from_slice(&FlowModFlags::SEND_FLOW_REM.bits().to_be_bytes());
        // one output action
        body.extend_from_slice(&[0, 0, 0, 8]);
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());

        let fm = FlowMod::decode(&body).unwrap();
        assert_eq!(fm.command, FlowModCommand::Add);
        assert_eq!(fm.idle_timeout, 10);
        assert!(fm.flags.contains(FlowModFlags::SEND_FLOW_REM));
        assert_eq!(fm.actions.len(), 1);
    }
}
