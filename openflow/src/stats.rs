// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Statistics request bodies and reply records.
//!
//! Replies are multi-part: each fragment repeats the 4-byte stats header
//! (type + flags) and the last one clears [`REPLY_MORE`].

use crate::flow::FlowMatch;
use crate::port::PortNo;
use crate::wire::{Reader, Truncated, put_name};

/// Reply flag: more fragments follow.
pub const REPLY_MORE: u16 = 1 << 0;

/// Width of the description strings in a DESC reply.
pub const DESC_STR_LEN: usize = 256;
/// Width of the serial-number string in a DESC reply.
pub const SERIAL_NUM_LEN: usize = 32;
/// Width of a table name in a TABLE reply.
pub const TABLE_NAME_LEN: usize = 32;

/// Table-id selector: every table.
pub const TABLE_ALL: u8 = 0xff;
/// Table-id selector: the emergency table.
pub const TABLE_EMERGENCY: u8 = 0xfe;

/// `OFPST_*` statistics types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatsType {
    /// Switch description strings.
    Desc = 0,
    /// Per-flow statistics.
    Flow = 1,
    /// Aggregated flow statistics.
    Aggregate = 2,
    /// Per-table statistics.
    Table = 3,
    /// Per-port counters.
    Port = 4,
    /// Per-queue counters; not implemented by this datapath.
    Queue = 5,
    /// Vendor extension, demultiplexed on a 32-bit vendor id.
    Vendor = 0xffff,
}

/// Error for a stats type word this datapath does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown statistics type {0}")]
pub struct UnknownStatsType(pub u16);

impl TryFrom<u16> for StatsType {
    type Error = UnknownStatsType;

    fn try_from(value: u16) -> Result<Self, UnknownStatsType> {
        Ok(match value {
            0 => StatsType::Desc,
            1 => StatsType::Flow,
            2 => StatsType::Aggregate,
            3 => StatsType::Table,
            4 => StatsType::Port,
            5 => StatsType::Queue,
            0xffff => StatsType::Vendor,
            other => return Err(UnknownStatsType(other)),
        })
    }
}

/// The switch description strings of a DESC reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescStats {
    /// Manufacturer description.
    pub mfr_desc: String,
    /// Hardware description.
    pub hw_desc: String,
    /// Software description.
    pub sw_desc: String,
    /// Serial number.
    pub serial_num: String,
    /// Human-readable datapath description.
    pub dp_desc: String,
}

impl DescStats {
    /// Encoded size of a DESC reply body.
    pub const SIZE: usize = 4 * DESC_STR_LEN + SERIAL_NUM_LEN;

    /// Append the reply body to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_name(out, &self.mfr_desc, DESC_STR_LEN);
        put_name(out, &self.hw_desc, DESC_STR_LEN);
        put_name(out, &self.sw_desc, DESC_STR_LEN);
        put_name(out, &self.serial_num, SERIAL_NUM_LEN);
        put_name(out, &self.dp_desc, DESC_STR_LEN);
    }
}

/// Request body shared by FLOW and AGGREGATE statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowStatsRequest {
    /// Flows to report.
    pub pattern: FlowMatch,
    /// Table selector, [`TABLE_ALL`] or [`TABLE_EMERGENCY`] included.
    pub table_id: u8,
    /// Only report flows forwarding to this port; [`PortNo::NONE`] disables.
    pub out_port: PortNo,
}

impl FlowStatsRequest {
    /// Decode a FLOW/AGGREGATE request body.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] on fewer than 44 bytes.
    pub fn decode(body: &[u8]) -> Result<FlowStatsRequest, Truncated> {
        let mut r = Reader::new(body);
        let pattern = FlowMatch::decode(&mut r)?;
        let table_id = r.take_u8()?;
        r.skip(1)?;
        let out_port = PortNo(r.take_u16()?);
        Ok(FlowStatsRequest {
            pattern,
            table_id,
            out_port,
        })
    }
}

/// One `ofp_flow_stats` reply record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatsRecord {
    /// Table holding the flow.
    pub table_id: u8,
    /// The flow's match.
    pub pattern: FlowMatch,
    /// Seconds the flow has been installed.
    pub duration_sec: u32,
    /// Nanoseconds beyond `duration_sec`.
    pub duration_nsec: u32,
    /// Flow priority.
    pub priority: u16,
    /// Idle timeout in seconds.
    pub idle_timeout: u16,
    /// Hard timeout in seconds.
    pub hard_timeout: u16,
    /// Controller cookie.
    pub cookie: u64,
    /// Packets matched.
    pub packet_count: u64,
    /// Bytes matched.
    pub byte_count: u64,
    /// Encoded action list.
    pub actions: Vec<u8>,
}

impl FlowStatsRecord {
    /// Size of the record without its action list.
    pub const FIXED_SIZE: usize = 88;

    /// Encoded size of this record.
    #[must_use]
    pub fn size(&self) -> usize {
        Self::FIXED_SIZE + self.actions.len()
    }

    /// Append the record, length field included, to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        #[allow(clippy::cast_possible_truncation)] // record size bounded by the action list cap
        out.extend_from_slice(&(self.size() as u16).to_be_bytes());
        out.push(self.table_id);
        out.push(0);
        self.pattern.encode(out);
        out.extend_from_slice(&self.duration_sec.to_be_bytes());
        out.extend_from_slice(&self.duration_nsec.to_be_bytes());
        out.extend_from_slice(&self.priority.to_be_bytes());
        out.extend_from_slice(&self.idle_timeout.to_be_bytes());
        out.extend_from_slice(&self.hard_timeout.to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.byte_count.to_be_bytes());
        out.extend_from_slice(&self.actions);
    }
}

/// The 24-byte AGGREGATE reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateStatsReply {
    /// Packets matched by the selected flows.
    pub packet_count: u64,
    /// Bytes matched by the selected flows.
    pub byte_count: u64,
    /// Number of selected flows.
    pub flow_count: u32,
}

impl AggregateStatsReply {
    /// Append the reply body to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.byte_count.to_be_bytes());
        out.extend_from_slice(&self.flow_count.to_be_bytes());
        out.extend_from_slice(&[0; 4]);
    }
}

/// One 64-byte `ofp_table_stats` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatsRecord {
    /// Table id.
    pub table_id: u8,
    /// Table name.
    pub name: String,
    /// Wildcards the table supports.
    pub wildcards: u32,
    /// Capacity of the table.
    pub max_entries: u32,
    /// Flows currently installed.
    pub active_count: u32,
    /// Packets looked up in the table.
    pub lookup_count: u64,
    /// Packets that hit a flow.
    pub matched_count: u64,
}

impl TableStatsRecord {
    /// Encoded size of the record.
    pub const SIZE: usize = 64;

    /// Append the record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.table_id);
        out.extend_from_slice(&[0; 3]);
        put_name(out, &self.name, TABLE_NAME_LEN);
        out.extend_from_slice(&self.wildcards.to_be_bytes());
        out.extend_from_slice(&self.max_entries.to_be_bytes());
        out.extend_from_slice(&self.active_count.to_be_bytes());
        out.extend_from_slice(&self.lookup_count.to_be_bytes());
        out.extend_from_slice(&self.matched_count.to_be_bytes());
    }
}

/// The 8-byte PORT request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatsRequest {
    /// Port to report, or [`PortNo::NONE`] for every port.
    pub port_no: PortNo,
}

impl PortStatsRequest {
    /// Decode a PORT request body.
    ///
    /// # Errors
    ///
    /// Fails with [`Truncated`] on fewer than eight bytes.
    pub fn decode(body: &[u8]) -> Result<PortStatsRequest, Truncated> {
        let mut r = Reader::new(body);
        let port_no = PortNo(r.take_u16()?);
        r.skip(6)?;
        Ok(PortStatsRequest { port_no })
    }
}

/// One 104-byte `ofp_port_stats` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStatsRecord {
    /// Port the counters belong to.
    pub port_no: u16,
    /// Packets received.
    pub rx_packets: u64,
    /// Packets transmitted.
    pub tx_packets: u64,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Receive drops.
    pub rx_dropped: u64,
    /// Transmit drops.
    pub tx_dropped: u64,
    /// Receive errors.
    pub rx_errors: u64,
    /// Transmit errors.
    pub tx_errors: u64,
    /// Framing errors.
    pub rx_frame_err: u64,
    /// Receive overruns.
    pub rx_over_err: u64,
    /// CRC errors.
    pub rx_crc_err: u64,
    /// Collisions.
    pub collisions: u64,
}

impl PortStatsRecord {
    /// Encoded size of the record.
    pub const SIZE: usize = 104;

    /// Append the record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.port_no.to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        for counter in [
            self.rx_packets,
            self.tx_packets,
            self.rx_bytes,
            self.tx_bytes,
            self.rx_dropped,
            self.tx_dropped,
            self.rx_errors,
            self.tx_errors,
            self.rx_frame_err,
            self.rx_over_err,
            self.rx_crc_err,
            self.collisions,
        ] {
            out.extend_from_slice(&counter.to_be_bytes());
        }
    }
}
