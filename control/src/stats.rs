// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multi-part statistics dumps.
//!
//! Every dump follows the same contract: construct a [`StatsDumper`] from
//! the request body, then call [`StatsDump::next_fragment`] until it stops
//! yielding.  Each fragment re-resolves the datapath by index so a dump
//! survives (by terminating cleanly) when the datapath is destroyed between
//! fragments.  State for per-flow dumps is a `(table, offset)` cursor held
//! across fragments.

use concurrency::sync::Arc;
use dashmap::DashMap;
use datapath::pipeline::{FlowCursor, FlowFilter};
use datapath::{Datapath, DatapathRegistry, Sender};
use errno::DpErrno;
use openflow::action::Action;
use openflow::port::PortNo;
use openflow::stats::{
    AggregateStatsReply, DescStats, FlowStatsRecord, FlowStatsRequest, PortStatsRequest,
    REPLY_MORE, StatsType, TableStatsRecord,
};
use openflow::{MsgBuf, MsgType};
use std::collections::VecDeque;
use tracing::debug;

/// Reply-body budget of one fragment.
///
/// About a page; large dumps stay observably multi-part and no fragment
/// comes near the 16-bit message length limit.
pub const REPLY_BODY_CAP: usize = 4096;

/// Whether a dumper has more fragments to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStatus {
    /// This was the final fragment.
    Done,
    /// Call again for more.
    More,
}

/// One concrete statistics dumper.
///
/// `init` is the constructor from the request body; `done` is `Drop`.
pub trait StatsDumper: Send {
    /// Append up to `cap - body.len()` bytes of reply records.
    ///
    /// # Errors
    ///
    /// `NoBuffers` when a single record cannot fit an empty fragment (the
    /// live-lock guard), or any errno the walk fails with.
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        cap: usize,
    ) -> Result<DumpStatus, DpErrno>;
}

/// DESC: the five description strings, single fragment.
struct DescDumper;

impl StatsDumper for DescDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        _cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        let desc = dp.desc();
        DescStats {
            mfr_desc: desc.mfr_desc.clone(),
            hw_desc: desc.hw_desc.clone(),
            sw_desc: desc.sw_desc.clone(),
            serial_num: desc.serial_num.clone(),
            dp_desc: dp.name().to_owned(),
        }
        .encode(body);
        Ok(DumpStatus::Done)
    }
}

/// FLOW: one record per selected flow, resumable at `(table, offset)`.
struct FlowDumper {
    filter: FlowFilter,
    cursor: FlowCursor,
}

impl FlowDumper {
    fn new(req: &FlowStatsRequest) -> FlowDumper {
        FlowDumper {
            filter: FlowFilter {
                table_id: req.table_id,
                pattern: req.pattern,
                out_port: req.out_port,
            },
            cursor: FlowCursor::default(),
        }
    }
}

impl StatsDumper for FlowDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        let mut wrote = false;
        let exhausted = dp
            .pipeline()
            .visit_flows(&self.filter, &mut self.cursor, &mut |snap| {
                let mut actions = Vec::new();
                Action::encode_list(&snap.actions, &mut actions);
                #[allow(clippy::cast_possible_truncation)] // wire field is 32-bit seconds
                let duration_sec = snap.duration.as_secs() as u32;
                let record = FlowStatsRecord {
                    table_id: snap.table_id,
                    pattern: snap.pattern,
                    duration_sec,
                    duration_nsec: snap.duration.subsec_nanos(),
                    priority: snap.priority,
                    idle_timeout: snap.idle_timeout,
                    hard_timeout: snap.hard_timeout,
                    cookie: snap.cookie,
                    packet_count: snap.packet_count,
                    byte_count: snap.byte_count,
                    actions,
                };
                if body.len() + record.size() > cap {
                    return false;
                }
                record.encode(body);
                wrote = true;
                true
            });
        if exhausted {
            Ok(DumpStatus::Done)
        } else if wrote {
            Ok(DumpStatus::More)
        } else {
            // one flow bigger than an entire fragment; erroring out beats
            // yielding empty fragments forever
            Err(DpErrno::NoBuffers)
        }
    }
}

/// AGGREGATE: the same walk folded into one 24-byte record.
struct AggregateDumper {
    filter: FlowFilter,
}

impl StatsDumper for AggregateDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        _cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        let mut agg = AggregateStatsReply::default();
        let mut cursor = FlowCursor::default();
        dp.pipeline()
            .visit_flows(&self.filter, &mut cursor, &mut |snap| {
                agg.packet_count += snap.packet_count;
                agg.byte_count += snap.byte_count;
                agg.flow_count += 1;
                true
            });
        agg.encode(body);
        Ok(DumpStatus::Done)
    }
}

/// TABLE: one fixed-size record per flow table, resumable by table index.
struct TableDumper {
    next: usize,
}

impl StatsDumper for TableDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        let tables = dp.pipeline().table_stats();
        while self.next < tables.len() {
            if body.len() + TableStatsRecord::SIZE > cap {
                return Ok(DumpStatus::More);
            }
            let t = &tables[self.next];
            TableStatsRecord {
                table_id: t.table_id,
                name: t.name.clone(),
                wildcards: t.wildcards,
                max_entries: t.max_entries,
                active_count: t.active_count,
                lookup_count: t.lookup_count,
                matched_count: t.matched_count,
            }
            .encode(body);
            self.next += 1;
        }
        Ok(DumpStatus::Done)
    }
}

/// PORT: per-port counters; NONE iterates numeric ports then LOCAL.
struct PortDumper {
    pending: VecDeque<PortNo>,
}

impl PortDumper {
    fn new(dp: &Arc<Datapath>, req: &PortStatsRequest) -> PortDumper {
        let mut pending = VecDeque::new();
        if req.port_no == PortNo::NONE {
            for port in dp.ports().physical_ports() {
                pending.push_back(port.port_no());
            }
            pending.push_back(PortNo::LOCAL);
        } else {
            pending.push_back(req.port_no);
        }
        PortDumper { pending }
    }
}

impl StatsDumper for PortDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        while let Some(port_no) = self.pending.front().copied() {
            if body.len() + openflow::stats::PortStatsRecord::SIZE > cap {
                return Ok(DumpStatus::More);
            }
            self.pending.pop_front();
            // a port detached mid-dump is simply skipped
            if let Some(port) = dp.lookup_port(port_no) {
                port.stats_record().encode(body);
            }
        }
        Ok(DumpStatus::Done)
    }
}

/// A vendor-statistics extension.
pub trait VendorStatsHandler: Send + Sync {
    /// Append the vendor reply body (after the vendor id).
    ///
    /// # Errors
    ///
    /// Returns the errno to surface to the requester.
    fn dump(
        &self,
        dp: &Arc<Datapath>,
        request_body: &[u8],
        body: &mut Vec<u8>,
    ) -> Result<(), DpErrno>;
}

/// Registration table for vendor statistics, demultiplexed on the 32-bit
/// vendor id at the head of the request body.
#[derive(Default)]
pub struct VendorStatsRegistry {
    handlers: DashMap<u32, Arc<dyn VendorStatsHandler>>,
}

impl VendorStatsRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> VendorStatsRegistry {
        VendorStatsRegistry::default()
    }

    /// Register (replacing any previous) handler for `vendor_id`.
    pub fn register(&self, vendor_id: u32, handler: Arc<dyn VendorStatsHandler>) {
        self.handlers.insert(vendor_id, handler);
    }

    /// Remove the handler for `vendor_id`.
    pub fn unregister(&self, vendor_id: u32) {
        self.handlers.remove(&vendor_id);
    }

    fn get(&self, vendor_id: u32) -> Option<Arc<dyn VendorStatsHandler>> {
        self.handlers.get(&vendor_id).map(|h| h.value().clone())
    }
}

/// VENDOR: one fragment produced by the registered handler.
struct VendorDumper {
    vendor_id: u32,
    request_body: Vec<u8>,
    handler: Arc<dyn VendorStatsHandler>,
}

impl StatsDumper for VendorDumper {
    fn dump(
        &mut self,
        dp: &Arc<Datapath>,
        body: &mut Vec<u8>,
        _cap: usize,
    ) -> Result<DumpStatus, DpErrno> {
        body.extend_from_slice(&self.vendor_id.to_be_bytes());
        self.handler.dump(dp, &self.request_body, body)?;
        Ok(DumpStatus::Done)
    }
}

/// Ways a stats request fails before any fragment is produced.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Unknown or unsupported statistics type.
    #[error("unsupported statistics type {0}")]
    BadStat(u16),
    /// Unknown vendor id.
    #[error("unknown vendor id {0:#010x}")]
    BadVendor(u32),
    /// Request body shorter than its fixed part.
    #[error("malformed statistics request")]
    BadRequest,
}

/// A dump in progress: the resumption state the dispatcher holds between
/// fragments, keyed by `(stats type, dp_idx, xid)` plus the dumper itself.
pub struct StatsDump {
    dp_idx: u32,
    xid: u32,
    stats_type: u16,
    dumper: Box<dyn StatsDumper>,
    finished: bool,
}

impl StatsDump {
    /// `init`: build the dumper for `stats_type` from the request body.
    ///
    /// # Errors
    ///
    /// Fails with [`StatsError`] on an unknown type, unknown vendor, or a
    /// short body; the caller turns that into the BAD_STAT / BAD_VENDOR
    /// error message.
    pub fn new(
        dp: &Arc<Datapath>,
        vendors: &VendorStatsRegistry,
        xid: u32,
        stats_type: u16,
        request_body: &[u8],
    ) -> Result<StatsDump, StatsError> {
        let dumper: Box<dyn StatsDumper> = match StatsType::try_from(stats_type) {
            Ok(StatsType::Desc) => Box::new(DescDumper),
            Ok(StatsType::Flow) => {
                let req =
                    FlowStatsRequest::decode(request_body).map_err(|_| StatsError::BadRequest)?;
                Box::new(FlowDumper::new(&req))
            }
            Ok(StatsType::Aggregate) => {
                let req =
                    FlowStatsRequest::decode(request_body).map_err(|_| StatsError::BadRequest)?;
                Box::new(AggregateDumper {
                    filter: FlowFilter {
                        table_id: req.table_id,
                        pattern: req.pattern,
                        out_port: req.out_port,
                    },
                })
            }
            Ok(StatsType::Table) => Box::new(TableDumper { next: 0 }),
            Ok(StatsType::Port) => {
                let req =
                    PortStatsRequest::decode(request_body).map_err(|_| StatsError::BadRequest)?;
                Box::new(PortDumper::new(dp, &req))
            }
            Ok(StatsType::Vendor) => {
                if request_body.len() < 4 {
                    return Err(StatsError::BadRequest);
                }
                let vendor_id = u32::from_be_bytes([
                    request_body[0],
                    request_body[1],
                    request_body[2],
                    request_body[3],
                ]);
                let handler = vendors
                    .get(vendor_id)
                    .ok_or(StatsError::BadVendor(vendor_id))?;
                Box::new(VendorDumper {
                    vendor_id,
                    request_body: request_body[4..].to_vec(),
                    handler,
                })
            }
            Ok(StatsType::Queue) | Err(_) => return Err(StatsError::BadStat(stats_type)),
        };
        Ok(StatsDump {
            dp_idx: dp.dp_idx(),
            xid,
            stats_type,
            dumper,
            finished: false,
        })
    }

    /// Produce the next reply fragment, or `None` after the last one.
    ///
    /// # Errors
    ///
    /// `NotFound` when the datapath was destroyed between fragments; any
    /// errno the dumper fails with.
    pub fn next_fragment(
        &mut self,
        registry: &Arc<DatapathRegistry>,
    ) -> Result<Option<MsgBuf>, DpErrno> {
        if self.finished {
            return Ok(None);
        }
        let Some(dp) = registry.get(self.dp_idx) else {
            debug!("dp{} destroyed mid-dump, terminating", self.dp_idx);
            self.finished = true;
            return Err(DpErrno::NotFound);
        };
        let mut body = Vec::with_capacity(REPLY_BODY_CAP);
        let status = self.dumper.dump(&dp, &mut body, REPLY_BODY_CAP)?;
        if status == DumpStatus::Done {
            self.finished = true;
        }
        let mut msg = MsgBuf::new(MsgType::StatsReply, self.xid, 4 + body.len());
        msg.put_u16(self.stats_type);
        msg.put_u16(match status {
            DumpStatus::More => REPLY_MORE,
            DumpStatus::Done => 0,
        });
        msg.put_slice(&body);
        Ok(Some(msg))
    }
}

/// Drive a whole dump, sending each fragment to `sender`.
///
/// # Errors
///
/// Returns the errno the dump failed with; fragments already sent stay
/// sent, the fragment stream just ends early.
pub fn run_dump(
    registry: &Arc<DatapathRegistry>,
    dump: &mut StatsDump,
    sender: &Sender,
) -> Result<(), DpErrno> {
    while let Some(msg) = dump.next_fragment(registry)? {
        let Some(dp) = registry.get(dump.dp_idx) else {
            return Err(DpErrno::NotFound);
        };
        datapath::chan::send_openflow(&dp, Some(sender), msg)?;
    }
    Ok(())
}
