// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Test doubles for the datapath's external collaborators.
//!
//! Everything here is deliberately small: a recording interface, a vector
//! buffer pool, a loopback transport, and a single-table pipeline that is
//! just enough flow machinery to drive the engine end-to-end in tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::chan::{self, GroupId, PeerId, Sender, Transport};
use crate::dp::Datapath;
use crate::frame::{ETH_HEADER_LEN, ETHERTYPE_VLAN, Frame};
use crate::iface::{NetInterface, TransmitError};
use crate::output;
use crate::pipeline::{
    BufferPool, FlowCursor, FlowFilter, FlowPipeline, FlowSnapshot, PipelineFactory, RemovedFlow,
    TableStats,
};
use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use errno::DpErrno;
use openflow::action::Action;
use openflow::flow::{FlowMatch, FlowMod, FlowModCommand, FlowModFlags, FlowRemovedReason, Wildcards};
use openflow::header::Header;
use openflow::port::PortNo;
use openflow::wire::Reader;
use openflow::{MsgType, NO_BUFFER};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// A recording interface.
pub struct FakeIface {
    name: String,
    hw_addr: [u8; 6],
    mtu: usize,
    loopback: bool,
    link_up: AtomicBool,
    promiscuous: AtomicBool,
    sent: Mutex<Vec<Frame>>,
}

impl FakeIface {
    /// An up Ethernet interface with a 1500-byte MTU.
    #[must_use]
    pub fn new(name: &str, hw_addr: [u8; 6]) -> FakeIface {
        FakeIface {
            name: name.to_owned(),
            hw_addr,
            mtu: 1500,
            loopback: false,
            link_up: AtomicBool::new(true),
            promiscuous: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A loopback interface (attachment must refuse it).
    #[must_use]
    pub fn loopback(name: &str) -> FakeIface {
        let mut iface = FakeIface::new(name, [0; 6]);
        iface.loopback = true;
        iface
    }

    /// Same interface with a different MTU.
    #[must_use]
    pub fn with_mtu(mut self, mtu: usize) -> FakeIface {
        self.mtu = mtu;
        self
    }

    /// Flip the carrier.
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Relaxed);
    }

    /// Whether promiscuous mode is currently on.
    #[must_use]
    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::Relaxed)
    }

    /// Frames transmitted so far, draining the record.
    #[must_use]
    pub fn take_transmitted(&self) -> Vec<Frame> {
        std::mem::take(&mut self.sent.lock())
    }

    /// Number of frames transmitted so far.
    #[must_use]
    pub fn transmit_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl NetInterface for FakeIface {
    fn name(&self) -> &str {
        &self.name
    }

    fn hw_addr(&self) -> [u8; 6] {
        self.hw_addr
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    fn is_loopback(&self) -> bool {
        self.loopback
    }

    fn set_promiscuous(&self, on: bool) {
        self.promiscuous.store(on, Ordering::Relaxed);
    }

    fn transmit(&self, frame: Frame) -> Result<(), TransmitError> {
        if !self.link_up() {
            return Err(TransmitError::Down);
        }
        self.sent.lock().push(frame);
        Ok(())
    }
}

/// A vector-backed packet-buffer pool.
pub struct VecBufferPool {
    slots: Mutex<Vec<Option<Frame>>>,
    capacity: u32,
}

impl VecBufferPool {
    /// A pool with `capacity` slots.
    #[must_use]
    pub fn new(capacity: u32) -> VecBufferPool {
        VecBufferPool {
            slots: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// A pool that always declines to buffer.
    #[must_use]
    pub fn disabled() -> VecBufferPool {
        VecBufferPool::new(0)
    }
}

impl BufferPool for VecBufferPool {
    fn stash(&self, frame: &Frame) -> u32 {
        let mut slots = self.slots.lock();
        let free = if slots.len() < self.capacity as usize {
            slots.push(None);
            slots.len() - 1
        } else {
            match slots.iter().position(Option::is_none) {
                Some(free) => free,
                None => return NO_BUFFER,
            }
        };
        slots[free] = Some(frame.clone());
        #[allow(clippy::cast_possible_truncation)] // pool ids are small by construction
        let id = free as u32;
        id
    }

    fn retrieve(&self, id: u32) -> Option<Frame> {
        self.slots.lock().get_mut(id as usize)?.take()
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// A captured transport datagram.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Envelope `dp_idx`.
    pub dp_idx: u32,
    /// Envelope sequence number.
    pub seq: u32,
    /// Decoded OpenFlow header, when the envelope carried a payload.
    pub header: Option<Header>,
    /// OpenFlow body bytes after the header.
    pub body: Vec<u8>,
    /// The whole datagram, for envelope-level assertions.
    pub datagram: Vec<u8>,
}

fn capture(datagram: &[u8]) -> Captured {
    let env = chan::envelope::Envelope::decode(datagram).expect("malformed captured envelope");
    let (header, body) = match env.attr(chan::envelope::ATTR_OPENFLOW) {
        Some(payload) => {
            let mut r = Reader::new(payload);
            let header = Header::decode(&mut r).expect("malformed captured OpenFlow header");
            (Some(header), r.take_rest().to_vec())
        }
        None => (None, Vec::new()),
    };
    Captured {
        dp_idx: env.dp_idx,
        seq: env.seq,
        header,
        body,
        datagram: datagram.to_vec(),
    }
}

/// A transport that records everything sent through it.
#[derive(Default)]
pub struct LoopbackTransport {
    unicasts: Mutex<Vec<(PeerId, Vec<u8>)>>,
    multicasts: Mutex<Vec<(GroupId, Vec<u8>)>>,
}

impl LoopbackTransport {
    /// An empty loopback transport.
    #[must_use]
    pub fn new() -> LoopbackTransport {
        LoopbackTransport::default()
    }

    /// Drain captured unicasts to `peer`.
    #[must_use]
    pub fn take_unicasts(&self, peer: PeerId) -> Vec<Captured> {
        let mut held = self.unicasts.lock();
        let (matching, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *held).into_iter().partition(|(p, _)| *p == peer);
        *held = rest;
        matching.iter().map(|(_, d)| capture(d)).collect()
    }

    /// Drain every captured multicast.
    #[must_use]
    pub fn take_multicasts(&self) -> Vec<(GroupId, Captured)> {
        std::mem::take(&mut *self.multicasts.lock())
            .iter()
            .map(|(g, d)| (*g, capture(d)))
            .collect()
    }

    /// Drain multicasts of one OpenFlow message type.
    #[must_use]
    pub fn take_multicasts_of(&self, msg_type: MsgType) -> Vec<Captured> {
        self.take_multicasts()
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.header.map(|h| h.msg_type) == Some(msg_type as u8))
            .collect()
    }
}

impl Transport for LoopbackTransport {
    fn unicast(&self, peer: PeerId, msg: &[u8]) -> Result<(), DpErrno> {
        self.unicasts.lock().push((peer, msg.to_vec()));
        Ok(())
    }

    fn multicast(&self, group: GroupId, msg: &[u8]) -> Result<(), DpErrno> {
        self.multicasts.lock().push((group, msg.to_vec()));
        Ok(())
    }
}

struct FakeFlow {
    pattern: FlowMatch,
    priority: u16,
    cookie: u64,
    idle_timeout: u16,
    hard_timeout: u16,
    flags: FlowModFlags,
    actions: Vec<Action>,
    installed: Instant,
    last_used: Instant,
    packet_count: u64,
    byte_count: u64,
}

impl FakeFlow {
    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            table_id: 0,
            pattern: self.pattern,
            duration: self.installed.elapsed(),
            priority: self.priority,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            cookie: self.cookie,
            packet_count: self.packet_count,
            byte_count: self.byte_count,
            actions: self.actions.clone(),
        }
    }

    fn removed(&self, reason: FlowRemovedReason) -> RemovedFlow {
        RemovedFlow {
            pattern: self.pattern,
            priority: self.priority,
            cookie: self.cookie,
            reason,
            duration: self.installed.elapsed(),
            idle_timeout: self.idle_timeout,
            packet_count: self.packet_count,
            byte_count: self.byte_count,
            emergency: self.flags.contains(FlowModFlags::EMERG),
            notify: self.flags.contains(FlowModFlags::SEND_FLOW_REM),
        }
    }
}

/// A one-table flow pipeline, wildcard matching included, driving the real
/// forwarding engine and escalation paths.
#[derive(Default)]
pub struct FakePipeline {
    flows: Mutex<Vec<FakeFlow>>,
    lookups: AtomicU64,
    matched: AtomicU64,
}

impl FakePipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> FakePipeline {
        FakePipeline::default()
    }

    /// Install a flow directly, bypassing the flow-mod path.
    pub fn install(
        &self,
        pattern: FlowMatch,
        priority: u16,
        actions: Vec<Action>,
        idle_timeout: u16,
        hard_timeout: u16,
        flags: FlowModFlags,
    ) {
        let now = Instant::now();
        self.flows.lock().push(FakeFlow {
            pattern,
            priority,
            cookie: 0,
            idle_timeout,
            hard_timeout,
            flags,
            actions,
            installed: now,
            last_used: now,
            packet_count: 0,
            byte_count: 0,
        });
    }

    /// Number of installed flows.
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.flows.lock().len()
    }
}

/// Extract the fully-specified match key of a frame.
#[must_use]
#[allow(clippy::missing_panics_doc)] // reads are length-checked
pub fn extract_key(frame: &Frame) -> FlowMatch {
    const VLAN_NONE: u16 = 0xffff;
    let mut key = FlowMatch {
        wildcards: Wildcards(0),
        in_port: frame.in_port().map_or(0, |p| p.0),
        dl_vlan: VLAN_NONE,
        ..FlowMatch::default()
    };
    let data = frame.bytes();
    if data.len() < ETH_HEADER_LEN {
        return key;
    }
    key.dl_dst.copy_from_slice(&data[0..6]);
    key.dl_src.copy_from_slice(&data[6..12]);
    let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
    let mut l3 = ETH_HEADER_LEN;
    if ethertype == ETHERTYPE_VLAN && data.len() >= ETH_HEADER_LEN + 4 {
        let tci = u16::from_be_bytes([data[14], data[15]]);
        key.dl_vlan = tci & 0x0fff;
        key.dl_vlan_pcp = (tci >> 13) as u8;
        ethertype = u16::from_be_bytes([data[16], data[17]]);
        l3 = ETH_HEADER_LEN + 4;
    }
    key.dl_type = ethertype;
    if ethertype == 0x0800 && data.len() >= l3 + 20 {
        let ip = &data[l3..];
        key.nw_tos = ip[1] & 0xfc;
        key.nw_proto = ip[9];
        key.nw_src = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
        key.nw_dst = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);
        let ihl = usize::from(ip[0] & 0x0f) * 4;
        let l4 = l3 + ihl;
        match key.nw_proto {
            // TCP / UDP ports
            6 | 17 if data.len() >= l4 + 4 => {
                key.tp_src = u16::from_be_bytes([data[l4], data[l4 + 1]]);
                key.tp_dst = u16::from_be_bytes([data[l4 + 2], data[l4 + 3]]);
            }
            // ICMP type and code
            1 if data.len() >= l4 + 2 => {
                key.tp_src = u16::from(data[l4]);
                key.tp_dst = u16::from(data[l4 + 1]);
            }
            _ => {}
        }
    }
    key
}

/// Whether `target`'s fields agree with `wild` everywhere `wild` is not
/// wildcarded.
#[must_use]
pub fn covered_by(wild: &FlowMatch, target: &FlowMatch) -> bool {
    let w = wild.wildcards;
    let src_mask = prefix_mask(w.nw_src_bits());
    let dst_mask = prefix_mask(w.nw_dst_bits());
    (w.contains(Wildcards::IN_PORT) || wild.in_port == target.in_port)
        && (w.contains(Wildcards::DL_VLAN) || wild.dl_vlan == target.dl_vlan)
        && (w.contains(Wildcards::DL_VLAN_PCP) || wild.dl_vlan_pcp == target.dl_vlan_pcp)
        && (w.contains(Wildcards::DL_SRC) || wild.dl_src == target.dl_src)
        && (w.contains(Wildcards::DL_DST) || wild.dl_dst == target.dl_dst)
        && (w.contains(Wildcards::DL_TYPE) || wild.dl_type == target.dl_type)
        && (w.contains(Wildcards::NW_PROTO) || wild.nw_proto == target.nw_proto)
        && (w.contains(Wildcards::NW_TOS) || wild.nw_tos == target.nw_tos)
        && (wild.nw_src & src_mask) == (target.nw_src & src_mask)
        && (wild.nw_dst & dst_mask) == (target.nw_dst & dst_mask)
        && (w.contains(Wildcards::TP_SRC) || wild.tp_src == target.tp_src)
        && (w.contains(Wildcards::TP_DST) || wild.tp_dst == target.tp_dst)
}

fn prefix_mask(wildcarded_bits: u32) -> u32 {
    if wildcarded_bits >= 32 {
        0
    } else {
        u32::MAX << wildcarded_bits
    }
}

fn flow_sends_to(actions: &[Action], out_port: PortNo) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, Action::Output { port, .. } if *port == out_port))
}

impl FlowPipeline for FakePipeline {
    fn process_frame(&self, dp: &Arc<Datapath>, frame: Frame) {
        let key = extract_key(&frame);
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let actions = {
            let mut flows = self.flows.lock();
            let best = flows
                .iter_mut()
                .filter(|f| covered_by(&f.pattern, &key))
                .max_by_key(|f| f.priority);
            match best {
                Some(flow) => {
                    flow.packet_count += 1;
                    flow.byte_count += frame.len() as u64;
                    flow.last_used = Instant::now();
                    self.matched.fetch_add(1, Ordering::Relaxed);
                    Some(flow.actions.clone())
                }
                None => None,
            }
        };
        match actions {
            Some(actions) => self.execute_actions(dp, frame, &actions),
            None => chan::escalate_miss(dp, frame),
        }
    }

    fn execute_actions(&self, dp: &Arc<Datapath>, frame: Frame, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Output { port, max_len } if *port == PortNo::CONTROLLER => {
                    chan::output_control(
                        dp,
                        frame.clone(),
                        *max_len,
                        openflow::message::PacketInReason::Action,
                    );
                }
                Action::Output { port, .. } => {
                    if let Err(e) = output::output(dp, frame.clone(), *port, false) {
                        debug!("fake pipeline: output to {port} failed: {e}");
                    }
                }
                Action::Other { .. } => {}
            }
        }
    }

    fn handle_openflow(
        &self,
        dp: &Arc<Datapath>,
        _sender: &Sender,
        header: &Header,
        body: &[u8],
    ) -> Result<(), DpErrno> {
        if header.typ() != Ok(MsgType::FlowMod) {
            return Ok(());
        }
        let fm = FlowMod::decode(body).map_err(|_| DpErrno::Invalid)?;
        match fm.command {
            FlowModCommand::Add => {
                let now = Instant::now();
                self.flows.lock().push(FakeFlow {
                    pattern: fm.pattern,
                    priority: fm.priority,
                    cookie: fm.cookie,
                    idle_timeout: fm.idle_timeout,
                    hard_timeout: fm.hard_timeout,
                    flags: fm.flags,
                    actions: fm.actions,
                    installed: now,
                    last_used: now,
                    packet_count: 0,
                    byte_count: 0,
                });
                Ok(())
            }
            FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                for flow in self
                    .flows
                    .lock()
                    .iter_mut()
                    .filter(|f| f.pattern == fm.pattern)
                {
                    flow.actions.clone_from(&fm.actions);
                }
                Ok(())
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => {
                let strict = fm.command == FlowModCommand::DeleteStrict;
                let removed: Vec<RemovedFlow> = {
                    let mut flows = self.flows.lock();
                    let (dead, kept): (Vec<FakeFlow>, Vec<FakeFlow>) =
                        flows.drain(..).partition(|f| {
                            if strict {
                                f.pattern == fm.pattern && f.priority == fm.priority
                            } else {
                                covered_by(&fm.pattern, &f.pattern)
                            }
                        });
                    *flows = kept;
                    dead.iter()
                        .map(|f| f.removed(FlowRemovedReason::Delete))
                        .collect()
                };
                for flow in &removed {
                    dp.notify_flow_removed(flow);
                }
                Ok(())
            }
        }
    }

    fn expire_flows(&self, _dp: &Arc<Datapath>) -> Vec<RemovedFlow> {
        let now = Instant::now();
        let mut flows = self.flows.lock();
        let (dead, kept): (Vec<FakeFlow>, Vec<FakeFlow>) = flows.drain(..).partition(|f| {
            (f.idle_timeout > 0
                && now.duration_since(f.last_used).as_secs() >= u64::from(f.idle_timeout))
                || (f.hard_timeout > 0
                    && now.duration_since(f.installed).as_secs() >= u64::from(f.hard_timeout))
        });
        *flows = kept;
        dead.iter()
            .map(|f| {
                let reason = if f.hard_timeout > 0
                    && now.duration_since(f.installed).as_secs() >= u64::from(f.hard_timeout)
                {
                    FlowRemovedReason::HardTimeout
                } else {
                    FlowRemovedReason::IdleTimeout
                };
                f.removed(reason)
            })
            .collect()
    }

    fn n_tables(&self) -> usize {
        1
    }

    fn table_stats(&self) -> Vec<TableStats> {
        #[allow(clippy::cast_possible_truncation)] // bounded by max_entries
        let active_count = self.flows.lock().len() as u32;
        vec![TableStats {
            table_id: 0,
            name: "fake".to_owned(),
            wildcards: Wildcards::ALL,
            max_entries: 1024,
            active_count,
            lookup_count: self.lookups.load(Ordering::Relaxed),
            matched_count: self.matched.load(Ordering::Relaxed),
        }]
    }

    fn visit_flows(
        &self,
        filter: &FlowFilter,
        cursor: &mut FlowCursor,
        visit: &mut dyn FnMut(&FlowSnapshot) -> bool,
    ) -> bool {
        use openflow::stats::{TABLE_ALL, TABLE_EMERGENCY};
        if filter.table_id == TABLE_EMERGENCY || (filter.table_id != TABLE_ALL && filter.table_id != 0)
        {
            return true;
        }
        let flows = self.flows.lock();
        while cursor.offset < flows.len() {
            let flow = &flows[cursor.offset];
            let selected = covered_by(&filter.pattern, &flow.pattern)
                && (filter.out_port == PortNo::NONE
                    || flow_sends_to(&flow.actions, filter.out_port));
            if selected && !visit(&flow.snapshot()) {
                return false;
            }
            cursor.offset += 1;
        }
        true
    }
}

/// A factory handing out [`FakePipeline`]s and remembering them by index.
#[derive(Default)]
pub struct FakePipelineFactory {
    created: Mutex<HashMap<u32, Arc<FakePipeline>>>,
    fail_next: AtomicBool,
}

impl FakePipelineFactory {
    /// An empty factory.
    #[must_use]
    pub fn new() -> FakePipelineFactory {
        FakePipelineFactory::default()
    }

    /// Make the next `create` fail, for creation-rollback tests.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    /// The pipeline created for `dp_idx`, if any.
    #[must_use]
    pub fn get(&self, dp_idx: u32) -> Option<Arc<FakePipeline>> {
        self.created.lock().get(&dp_idx).cloned()
    }
}

impl PipelineFactory for FakePipelineFactory {
    fn create(&self, dp_idx: u32) -> Result<Arc<dyn FlowPipeline>, DpErrno> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(DpErrno::NoMemory);
        }
        let pipeline = Arc::new(FakePipeline::new());
        self.created.lock().insert(dp_idx, pipeline.clone());
        Ok(pipeline)
    }
}
