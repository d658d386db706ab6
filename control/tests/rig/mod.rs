// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Shared test rig: a registry, a control service, a loopback transport,
//! and fake interfaces, driven the way the daemon drives the real thing.

#![allow(clippy::unwrap_used, dead_code)]

use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicU32, Ordering};
use ofdp_control::{ControlService, InterfaceProvider};
use datapath::chan::envelope::{
    ATTR_ERRNO, ATTR_OPENFLOW, EnvelopeBuilder, Envelope, OP_OPENFLOW, OP_RESULT,
};
use datapath::chan::PeerId;
use datapath::fakes::{Captured, FakeIface, FakePipelineFactory, LoopbackTransport, VecBufferPool};
use datapath::iface::NetInterface;
use datapath::{DatapathRegistry, SwitchDesc};
use errno::DpErrno;
use openflow::flow::{FlowMatch, FlowModFlags};
use openflow::port::PortNo;
use openflow::{Action, MsgBuf, MsgType, NO_BUFFER};
use parking_lot::Mutex;
use std::collections::HashMap;

/// The test peer every datagram originates from.
pub const PEER: PeerId = PeerId(7);

/// Interface provider backed by registered fakes.
#[derive(Default)]
pub struct FakeProvider {
    ifaces: Mutex<HashMap<String, Arc<FakeIface>>>,
}

impl FakeProvider {
    pub fn add(&self, name: &str, hw_addr: [u8; 6]) -> Arc<FakeIface> {
        let iface = Arc::new(FakeIface::new(name, hw_addr));
        self.ifaces.lock().insert(name.to_owned(), iface.clone());
        iface
    }
}

impl InterfaceProvider for FakeProvider {
    fn open(&self, name: &str) -> Result<Arc<dyn NetInterface>, DpErrno> {
        match self.ifaces.lock().get(name) {
            Some(iface) => Ok(iface.clone()),
            None => Err(DpErrno::NoDevice),
        }
    }
}

pub struct Rig {
    pub transport: Arc<LoopbackTransport>,
    pub registry: Arc<DatapathRegistry>,
    pub factory: Arc<FakePipelineFactory>,
    pub provider: Arc<FakeProvider>,
    pub svc: Arc<ControlService>,
    seq: AtomicU32,
    unicast_log: Mutex<Vec<Captured>>,
}

impl Rig {
    pub fn new() -> Rig {
        let transport = Arc::new(LoopbackTransport::new());
        let factory = Arc::new(FakePipelineFactory::new());
        let registry = DatapathRegistry::new(
            transport.clone(),
            Arc::new(VecBufferPool::new(256)),
            factory.clone(),
            Arc::new(SwitchDesc::default()),
        );
        let provider = Arc::new(FakeProvider::default());
        let svc = ControlService::new(registry.clone(), provider.clone());
        Rig {
            transport,
            registry,
            factory,
            provider,
            svc,
            seq: AtomicU32::new(100),
            unicast_log: Mutex::new(Vec::new()),
        }
    }

    /// A rig with one datapath already created directly on the registry.
    pub fn with_dp(dp_idx: u32) -> Rig {
        let rig = Rig::new();
        rig.registry.create_dp(Some(dp_idx), None).unwrap();
        rig.drain();
        rig
    }

    /// Submit a privileged administrative datagram.
    pub fn admin(&self, datagram: Vec<u8>) {
        self.svc.handle_datagram(PEER, true, &datagram);
    }

    /// Wrap a finished OpenFlow message for `dp_idx` and submit it.
    pub fn raw_openflow(&self, dp_idx: u32, seq: u32, of_msg: &[u8]) {
        let datagram = EnvelopeBuilder::new(OP_OPENFLOW, seq, dp_idx)
            .attr(ATTR_OPENFLOW, of_msg)
            .finish();
        self.svc.handle_datagram(PEER, true, &datagram);
    }

    /// Finish and submit an OpenFlow message with a fresh sequence number.
    pub fn openflow(&self, dp_idx: u32, msg: MsgBuf) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.raw_openflow(dp_idx, seq, &msg.finish().unwrap());
    }

    /// Attach a fresh fake interface to datapath 0 directly.
    pub fn attach(&self, name: &str, hw_addr: [u8; 6]) -> Arc<FakeIface> {
        let iface = self.provider.add(name, hw_addr);
        let dp = self.registry.get(0).unwrap();
        self.registry.attach_port(&dp, iface.clone()).unwrap();
        iface
    }

    /// Install a flow through the FLOW_MOD path.
    pub fn install_flow(
        &self,
        dp_idx: u32,
        pattern: FlowMatch,
        actions: Vec<Action>,
        idle_timeout: u16,
        hard_timeout: u16,
        flags: FlowModFlags,
    ) {
        let mut fm = MsgBuf::new(MsgType::FlowMod, 0xf10f, 72);
        pattern.encode(fm.body_mut());
        fm.put_u64(0); // cookie
        fm.put_u16(0); // OFPFC_ADD
        fm.put_u16(idle_timeout);
        fm.put_u16(hard_timeout);
        fm.put_u16(0x8000);
        fm.put_u32(NO_BUFFER);
        fm.put_u16(PortNo::NONE.0);
        fm.put_u16(flags.bits());
        Action::encode_list(&actions, fm.body_mut());
        self.openflow(dp_idx, fm);
    }

    /// Receive a frame on a numeric port of `dp_idx`.
    pub fn inject(&self, dp_idx: u32, port_no: u16, data: Vec<u8>) {
        let dp = self.registry.get(dp_idx).unwrap();
        let port = dp.lookup_port(PortNo(port_no)).unwrap();
        dp.ingress(&port, data);
    }

    fn pump(&self) {
        self.unicast_log
            .lock()
            .extend(self.transport.take_unicasts(PEER));
    }

    /// Drain and return every unicast seen so far.
    pub fn take_unicasts(&self) -> Vec<Captured> {
        self.pump();
        std::mem::take(&mut *self.unicast_log.lock())
    }

    /// The first unicast carrying an OpenFlow message of `msg_type`.
    pub fn unicast_of(&self, msg_type: MsgType) -> Captured {
        self.pump();
        self.unicast_log
            .lock()
            .iter()
            .find(|c| c.header.map(|h| h.msg_type) == Some(msg_type as u8))
            .cloned()
            .unwrap_or_else(|| panic!("no {msg_type:?} unicast captured"))
    }

    /// The errno acknowledged for request `seq`.
    pub fn ack_errno(&self, seq: u32) -> i32 {
        self.pump();
        let log = self.unicast_log.lock();
        let ack = log
            .iter()
            .find(|c| {
                c.seq == seq
                    && Envelope::decode(&c.datagram).map(|e| e.op) == Ok(OP_RESULT)
            })
            .unwrap_or_else(|| panic!("no RESULT ack for seq {seq}"));
        #[allow(clippy::cast_possible_wrap)] // two's complement on the wire
        let errno = Envelope::decode(&ack.datagram)
            .unwrap()
            .attr_u32(ATTR_ERRNO)
            .unwrap() as i32;
        errno
    }

    /// Drop everything captured so far, unicast and multicast.
    pub fn drain(&self) {
        let _ = self.take_unicasts();
        let _ = self.transport.take_multicasts();
    }

    /// Drain multicasts of one OpenFlow message type.
    pub fn take_multicasts_of(&self, msg_type: MsgType) -> Vec<Captured> {
        self.transport.take_multicasts_of(msg_type)
    }
}

/// A minimal Ethernet/IPv4/UDP frame of `len` bytes.
pub fn ipv4_frame(len: usize) -> Vec<u8> {
    assert!(len >= 42);
    let mut f = vec![0u8; len];
    f[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]); // dst
    f[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]); // src
    f[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    f[14] = 0x45; // version + ihl
    #[allow(clippy::cast_possible_truncation)]
    let total = (len - 14) as u16;
    f[16..18].copy_from_slice(&total.to_be_bytes());
    f[22] = 64; // ttl
    f[23] = 17; // udp
    f[26..30].copy_from_slice(&[10, 0, 0, 1]);
    f[30..34].copy_from_slice(&[10, 0, 0, 2]);
    f[34..36].copy_from_slice(&4000u16.to_be_bytes());
    f[36..38].copy_from_slice(&4001u16.to_be_bytes());
    f
}
