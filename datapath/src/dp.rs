// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The datapath instance.

use crate::chan::{self, ControlChan, GroupId, Transport};
use crate::iface::{NetInterface, VirtualInterface};
use crate::pipeline::{BufferPool, FlowPipeline, RemovedFlow};
use crate::port::{Port, PortTable};
use crate::worker::MaintenanceWorker;
use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicU16, Ordering};
use openflow::DEFAULT_MISS_SEND_LEN;
use openflow::message::PortMod;
use openflow::port::PortNo;
use parking_lot::Mutex;
use tracing::debug;

/// The four read-only description strings reported in DESC statistics.
#[derive(Debug, Clone)]
pub struct SwitchDesc {
    /// Manufacturer description.
    pub mfr_desc: String,
    /// Hardware description.
    pub hw_desc: String,
    /// Software description.
    pub sw_desc: String,
    /// Serial number.
    pub serial_num: String,
}

impl Default for SwitchDesc {
    fn default() -> Self {
        SwitchDesc {
            mfr_desc: "Open Network Fabric".to_owned(),
            hw_desc: "software datapath".to_owned(),
            sw_desc: env!("CARGO_PKG_VERSION").to_owned(),
            serial_num: "None".to_owned(),
        }
    }
}

/// One switch instance: ports, pipeline, local interface, worker.
///
/// Created and destroyed only through [`crate::registry::DatapathRegistry`],
/// which publishes it under its `dp_idx` slot.
#[derive(Debug)]
pub struct Datapath {
    dp_idx: u32,
    name: String,
    local_iface: Arc<VirtualInterface>,
    local_port: Arc<Port>,
    ports: PortTable,
    pipeline: Arc<dyn FlowPipeline>,
    pool: Arc<dyn BufferPool>,
    chan: ControlChan,
    desc: Arc<SwitchDesc>,
    // switch-config state (fragment flags + miss_send_len)
    config_flags: AtomicU16,
    miss_send_len: AtomicU16,
    worker: Mutex<Option<MaintenanceWorker>>,
}

impl std::fmt::Debug for dyn FlowPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FlowPipeline({} tables)", self.n_tables())
    }
}

impl std::fmt::Debug for dyn BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferPool({} slots)", self.capacity())
    }
}

impl Datapath {
    pub(crate) fn new(
        dp_idx: u32,
        name: String,
        pipeline: Arc<dyn FlowPipeline>,
        pool: Arc<dyn BufferPool>,
        transport: Arc<dyn Transport>,
        desc: Arc<SwitchDesc>,
    ) -> Arc<Datapath> {
        let local_iface = Arc::new(VirtualInterface::new(&name, dp_idx));
        let local_port = Arc::new(Port::new(PortNo::LOCAL, local_iface.clone()));
        Arc::new(Datapath {
            dp_idx,
            name,
            local_iface,
            local_port,
            ports: PortTable::new(),
            pipeline,
            pool,
            chan: ControlChan::new(transport, dp_idx),
            desc,
            config_flags: AtomicU16::new(0),
            miss_send_len: AtomicU16::new(DEFAULT_MISS_SEND_LEN),
            worker: Mutex::new(None),
        })
    }

    /// The datapath's registry index.
    #[must_use]
    pub fn dp_idx(&self) -> u32 {
        self.dp_idx
    }

    /// The datapath's name (also its description on the wire).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The 48-bit datapath id, read from the local interface's MAC.
    #[must_use]
    pub fn id(&self) -> u64 {
        let mac = self.local_iface.hw_addr();
        u64::from_be_bytes([0, 0, mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]])
    }

    /// The virtual interface backing the local port.
    #[must_use]
    pub fn local_iface(&self) -> &Arc<VirtualInterface> {
        &self.local_iface
    }

    /// The local port.
    #[must_use]
    pub fn local_port(&self) -> &Arc<Port> {
        &self.local_port
    }

    /// The numeric port table.
    #[must_use]
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// The flow pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<dyn FlowPipeline> {
        &self.pipeline
    }

    /// The packet-buffer pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    /// The control-channel send side.
    #[must_use]
    pub fn chan(&self) -> &ControlChan {
        &self.chan
    }

    /// The notification group this datapath announces on.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.chan.group()
    }

    /// The description strings.
    #[must_use]
    pub fn desc(&self) -> &SwitchDesc {
        &self.desc
    }

    /// Current fragment-handling flags.
    #[must_use]
    pub fn config_flags(&self) -> u16 {
        self.config_flags.load(Ordering::Relaxed)
    }

    /// Current miss escalation budget in bytes.
    #[must_use]
    pub fn miss_send_len(&self) -> u16 {
        self.miss_send_len.load(Ordering::Relaxed)
    }

    /// Apply a SET_CONFIG request.
    pub fn set_config(&self, flags: u16, miss_send_len: u16) {
        self.config_flags.store(flags, Ordering::Relaxed);
        self.miss_send_len.store(miss_send_len, Ordering::Relaxed);
    }

    /// Look a port up by number; [`PortNo::LOCAL`] names the local port.
    #[must_use]
    pub fn lookup_port(&self, port_no: PortNo) -> Option<Arc<Port>> {
        if port_no == PortNo::LOCAL {
            Some(self.local_port.clone())
        } else {
            self.ports.get(port_no)
        }
    }

    /// Apply a port-mod.
    ///
    /// `Ok(true)` means the update was applied (report MODIFY); `Ok(false)`
    /// means the request carried a stale hardware address and was skipped
    /// without error, guarding against races with interface replacement.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown port.
    pub fn apply_port_mod(&self, pm: &PortMod) -> Result<bool, errno::DpErrno> {
        let Some(port) = self.lookup_port(pm.port_no) else {
            return Err(errno::DpErrno::NotFound);
        };
        if port.iface().hw_addr() != pm.hw_addr {
            debug!(
                "dp{}: stale hw addr in port-mod for port {}, ignoring",
                self.dp_idx, pm.port_no
            );
            return Ok(false);
        }
        port.update_config(pm.mask, pm.config);
        Ok(true)
    }

    /// Report a removed flow, unless it was an emergency flow or asked not
    /// to be reported.
    pub fn notify_flow_removed(&self, removed: &RemovedFlow) {
        if removed.emergency || !removed.notify {
            return;
        }
        chan::send_flow_removed(self, removed);
    }

    pub(crate) fn adopt_first_port_addr(&self, addr: [u8; 6]) {
        self.local_iface.set_hw_addr(addr);
    }

    pub(crate) fn set_worker(&self, worker: MaintenanceWorker) {
        *self.worker.lock() = Some(worker);
    }

    pub(crate) fn take_worker(&self) -> Option<MaintenanceWorker> {
        self.worker.lock().take()
    }
}
