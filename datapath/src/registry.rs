// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The process-wide datapath registry.
//!
//! Lookups are lock-free snapshot reads; creation, destruction, and port
//! attach/detach serialize on one writer mutex, which is also what gives
//! control requests their per-sender ordering.

use crate::chan::{self, Transport};
use crate::dp::{Datapath, SwitchDesc};
use crate::hooks::DatapathHooks;
use crate::iface::NetInterface;
use crate::pipeline::{BufferPool, PipelineFactory};
use crate::port::Port;
use crate::worker::{MAINT_INTERVAL, MaintenanceWorker};
use arc_swap::ArcSwapOption;
use concurrency::sync::Arc;
use dashmap::DashMap;
use errno::DpErrno;
use openflow::message::PortStatusReason;
use parking_lot::Mutex;
use tracing::{info, warn};

/// Size of the datapath slot space.
pub const DP_MAX: usize = 256;

/// Ways registry operations fail.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `dp_idx` at or beyond [`DP_MAX`].
    #[error("datapath index {0} out of range")]
    OutOfRange(u32),
    /// Slot (or name) already taken.
    #[error("datapath already exists")]
    Exists,
    /// No free slot for auto-assignment.
    #[error("datapath registry full")]
    Exhausted,
    /// Neither an index nor a name was supplied, or the two disagree.
    #[error("invalid datapath selector")]
    BadSelector,
    /// No datapath matched the selector.
    #[error("no such datapath")]
    NotFound,
    /// Loopback interfaces never attach.
    #[error("interface {0} is loopback")]
    Loopback(String),
    /// Only Ethernet interfaces attach.
    #[error("interface {0} is not ethernet")]
    NotEthernet(String),
    /// A datapath's own virtual interface never attaches.
    #[error("interface {0} is internal to a datapath")]
    Internal(String),
    /// The interface is already attached to some datapath.
    #[error("interface {0} is already attached")]
    Busy(String),
    /// The named interface is not attached here.
    #[error("no such interface {0}")]
    NoDevice(String),
    /// No free numeric port slot.
    #[error("port table full")]
    PortsExhausted,
    /// Pipeline initialization failed.
    #[error("pipeline initialization failed: {0}")]
    Pipeline(DpErrno),
    /// The host refused the maintenance thread.
    #[error("maintenance worker failed to start: {0}")]
    Worker(std::io::Error),
}

impl RegistryError {
    /// The errno this failure surfaces as on the control channel.
    #[must_use]
    pub fn errno(&self) -> DpErrno {
        match self {
            RegistryError::OutOfRange(_) | RegistryError::BadSelector => DpErrno::Invalid,
            RegistryError::Exists => DpErrno::Exists,
            RegistryError::Exhausted | RegistryError::PortsExhausted => DpErrno::Exhausted,
            RegistryError::NotFound => DpErrno::NotFound,
            RegistryError::Loopback(_) => DpErrno::PermissionDenied,
            RegistryError::NotEthernet(_) | RegistryError::Internal(_) => DpErrno::Invalid,
            RegistryError::Busy(_) => DpErrno::Busy,
            RegistryError::NoDevice(_) => DpErrno::NoDevice,
            RegistryError::Pipeline(e) => *e,
            RegistryError::Worker(_) => DpErrno::NoMemory,
        }
    }
}

/// The registry: `DP_MAX` published slots plus everything a datapath is
/// born with.
pub struct DatapathRegistry {
    slots: Vec<ArcSwapOption<Datapath>>,
    // serializes writers against each other; never held on the fast path
    writer: Mutex<()>,
    // ifname -> dp_idx; enforces one attachment per interface, process-wide
    claims: DashMap<String, u32>,
    hooks: Mutex<Option<Arc<dyn DatapathHooks>>>,
    transport: Arc<dyn Transport>,
    pool: Arc<dyn BufferPool>,
    factory: Arc<dyn PipelineFactory>,
    desc: Arc<SwitchDesc>,
}

impl DatapathRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Arc<dyn BufferPool>,
        factory: Arc<dyn PipelineFactory>,
        desc: Arc<SwitchDesc>,
    ) -> Arc<DatapathRegistry> {
        Arc::new(DatapathRegistry {
            slots: (0..DP_MAX).map(|_| ArcSwapOption::const_empty()).collect(),
            writer: Mutex::new(()),
            claims: DashMap::new(),
            hooks: Mutex::new(None),
            transport,
            pool,
            factory,
            desc,
        })
    }

    /// The transport datapaths are born with.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The switch description strings.
    #[must_use]
    pub fn desc(&self) -> &Arc<SwitchDesc> {
        &self.desc
    }

    /// Register (or clear) the lifecycle observer.
    pub fn set_hooks(&self, hooks: Option<Arc<dyn DatapathHooks>>) {
        *self.hooks.lock() = hooks;
    }

    fn hooks(&self) -> Option<Arc<dyn DatapathHooks>> {
        self.hooks.lock().clone()
    }

    /// Published datapath in slot `dp_idx`, if any.
    #[must_use]
    pub fn get(&self, dp_idx: u32) -> Option<Arc<Datapath>> {
        self.slots.get(dp_idx as usize)?.load_full()
    }

    /// Resolve a datapath by index and/or name.  When both are given they
    /// must agree.
    ///
    /// # Errors
    ///
    /// Fails with `BadSelector` for an empty or contradictory selector and
    /// `NotFound` when nothing matches.
    pub fn lookup(
        &self,
        dp_idx: Option<u32>,
        name: Option<&str>,
    ) -> Result<Arc<Datapath>, RegistryError> {
        match (dp_idx, name) {
            (None, None) => Err(RegistryError::BadSelector),
            (Some(idx), None) => self.get(idx).ok_or(RegistryError::NotFound),
            (None, Some(name)) => self
                .iter()
                .find(|dp| dp.name() == name)
                .ok_or(RegistryError::NotFound),
            (Some(idx), Some(name)) => {
                let dp = self.get(idx).ok_or(RegistryError::NotFound)?;
                if dp.name() == name {
                    Ok(dp)
                } else {
                    Err(RegistryError::BadSelector)
                }
            }
        }
    }

    /// Every live datapath, ascending by index.
    pub fn iter(&self) -> impl Iterator<Item = Arc<Datapath>> + '_ {
        self.slots.iter().filter_map(|slot| slot.load_full())
    }

    /// Create a datapath.
    ///
    /// With no explicit index the lowest free slot is taken.  The default
    /// name is `of<idx>`.
    ///
    /// # Errors
    ///
    /// Fails with `OutOfRange`, `Exists`, `Exhausted`,
    /// `BadSelector` (neither index nor name), or a pipeline/worker failure.
    pub fn create_dp(
        self: &Arc<Self>,
        dp_idx: Option<u32>,
        name: Option<&str>,
    ) -> Result<Arc<Datapath>, RegistryError> {
        if dp_idx.is_none() && name.is_none() {
            return Err(RegistryError::BadSelector);
        }
        let _guard = self.writer.lock();

        let idx = match dp_idx {
            Some(idx) => {
                if idx as usize >= DP_MAX {
                    return Err(RegistryError::OutOfRange(idx));
                }
                if self.slots[idx as usize].load().is_some() {
                    return Err(RegistryError::Exists);
                }
                idx
            }
            None => {
                #[allow(clippy::cast_possible_truncation)] // DP_MAX fits u32
                let free = (0..DP_MAX)
                    .find(|i| self.slots[*i].load().is_none())
                    .map(|i| i as u32);
                free.ok_or(RegistryError::Exhausted)?
            }
        };
        let name = match name {
            Some(n) => n.to_owned(),
            None => format!("of{idx}"),
        };
        if self.iter().any(|dp| dp.name() == name) {
            return Err(RegistryError::Exists);
        }

        let pipeline = self
            .factory
            .create(idx)
            .map_err(RegistryError::Pipeline)?;
        let dp = Datapath::new(
            idx,
            name,
            pipeline,
            self.pool.clone(),
            self.transport.clone(),
            self.desc.clone(),
        );
        let worker =
            MaintenanceWorker::start(&dp, MAINT_INTERVAL).map_err(RegistryError::Worker)?;
        dp.set_worker(worker);
        self.slots[idx as usize].store(Some(dp.clone()));
        info!("created dp{idx} ({})", dp.name());
        if let Some(hooks) = self.hooks() {
            hooks.dp_added(&dp);
        }
        Ok(dp)
    }

    /// Destroy a datapath: unpublish, stop its worker, detach its ports.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` / `BadSelector` per [`DatapathRegistry::lookup`].
    pub fn destroy_dp(
        self: &Arc<Self>,
        dp_idx: Option<u32>,
        name: Option<&str>,
    ) -> Result<(), RegistryError> {
        let guard = self.writer.lock();
        let dp = self.lookup(dp_idx, name)?;
        // unpublish first so no new control operation can reach the dp
        self.slots[dp.dp_idx() as usize].store(None);
        drop(guard);

        // the worker must park before any port teardown begins
        if let Some(worker) = dp.take_worker() {
            worker.stop();
        }

        let _guard = self.writer.lock();
        for port in dp.ports().physical_ports() {
            self.detach_locked(&dp, &port);
        }
        info!("destroyed dp{} ({})", dp.dp_idx(), dp.name());
        if let Some(hooks) = self.hooks() {
            hooks.dp_removed(&dp);
        }
        Ok(())
    }

    /// Attach `iface` to `dp` on the lowest free numeric port.
    ///
    /// # Errors
    ///
    /// Fails when the interface kind is refused, the interface is already
    /// attached anywhere (`Busy`), or the port table is full.
    pub fn attach_port(
        self: &Arc<Self>,
        dp: &Arc<Datapath>,
        iface: Arc<dyn NetInterface>,
    ) -> Result<Arc<Port>, RegistryError> {
        if iface.is_loopback() {
            return Err(RegistryError::Loopback(iface.name().to_owned()));
        }
        if !iface.is_ethernet() {
            return Err(RegistryError::NotEthernet(iface.name().to_owned()));
        }
        if iface.is_internal() {
            return Err(RegistryError::Internal(iface.name().to_owned()));
        }

        let _guard = self.writer.lock();
        if self.claims.contains_key(iface.name()) {
            return Err(RegistryError::Busy(iface.name().to_owned()));
        }
        let port_no = dp
            .ports()
            .first_free_slot()
            .ok_or(RegistryError::PortsExhausted)?;

        // the first attached port donates its MAC to the local interface,
        // which is where the datapath id comes from
        if dp.ports().is_empty() {
            dp.adopt_first_port_addr(iface.hw_addr());
        }
        iface.set_promiscuous(true);
        let port = Arc::new(Port::new(port_no, iface));
        self.claims.insert(port.iface().name().to_owned(), dp.dp_idx());
        dp.ports().publish(&port);
        info!(
            "dp{}: attached {} as port {}",
            dp.dp_idx(),
            port.iface().name(),
            port_no
        );
        chan::send_port_status(dp, PortStatusReason::Add, &port);
        if let Some(hooks) = self.hooks() {
            hooks.port_added(dp, &port);
        }
        Ok(port)
    }

    /// Detach the interface named `ifname` from `dp`.
    ///
    /// # Errors
    ///
    /// Fails with `NoDevice` when no such interface is attached to `dp`.
    pub fn detach_port(
        self: &Arc<Self>,
        dp: &Arc<Datapath>,
        ifname: &str,
    ) -> Result<(), RegistryError> {
        let _guard = self.writer.lock();
        let port = dp
            .ports()
            .physical_ports()
            .into_iter()
            .find(|p| p.iface().name() == ifname)
            .ok_or_else(|| RegistryError::NoDevice(ifname.to_owned()))?;
        self.detach_locked(dp, &port);
        Ok(())
    }

    /// Detach a port the caller already resolved.  Caller holds the writer
    /// mutex.
    fn detach_locked(self: &Arc<Self>, dp: &Arc<Datapath>, port: &Arc<Port>) {
        if dp.ports().unpublish(port.port_no()).is_none() {
            warn!(
                "dp{}: port {} vanished during detach",
                dp.dp_idx(),
                port.port_no()
            );
            return;
        }
        self.claims.remove(port.iface().name());
        port.iface().set_promiscuous(false);
        info!(
            "dp{}: detached {} (port {})",
            dp.dp_idx(),
            port.iface().name(),
            port.port_no()
        );
        chan::send_port_status(dp, PortStatusReason::Delete, port);
        if let Some(hooks) = self.hooks() {
            hooks.port_removed(dp, port);
        }
    }

    /// Resolve a received frame's interface name to its datapath and port.
    /// Lock-free; meant for the receive path.
    #[must_use]
    pub fn port_for_iface(&self, ifname: &str) -> Option<(Arc<Datapath>, Arc<Port>)> {
        let dp_idx = *self.claims.get(ifname)?;
        let dp = self.get(dp_idx)?;
        let port = dp
            .ports()
            .physical_ports()
            .into_iter()
            .find(|p| p.iface().name() == ifname)?;
        Some((dp, port))
    }

    /// Handle the OS announcing that an interface went away: detach it from
    /// whichever datapath holds it.
    pub fn interface_gone(self: &Arc<Self>, ifname: &str) {
        let Some(entry) = self.claims.get(ifname).map(|e| *e.value()) else {
            return;
        };
        if let Some(dp) = self.get(entry)
            && let Err(e) = self.detach_port(&dp, ifname)
        {
            warn!("detach of vanished interface {ifname} failed: {e}");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::{FakeIface, FakePipelineFactory, LoopbackTransport, VecBufferPool};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<DatapathRegistry> {
        DatapathRegistry::new(
            Arc::new(LoopbackTransport::new()),
            Arc::new(VecBufferPool::new(16)),
            Arc::new(FakePipelineFactory::new()),
            Arc::default(),
        )
    }

    #[test]
    fn slots_hold_their_own_index() {
        let reg = registry();
        let dp0 = reg.create_dp(Some(0), None).unwrap();
        let dp5 = reg.create_dp(Some(5), Some("edge")).unwrap();
        assert_eq!(dp0.dp_idx(), 0);
        assert_eq!(reg.get(5).unwrap().dp_idx(), 5);
        assert_eq!(dp5.name(), "edge");
        reg.destroy_dp(Some(0), None).unwrap();
        reg.destroy_dp(None, Some("edge")).unwrap();
    }

    #[test]
    fn create_requires_a_selector() {
        let reg = registry();
        assert!(matches!(
            reg.create_dp(None, None),
            Err(RegistryError::BadSelector)
        ));
    }

    #[test]
    fn auto_assignment_takes_the_lowest_free_slot() {
        let reg = registry();
        reg.create_dp(Some(0), None).unwrap();
        reg.create_dp(Some(2), None).unwrap();
        let dp = reg.create_dp(None, Some("gap")).unwrap();
        assert_eq!(dp.dp_idx(), 1);
    }

    #[test]
    fn duplicate_slot_is_refused() {
        let reg = registry();
        reg.create_dp(Some(3), None).unwrap();
        assert!(matches!(
            reg.create_dp(Some(3), None),
            Err(RegistryError::Exists)
        ));
        assert!(matches!(
            reg.create_dp(Some(999), None),
            Err(RegistryError::OutOfRange(999))
        ));
    }

    #[test]
    fn full_registry_is_exhausted() {
        let reg = registry();
        for i in 0..DP_MAX {
            #[allow(clippy::cast_possible_truncation)]
            reg.create_dp(Some(i as u32), None).unwrap();
        }
        assert!(matches!(
            reg.create_dp(None, Some("one-too-many")),
            Err(RegistryError::Exhausted)
        ));
    }

    #[test]
    fn lookup_by_both_must_agree() {
        let reg = registry();
        reg.create_dp(Some(1), Some("core")).unwrap();
        assert!(reg.lookup(Some(1), Some("core")).is_ok());
        assert!(matches!(
            reg.lookup(Some(1), Some("edge")),
            Err(RegistryError::BadSelector)
        ));
    }

    #[test]
    fn attached_interface_is_busy_everywhere() {
        let reg = registry();
        let dp0 = reg.create_dp(Some(0), None).unwrap();
        let dp1 = reg.create_dp(Some(1), None).unwrap();
        let iface = Arc::new(FakeIface::new("veth0", [2, 0, 0, 0, 0, 1]));
        reg.attach_port(&dp0, iface.clone()).unwrap();
        assert!(matches!(
            reg.attach_port(&dp0, iface.clone()),
            Err(RegistryError::Busy(_))
        ));
        assert!(matches!(
            reg.attach_port(&dp1, iface.clone()),
            Err(RegistryError::Busy(_))
        ));
        // detaching frees the claim
        reg.detach_port(&dp0, "veth0").unwrap();
        reg.attach_port(&dp1, iface).unwrap();
    }

    #[test]
    fn loopback_is_refused() {
        let reg = registry();
        let dp = reg.create_dp(Some(0), None).unwrap();
        let lo = Arc::new(FakeIface::loopback("lo"));
        assert!(matches!(
            reg.attach_port(&dp, lo),
            Err(RegistryError::Loopback(_))
        ));
    }

    #[test]
    fn first_port_donates_the_datapath_id() {
        let reg = registry();
        let dp = reg.create_dp(Some(0), None).unwrap();
        let iface = Arc::new(FakeIface::new("veth0", [0x02, 0, 0, 0, 0, 0x01]));
        reg.attach_port(&dp, iface).unwrap();
        assert_eq!(dp.id(), 0x0200_0000_0001);
    }

    #[test]
    fn hooks_fire_after_lifecycle_events() {
        #[derive(Default)]
        struct Recorder {
            events: Mutex<Vec<String>>,
        }
        impl DatapathHooks for Recorder {
            fn dp_added(&self, dp: &Arc<Datapath>) {
                self.events.lock().push(format!("dp_added {}", dp.dp_idx()));
            }
            fn dp_removed(&self, dp: &Arc<Datapath>) {
                self.events.lock().push(format!("dp_removed {}", dp.dp_idx()));
            }
            fn port_added(&self, _dp: &Arc<Datapath>, port: &Arc<Port>) {
                self.events.lock().push(format!("port_added {}", port.port_no()));
            }
            fn port_removed(&self, _dp: &Arc<Datapath>, port: &Arc<Port>) {
                self.events
                    .lock()
                    .push(format!("port_removed {}", port.port_no()));
            }
        }

        let reg = registry();
        let recorder = Arc::new(Recorder::default());
        let hooks: Arc<dyn DatapathHooks> = recorder.clone();
        reg.set_hooks(Some(hooks));
        let dp = reg.create_dp(Some(0), None).unwrap();
        reg.attach_port(&dp, Arc::new(FakeIface::new("veth0", [2, 0, 0, 0, 0, 1])))
            .unwrap();
        reg.destroy_dp(Some(0), None).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec!["dp_added 0", "port_added 1", "port_removed 1", "dp_removed 0"]
        );
    }

    #[test]
    fn promiscuous_mode_tracks_attachment() {
        let reg = registry();
        let dp = reg.create_dp(Some(0), None).unwrap();
        let iface = Arc::new(FakeIface::new("veth0", [2, 0, 0, 0, 0, 1]));
        reg.attach_port(&dp, iface.clone()).unwrap();
        assert!(iface.is_promiscuous());
        reg.detach_port(&dp, "veth0").unwrap();
        assert!(!iface.is_promiscuous());
    }
}
