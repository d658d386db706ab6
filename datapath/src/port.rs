// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ports and the per-datapath port table.

use crate::iface::NetInterface;
use arc_swap::ArcSwap;
use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicU64, Ordering};
use openflow::port::{PhyPort, PortConfig, PortNo, PortState};
use openflow::stats::PortStatsRecord;
use parking_lot::Mutex;

/// Size of the numeric port space; valid numeric ports are `[1, DP_MAX_PORTS)`.
pub const DP_MAX_PORTS: usize = 255;

/// Per-port traffic counters.
///
/// Only the counters this datapath can observe are maintained; the
/// framing/overrun/CRC/collision counters of the wire record stay zero,
/// as userland has no view of them.
#[derive(Debug, Default)]
pub struct PortCounters {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
    tx_dropped: AtomicU64,
    rx_errors: AtomicU64,
    tx_errors: AtomicU64,
}

impl PortCounters {
    pub(crate) fn count_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn count_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn count_rx_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_tx_dropped(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// One attached port: an interface, its OpenFlow bitmaps, and counters.
#[derive(Debug)]
pub struct Port {
    port_no: PortNo,
    iface: Arc<dyn NetInterface>,
    // config and state change together under one short-lived lock
    flags: Mutex<(PortConfig, PortState)>,
    counters: PortCounters,
}

impl Port {
    /// Wrap `iface` as port `port_no`; the initial state mirrors the link.
    #[must_use]
    pub fn new(port_no: PortNo, iface: Arc<dyn NetInterface>) -> Port {
        let state = if iface.link_up() {
            PortState::empty()
        } else {
            PortState::LINK_DOWN
        };
        Port {
            port_no,
            iface,
            flags: Mutex::new((PortConfig::empty(), state)),
            counters: PortCounters::default(),
        }
    }

    /// The port's number within its datapath.
    #[must_use]
    pub fn port_no(&self) -> PortNo {
        self.port_no
    }

    /// The wrapped interface.
    #[must_use]
    pub fn iface(&self) -> &Arc<dyn NetInterface> {
        &self.iface
    }

    /// Current administrative configuration.
    #[must_use]
    pub fn config(&self) -> PortConfig {
        self.flags.lock().0
    }

    /// Current observed state.
    #[must_use]
    pub fn state(&self) -> PortState {
        self.flags.lock().1
    }

    /// Apply a `(mask, value)` configuration update.
    pub fn update_config(&self, mask: PortConfig, value: PortConfig) {
        let mut flags = self.flags.lock();
        flags.0 = (flags.0 & !mask) | (value & mask);
    }

    /// Re-read the link state; returns whether it changed.
    pub fn refresh_link(&self) -> bool {
        let now = if self.iface.link_up() {
            PortState::empty()
        } else {
            PortState::LINK_DOWN
        };
        let mut flags = self.flags.lock();
        let changed = flags.1 != now;
        flags.1 = now;
        changed
    }

    /// The port's traffic counters.
    #[must_use]
    pub fn counters(&self) -> &PortCounters {
        &self.counters
    }

    /// The wire descriptor of the port.
    #[must_use]
    pub fn describe(&self) -> PhyPort {
        let (config, state) = *self.flags.lock();
        PhyPort {
            port_no: self.port_no,
            hw_addr: self.iface.hw_addr(),
            name: self.iface.name().to_owned(),
            config,
            state,
            curr: self.iface.features(),
            advertised: self.iface.features(),
            supported: self.iface.features(),
            peer: openflow::port::PortFeatures::empty(),
        }
    }

    /// Snapshot the counters as a wire record.
    #[must_use]
    pub fn stats_record(&self) -> PortStatsRecord {
        PortStatsRecord {
            port_no: self.port_no.0,
            rx_packets: self.counters.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.counters.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.counters.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.counters.rx_dropped.load(Ordering::Relaxed),
            tx_dropped: self.counters.tx_dropped.load(Ordering::Relaxed),
            rx_errors: self.counters.rx_errors.load(Ordering::Relaxed),
            tx_errors: self.counters.tx_errors.load(Ordering::Relaxed),
            ..PortStatsRecord::default()
        }
    }
}

/// The numeric port table of one datapath.
///
/// Readers load an immutable snapshot and use it for the length of their
/// critical section; writers (serialized by the registry mutex) build a new
/// snapshot and swap it in.  A removed port's memory is released only when
/// the last reader of the old snapshot drops its guard.
#[derive(Debug)]
pub struct PortTable {
    map: ArcSwap<Vec<Option<Arc<Port>>>>,
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> PortTable {
        PortTable {
            map: ArcSwap::from_pointee(vec![None; DP_MAX_PORTS]),
        }
    }

    /// Look a numeric port up.
    #[must_use]
    pub fn get(&self, port_no: PortNo) -> Option<Arc<Port>> {
        let slots = self.map.load();
        slots.get(port_no.0 as usize).and_then(Clone::clone)
    }

    /// All attached ports in ascending port order.
    #[must_use]
    pub fn physical_ports(&self) -> Vec<Arc<Port>> {
        self.map.load().iter().flatten().cloned().collect()
    }

    /// Number of attached ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.load().iter().flatten().count()
    }

    /// Whether no port is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest free numeric slot, scanning from 1.
    #[must_use]
    pub fn first_free_slot(&self) -> Option<PortNo> {
        let slots = self.map.load();
        let idx = (1..DP_MAX_PORTS).find(|i| slots[*i].is_none())?;
        #[allow(clippy::cast_possible_truncation)] // DP_MAX_PORTS < u16::MAX
        let port_no = PortNo(idx as u16);
        Some(port_no)
    }

    /// Publish `port` in its slot.  Caller holds the registry mutex.
    pub(crate) fn publish(&self, port: &Arc<Port>) {
        let mut next = (**self.map.load()).clone();
        next[port.port_no().0 as usize] = Some(port.clone());
        self.map.store(Arc::new(next));
    }

    /// Unpublish the port in `port_no`'s slot.  Caller holds the registry mutex.
    pub(crate) fn unpublish(&self, port_no: PortNo) -> Option<Arc<Port>> {
        let mut next = (**self.map.load()).clone();
        let old = next[port_no.0 as usize].take();
        if old.is_some() {
            self.map.store(Arc::new(next));
        }
        old
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::FakeIface;

    #[test]
    fn slots_are_allocated_from_one() {
        let table = PortTable::new();
        assert_eq!(table.first_free_slot(), Some(PortNo(1)));
        let port = Arc::new(Port::new(
            PortNo(1),
            Arc::new(FakeIface::new("veth1", [2, 0, 0, 0, 0, 1])),
        ));
        table.publish(&port);
        assert_eq!(table.first_free_slot(), Some(PortNo(2)));
        assert!(table.get(PortNo(1)).is_some());
    }

    #[test]
    fn config_update_applies_only_masked_bits() {
        let port = Port::new(
            PortNo(1),
            Arc::new(FakeIface::new("veth1", [2, 0, 0, 0, 0, 1])),
        );
        port.update_config(
            PortConfig::NO_FLOOD | PortConfig::NO_FWD,
            PortConfig::NO_FLOOD,
        );
        assert_eq!(port.config(), PortConfig::NO_FLOOD);
        // flipping one masked bit leaves the other untouched
        port.update_config(PortConfig::NO_FWD, PortConfig::NO_FWD);
        assert_eq!(port.config(), PortConfig::NO_FLOOD | PortConfig::NO_FWD);
    }

    #[test]
    fn unpublish_removes_the_slot() {
        let table = PortTable::new();
        let port = Arc::new(Port::new(
            PortNo(3),
            Arc::new(FakeIface::new("veth3", [2, 0, 0, 0, 0, 3])),
        ));
        table.publish(&port);
        let removed = table.unpublish(PortNo(3)).unwrap();
        assert_eq!(removed.port_no(), PortNo(3));
        assert!(table.get(PortNo(3)).is_none());
        assert!(table.unpublish(PortNo(3)).is_none());
    }
}
