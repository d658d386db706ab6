// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The host-interface abstraction and the datapath's own virtual interface.

use crate::frame::Frame;
use openflow::port::PortFeatures;
use parking_lot::Mutex;

/// Error transmitting a frame on an interface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransmitError {
    /// The interface (or its carrier) is down.
    #[error("interface is down")]
    Down,
    /// The host refused the frame.
    #[error("transmit failed: {0}")]
    Io(String),
}

/// A network interface a port can wrap.
///
/// Implementations: [`VirtualInterface`] (the datapath's local port), the
/// AF_PACKET-backed kernel interface in the daemon, and the recording fake
/// behind the `testing` feature.
pub trait NetInterface: Send + Sync {
    /// Interface name, unique on the host.
    fn name(&self) -> &str;

    /// Current hardware address.
    fn hw_addr(&self) -> [u8; 6];

    /// L3 MTU of the interface.
    fn mtu(&self) -> usize;

    /// Whether the link has carrier.
    fn link_up(&self) -> bool;

    /// Whether this is an Ethernet interface.  Only Ethernet attaches.
    fn is_ethernet(&self) -> bool {
        true
    }

    /// Whether this is a loopback interface.  Loopback never attaches.
    fn is_loopback(&self) -> bool {
        false
    }

    /// Whether this interface is a datapath's own virtual interface.
    fn is_internal(&self) -> bool {
        false
    }

    /// Speed and media bits for the port descriptor.
    fn features(&self) -> PortFeatures {
        PortFeatures::empty()
    }

    /// Toggle promiscuous mode; held on for the lifetime of an attachment.
    fn set_promiscuous(&self, on: bool);

    /// Transmit one frame, taking ownership.
    ///
    /// # Errors
    ///
    /// Fails with [`TransmitError`] when the interface cannot accept the
    /// frame; the frame is dropped in that case.
    fn transmit(&self, frame: Frame) -> Result<(), TransmitError>;
}

impl std::fmt::Debug for dyn NetInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetInterface({})", self.name())
    }
}

/// The virtual interface backing a datapath's local port.
///
/// Frames output to `LOCAL` are queued here for the host side of the daemon
/// to drain.  Its hardware address doubles as the datapath id: it starts as
/// a locally-administered address derived from `dp_idx` and is overwritten
/// with the MAC of the first port attached to the datapath.
#[derive(Debug)]
pub struct VirtualInterface {
    name: String,
    hw_addr: Mutex<[u8; 6]>,
    mtu: usize,
    tx: crossbeam_channel::Sender<Frame>,
    rx: crossbeam_channel::Receiver<Frame>,
}

impl VirtualInterface {
    /// Default MTU of a virtual interface.
    pub const DEFAULT_MTU: usize = 1500;

    /// Create the virtual interface for datapath `dp_idx`.
    #[must_use]
    pub fn new(name: &str, dp_idx: u32) -> VirtualInterface {
        let (tx, rx) = crossbeam_channel::unbounded();
        let idx = dp_idx.to_be_bytes();
        VirtualInterface {
            name: name.to_owned(),
            // locally administered, derived from the index until a port donates its MAC
            hw_addr: Mutex::new([0x02, 0x00, idx[0], idx[1], idx[2], idx[3]]),
            mtu: Self::DEFAULT_MTU,
            tx,
            rx,
        }
    }

    /// Adopt `addr` as the interface's (and thus the datapath's) address.
    pub fn set_hw_addr(&self, addr: [u8; 6]) {
        *self.hw_addr.lock() = addr;
    }

    /// Drain one frame delivered to the local port, if any.
    #[must_use]
    pub fn take_delivered(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl NetInterface for VirtualInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn hw_addr(&self) -> [u8; 6] {
        *self.hw_addr.lock()
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn link_up(&self) -> bool {
        true
    }

    fn is_internal(&self) -> bool {
        true
    }

    fn set_promiscuous(&self, _on: bool) {}

    fn transmit(&self, frame: Frame) -> Result<(), TransmitError> {
        self.tx
            .send(frame)
            .map_err(|_| TransmitError::Io("local queue closed".to_owned()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_delivery_queues_frames() {
        let vif = VirtualInterface::new("of0", 0);
        assert!(vif.take_delivered().is_none());
        vif.transmit(Frame::new(vec![0u8; 60])).unwrap();
        assert_eq!(vif.take_delivered().unwrap().len(), 60);
    }

    #[test]
    fn hw_addr_adoption() {
        let vif = VirtualInterface::new("of0", 0);
        assert_eq!(vif.hw_addr()[0], 0x02);
        vif.set_hw_addr([2, 0, 0, 0, 0, 1]);
        assert_eq!(vif.hw_addr(), [2, 0, 0, 0, 0, 1]);
    }
}
