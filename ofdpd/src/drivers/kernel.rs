// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kernel port driver: AF_PACKET-backed interfaces and the receive loop.

use afpacket::sync::RawPacketStream;
use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use control::InterfaceProvider;
use datapath::iface::{NetInterface, TransmitError};
use datapath::{DatapathRegistry, Frame};
use errno::DpErrno;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// An attached kernel interface: identity plus its packet socket.
pub struct KernelIf {
    name: String,
    ifindex: u32,
    hw_addr: [u8; 6],
    mtu: usize,
    up: bool,
    sock: Mutex<RawPacketStream>,
    raw_fd: RawFd,
    promiscuous: AtomicBool,
}

impl KernelIf {
    const DEFAULT_MTU: usize = 1500;

    fn open(info: &netdev::Interface) -> io::Result<KernelIf> {
        let mut sock = RawPacketStream::new().map_err(|e| {
            error!("failed to open packet socket for '{}': {e}", info.name);
            e
        })?;
        sock.set_non_blocking();
        sock.bind(&info.name)
            .inspect_err(|e| error!("failed to bind packet socket to '{}': {e}", info.name))?;
        let raw_fd = sock.as_raw_fd();
        let hw_addr = match &info.mac_addr {
            Some(mac) => mac.octets(),
            None => [0; 6],
        };
        debug!("opened packet socket for '{}'", info.name);
        Ok(KernelIf {
            name: info.name.clone(),
            ifindex: info.index,
            hw_addr,
            mtu: Self::DEFAULT_MTU,
            up: info.is_up(),
            sock: Mutex::new(sock),
            raw_fd,
            promiscuous: AtomicBool::new(false),
        })
    }

    /// The kernel's interface index.
    #[must_use]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Drain every frame currently queued on the socket.
    fn recv_frames(&self) -> Vec<Vec<u8>> {
        let mut raw = [0u8; 2048];
        let mut frames = Vec::with_capacity(32);
        let mut sock = self.sock.lock();
        loop {
            match sock.read(&mut raw) {
                Ok(0) => break,
                Ok(bytes) => frames.push(raw[..bytes].to_vec()),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("read error on '{}': {e}", self.name);
                    break;
                }
            }
        }
        frames
    }
}

impl NetInterface for KernelIf {
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
        self.up
    }

    fn is_ethernet(&self) -> bool {
        self.hw_addr != [0; 6]
    }

    fn set_promiscuous(&self, on: bool) {
        // the packet socket taps every frame the interface accepts; the
        // interface-level flag stays with the operator
        self.promiscuous.store(on, Ordering::Relaxed);
        debug!("'{}': promiscuous mode {}", self.name, if on { "on" } else { "off" });
    }

    fn transmit(&self, frame: Frame) -> Result<(), TransmitError> {
        self.sock
            .lock()
            .write_all(frame.bytes())
            .map_err(|e| TransmitError::Io(e.to_string()))
    }
}

/// The driver: opens interfaces on demand for the control service and runs
/// the receive loop that feeds frames into their datapaths.
pub struct KernelDriver {
    poll: Mutex<Poll>,
    registry: Registry,
    by_token: Mutex<HashMap<Token, Arc<KernelIf>>>,
    next_token: AtomicUsize,
}

impl KernelDriver {
    /// Set the driver up.
    ///
    /// # Errors
    ///
    /// Fails when the host refuses a poller.
    pub fn new() -> io::Result<Arc<KernelDriver>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Arc::new(KernelDriver {
            poll: Mutex::new(poll),
            registry,
            by_token: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
        }))
    }

    /// Receive loop: poll the packet sockets and push frames into their
    /// ports until `stop` is raised.
    pub fn run(&self, dps: &Arc<DatapathRegistry>, stop: &AtomicBool) {
        let mut events = Events::with_capacity(256);
        let timeout = Some(Duration::from_millis(100));
        info!("kernel port driver running");
        while !stop.load(Ordering::Relaxed) {
            {
                let mut poll = self.poll.lock();
                if let Err(e) = poll.poll(&mut events, timeout) {
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    warn!("poll error: {e}");
                    continue;
                }
            }
            for event in &events {
                if !event.is_readable() {
                    continue;
                }
                let Some(iface) = self.by_token.lock().get(&event.token()).cloned() else {
                    continue;
                };
                for data in iface.recv_frames() {
                    match dps.port_for_iface(iface.name()) {
                        Some((dp, port)) => dp.ingress(&port, data),
                        // interface detached while frames were in flight
                        None => debug!("rx on unattached interface '{}'", iface.name()),
                    }
                }
            }
        }
        info!("kernel port driver stopped");
    }
}

impl InterfaceProvider for KernelDriver {
    fn open(&self, name: &str) -> Result<Arc<dyn NetInterface>, DpErrno> {
        let interfaces = netdev::get_interfaces();
        let Some(info) = interfaces.iter().find(|i| i.name == name) else {
            warn!("no such interface '{name}'");
            return Err(DpErrno::NoDevice);
        };
        if info.is_loopback() {
            return Err(DpErrno::PermissionDenied);
        }
        let iface = Arc::new(KernelIf::open(info).map_err(|_| DpErrno::NoDevice)?);
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.registry
            .register(&mut SourceFd(&iface.raw_fd), token, Interest::READABLE)
            .map_err(|e| {
                error!("failed to register '{name}' with the poller: {e}");
                DpErrno::NoMemory
            })?;
        self.by_token.lock().insert(token, iface.clone());
        info!("interface '{name}' ready (ifindex {})", iface.ifindex());
        Ok(iface)
    }
}
