// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The unix-datagram control server.
//!
//! Every client binds its own socket to a filesystem path and sends
//! envelope datagrams here; replies and acks go back to that path, and
//! notification groups are plain membership sets a client joins with a
//! LISTEN envelope.  Privilege is the socket file's mode: anyone who can
//! write the socket may administer the switch.

use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use control::ControlService;
use datapath::chan::envelope::{ATTR_MC_GROUP, Envelope, OP_LISTEN};
use datapath::chan::{GroupId, NOTIFY_GROUPS, PeerId, Transport};
use errno::DpErrno;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transport state: the server socket plus peer and group bookkeeping.
pub struct UnixTransport {
    sock: UnixDatagram,
    peers: Mutex<HashMap<PeerId, PathBuf>>,
    by_path: Mutex<HashMap<PathBuf, PeerId>>,
    groups: Mutex<HashMap<u32, HashSet<PeerId>>>,
    next_peer: AtomicU32,
}

impl UnixTransport {
    /// Bind the control socket at `path`, replacing a stale one.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be bound.
    pub fn bind(path: &Path) -> io::Result<Arc<UnixTransport>> {
        let _ = std::fs::remove_file(path);
        let sock = UnixDatagram::bind(path)?;
        sock.set_read_timeout(Some(Duration::from_millis(100)))?;
        info!("control channel listening on {}", path.display());
        Ok(Arc::new(UnixTransport {
            sock,
            peers: Mutex::new(HashMap::new()),
            by_path: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            next_peer: AtomicU32::new(1),
        }))
    }

    fn peer_for(&self, path: &Path) -> PeerId {
        if let Some(peer) = self.by_path.lock().get(path) {
            return *peer;
        }
        let peer = PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed));
        self.by_path.lock().insert(path.to_owned(), peer);
        self.peers.lock().insert(peer, path.to_owned());
        debug!("peer {} is {}", peer.0, path.display());
        peer
    }

    fn join_group(&self, peer: PeerId, group: u32) {
        if group >= NOTIFY_GROUPS {
            warn!("peer {} asked for nonexistent group {group}", peer.0);
            return;
        }
        self.groups.lock().entry(group).or_default().insert(peer);
        info!("peer {} joined notification group openflow{group}", peer.0);
    }

    /// Serve until `stop` is raised.
    pub fn serve(&self, svc: &Arc<ControlService>, stop: &AtomicBool) {
        let mut buf = vec![0u8; 0x1_0000 + 256];
        while !stop.load(Ordering::Relaxed) {
            let (len, addr) = match self.sock.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("control socket receive failed: {e}");
                    continue;
                }
            };
            let Some(path) = addr.as_pathname() else {
                // an unbound client socket cannot be replied to
                debug!("dropping datagram from unbound peer");
                continue;
            };
            let peer = self.peer_for(path);
            let datagram = &buf[..len];
            // group membership is transport state, handled before dispatch
            if let Ok(env) = Envelope::decode(datagram)
                && env.op == OP_LISTEN
                && let Some(group) = env.attr_u32(ATTR_MC_GROUP)
            {
                self.join_group(peer, group);
            }
            svc.handle_datagram(peer, true, datagram);
        }
        info!("control server stopped");
    }
}

impl Transport for UnixTransport {
    fn unicast(&self, peer: PeerId, msg: &[u8]) -> Result<(), DpErrno> {
        let Some(path) = self.peers.lock().get(&peer).cloned() else {
            return Err(DpErrno::NotFound);
        };
        match self.sock.send_to(msg, &path) {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("unicast to peer {} failed: {e}", peer.0);
                Err(DpErrno::NoBuffers)
            }
        }
    }

    fn multicast(&self, group: GroupId, msg: &[u8]) -> Result<(), DpErrno> {
        let members: Vec<PeerId> = self
            .groups
            .lock()
            .get(&group.0)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for peer in members {
            // best effort per member; a gone listener never blocks the rest
            let _ = self.unicast(peer, msg);
        }
        Ok(())
    }
}
