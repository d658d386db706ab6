// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The request dispatcher.

use crate::openflow_req;
use crate::stats::VendorStatsRegistry;
use concurrency::sync::Arc;
use datapath::chan::envelope::{
    ATTR_DP_NAME, ATTR_MC_GROUP, ATTR_OPENFLOW, ATTR_PORT_NAME, Envelope, EnvelopeBuilder,
    OP_ADD_DP, OP_ADD_PORT, OP_DEL_DP, OP_DEL_PORT, OP_LISTEN, OP_OPENFLOW, OP_QUERY_DP,
};
use datapath::chan::{self, DP_NONE, PeerId, Sender, Transport};
use datapath::iface::NetInterface;
use datapath::{Datapath, DatapathRegistry};
use errno::DpErrno;
use openflow::wire::Reader;
use openflow::Header;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Resolver from interface names to attachable interfaces.
///
/// The daemon backs this with AF_PACKET sockets; tests back it with fakes.
pub trait InterfaceProvider: Send + Sync {
    /// Open the interface named `name`.
    ///
    /// # Errors
    ///
    /// `NoDevice` when no such interface exists on the host.
    fn open(&self, name: &str) -> Result<Arc<dyn NetInterface>, DpErrno>;
}

/// The control service: one per process, serving every datapath.
pub struct ControlService {
    registry: Arc<DatapathRegistry>,
    ifaces: Arc<dyn InterfaceProvider>,
    vendor_stats: VendorStatsRegistry,
    // peers already greeted with a HELLO
    peers: Mutex<HashSet<PeerId>>,
}

impl ControlService {
    /// Build the service over `registry`, resolving interfaces via `ifaces`.
    #[must_use]
    pub fn new(
        registry: Arc<DatapathRegistry>,
        ifaces: Arc<dyn InterfaceProvider>,
    ) -> Arc<ControlService> {
        Arc::new(ControlService {
            registry,
            ifaces,
            vendor_stats: VendorStatsRegistry::new(),
            peers: Mutex::new(HashSet::new()),
        })
    }

    /// The registry this service fronts.
    #[must_use]
    pub fn registry(&self) -> &Arc<DatapathRegistry> {
        &self.registry
    }

    /// The vendor-statistics registration table.
    #[must_use]
    pub fn vendor_stats(&self) -> &VendorStatsRegistry {
        &self.vendor_stats
    }

    /// Handle one inbound datagram from `peer`.
    ///
    /// Administrative operations require `privileged`.  Admin requests are
    /// acknowledged with a RESULT envelope carrying the errno; OpenFlow
    /// requests are acknowledged only on failure.  A malformed datagram is
    /// dropped (there is no sequence number to acknowledge).
    pub fn handle_datagram(&self, peer: PeerId, privileged: bool, datagram: &[u8]) {
        self.greet(peer);
        let transport = self.registry.transport().clone();
        let env = match Envelope::decode(datagram) {
            Ok(env) => env,
            Err(e) => {
                debug!("dropping malformed datagram from peer {}: {e}", peer.0);
                return;
            }
        };
        let seq = env.seq;
        let dp_idx = env.dp_idx;
        let outcome = self.dispatch(peer, privileged, &env);
        match outcome {
            Outcome::Ack(errno) => {
                let ack = datapath::chan::envelope::result(seq, dp_idx, errno);
                if let Err(e) = transport.unicast(peer, &ack) {
                    debug!("ack to peer {} dropped: {e}", peer.0);
                }
            }
            Outcome::Reply(reply) => {
                if let Err(e) = transport.unicast(peer, &reply) {
                    debug!("reply to peer {} dropped: {e}", peer.0);
                }
            }
            Outcome::Silent => {}
        }
    }

    fn greet(&self, peer: PeerId) {
        if self.peers.lock().insert(peer) {
            chan::send_hello(&**self.registry.transport(), peer, 0);
        }
    }

    fn dispatch(&self, peer: PeerId, privileged: bool, env: &Envelope<'_>) -> Outcome {
        match env.op {
            OP_ADD_DP | OP_DEL_DP | OP_ADD_PORT | OP_DEL_PORT if !privileged => {
                warn!(
                    "peer {} lacks privilege for administrative op {}",
                    peer.0, env.op
                );
                Outcome::Ack(errno::EPERM)
            }
            OP_ADD_DP => Outcome::Ack(self.add_dp(env)),
            OP_DEL_DP => Outcome::Ack(self.del_dp(env)),
            OP_QUERY_DP => self.query_dp(env),
            OP_ADD_PORT => Outcome::Ack(self.add_port(env)),
            OP_DEL_PORT => Outcome::Ack(self.del_port(env)),
            OP_OPENFLOW => match self.openflow(peer, env) {
                Ok(()) => Outcome::Silent,
                Err(e) => Outcome::Ack(e.as_i32()),
            },
            // group membership is handled by the transport server before
            // dispatch; acknowledge so the peer can synchronize on it
            OP_LISTEN => Outcome::Ack(errno::SUCCESS),
            other => {
                debug!("unknown envelope op {other} from peer {}", peer.0);
                Outcome::Ack(errno::EINVAL)
            }
        }
    }

    fn selector<'a>(env: &'a Envelope<'_>) -> (Option<u32>, Option<&'a str>) {
        let idx = if env.dp_idx == DP_NONE {
            None
        } else {
            Some(env.dp_idx)
        };
        (idx, env.attr_str(ATTR_DP_NAME))
    }

    fn add_dp(&self, env: &Envelope<'_>) -> i32 {
        let (idx, name) = Self::selector(env);
        match self.registry.create_dp(idx, name) {
            Ok(_) => errno::SUCCESS,
            Err(e) => {
                debug!("ADD_DP failed: {e}");
                e.errno().as_i32()
            }
        }
    }

    fn del_dp(&self, env: &Envelope<'_>) -> i32 {
        let (idx, name) = Self::selector(env);
        match self.registry.destroy_dp(idx, name) {
            Ok(()) => errno::SUCCESS,
            Err(e) => {
                debug!("DEL_DP failed: {e}");
                e.errno().as_i32()
            }
        }
    }

    fn query_dp(&self, env: &Envelope<'_>) -> Outcome {
        let (idx, name) = Self::selector(env);
        match self.registry.lookup(idx, name) {
            Ok(dp) => Outcome::Reply(
                EnvelopeBuilder::new(OP_QUERY_DP, env.seq, dp.dp_idx())
                    .attr_str(ATTR_DP_NAME, dp.name())
                    .attr_u32(ATTR_MC_GROUP, dp.group().0)
                    .finish(),
            ),
            Err(e) => Outcome::Ack(e.errno().as_i32()),
        }
    }

    fn add_port(&self, env: &Envelope<'_>) -> i32 {
        let result = self.resolve_dp(env).and_then(|dp| {
            let name = env
                .attr_str(ATTR_PORT_NAME)
                .ok_or(DpErrno::Invalid)?;
            let iface = self.ifaces.open(name)?;
            self.registry
                .attach_port(&dp, iface)
                .map_err(|e| e.errno())?;
            Ok(())
        });
        match result {
            Ok(()) => errno::SUCCESS,
            Err(e) => {
                debug!("ADD_PORT failed: {e}");
                e.as_i32()
            }
        }
    }

    fn del_port(&self, env: &Envelope<'_>) -> i32 {
        let result = self.resolve_dp(env).and_then(|dp| {
            let name = env
                .attr_str(ATTR_PORT_NAME)
                .ok_or(DpErrno::Invalid)?;
            self.registry
                .detach_port(&dp, name)
                .map_err(|e| e.errno())
        });
        match result {
            Ok(()) => errno::SUCCESS,
            Err(e) => {
                debug!("DEL_PORT failed: {e}");
                e.as_i32()
            }
        }
    }

    fn resolve_dp(&self, env: &Envelope<'_>) -> Result<Arc<Datapath>, DpErrno> {
        let (idx, name) = Self::selector(env);
        self.registry.lookup(idx, name).map_err(|e| e.errno())
    }

    fn openflow(&self, peer: PeerId, env: &Envelope<'_>) -> Result<(), DpErrno> {
        let dp = self.resolve_dp(env)?;
        let payload = env.attr(ATTR_OPENFLOW).ok_or(DpErrno::Invalid)?;
        // the xid lives in the OpenFlow header; pull it out leniently so
        // even a version reject can correlate
        let xid = Header::decode(&mut Reader::new(payload)).map_or(0, |h| h.xid);
        let sender = Sender {
            peer,
            seq: env.seq,
            xid,
        };
        openflow_req::handle(self, &dp, &sender, payload)
    }
}

enum Outcome {
    Ack(i32),
    Reply(Vec<u8>),
    Silent,
}
