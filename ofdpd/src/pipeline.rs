// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Stand-in flow machinery for a daemon running without a flow-table
//! module: every frame misses to the controller, packet-out output actions
//! are honored, and flow-table messages are refused as unsupported.

use concurrency::sync::Arc;
use datapath::chan::{self, Sender};
use datapath::pipeline::{
    BufferPool, FlowCursor, FlowFilter, FlowPipeline, FlowSnapshot, PipelineFactory, RemovedFlow,
    TableStats,
};
use datapath::{Datapath, Frame, output};
use errno::DpErrno;
use openflow::action::Action;
use openflow::header::Header;
use openflow::message::PacketInReason;
use openflow::port::PortNo;
use openflow::NO_BUFFER;
use parking_lot::Mutex;
use tracing::debug;

/// A pipeline with no tables: everything escalates.
pub struct MissPipeline;

impl FlowPipeline for MissPipeline {
    fn process_frame(&self, dp: &Arc<Datapath>, frame: Frame) {
        chan::escalate_miss(dp, frame);
    }

    fn execute_actions(&self, dp: &Arc<Datapath>, frame: Frame, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Output { port, max_len } if *port == PortNo::CONTROLLER => {
                    chan::output_control(dp, frame.clone(), *max_len, PacketInReason::Action);
                }
                Action::Output { port, .. } => {
                    if let Err(e) = output::output(dp, frame.clone(), *port, false) {
                        debug!("packet-out to {port} failed: {e}");
                    }
                }
                Action::Other { kind, .. } => {
                    debug!("ignoring action type {kind} without flow machinery");
                }
            }
        }
    }

    fn handle_openflow(
        &self,
        _dp: &Arc<Datapath>,
        _sender: &Sender,
        header: &Header,
        _body: &[u8],
    ) -> Result<(), DpErrno> {
        debug!(
            "no flow machinery for message type {}; refusing",
            header.msg_type
        );
        Err(DpErrno::NotSupported)
    }

    fn expire_flows(&self, _dp: &Arc<Datapath>) -> Vec<RemovedFlow> {
        Vec::new()
    }

    fn n_tables(&self) -> usize {
        0
    }

    fn table_stats(&self) -> Vec<TableStats> {
        Vec::new()
    }

    fn visit_flows(
        &self,
        _filter: &FlowFilter,
        _cursor: &mut FlowCursor,
        _visit: &mut dyn FnMut(&FlowSnapshot) -> bool,
    ) -> bool {
        true
    }
}

/// Factory handing every datapath a [`MissPipeline`].
pub struct MissPipelineFactory;

impl PipelineFactory for MissPipelineFactory {
    fn create(&self, _dp_idx: u32) -> Result<Arc<dyn FlowPipeline>, DpErrno> {
        Ok(Arc::new(MissPipeline))
    }
}

/// A bounded in-memory packet pool for controller escalation.
pub struct PacketPool {
    slots: Mutex<Vec<Option<Frame>>>,
    next: Mutex<usize>,
    capacity: usize,
}

impl PacketPool {
    /// A pool holding up to `capacity` packets; older entries are evicted
    /// ring-wise once the pool is full.
    #[must_use]
    pub fn new(capacity: usize) -> PacketPool {
        PacketPool {
            slots: Mutex::new(vec![None; capacity]),
            next: Mutex::new(0),
            capacity,
        }
    }
}

impl BufferPool for PacketPool {
    fn stash(&self, frame: &Frame) -> u32 {
        if self.capacity == 0 {
            return NO_BUFFER;
        }
        let mut next = self.next.lock();
        let id = *next;
        *next = (*next + 1) % self.capacity;
        drop(next);
        self.slots.lock()[id] = Some(frame.clone());
        #[allow(clippy::cast_possible_truncation)] // capacity is small
        let id = id as u32;
        id
    }

    fn retrieve(&self, id: u32) -> Option<Frame> {
        self.slots.lock().get_mut(id as usize)?.take()
    }

    fn capacity(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let capacity = self.capacity as u32;
        capacity
    }
}
