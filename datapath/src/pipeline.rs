// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Seams to the flow-table machinery and the packet-buffer pool.
//!
//! The flow tables (match/insert/delete, the pipeline container, action
//! rewriting) live outside this crate; the engine drives them through
//! [`FlowPipeline`] and they call back into [`crate::output`] and
//! [`crate::chan`] to move frames.

use crate::chan::Sender;
use crate::dp::Datapath;
use crate::frame::Frame;
use concurrency::sync::Arc;
use errno::DpErrno;
use openflow::action::Action;
use openflow::flow::{FlowMatch, FlowRemovedReason};
use openflow::header::Header;
use openflow::port::PortNo;
use std::time::Duration;

/// Selector for a statistics walk over the flow tables.
#[derive(Debug, Clone, Copy)]
pub struct FlowFilter {
    /// Table id, or the all-tables / emergency-table sentinels.
    pub table_id: u8,
    /// Pattern installed flows must be covered by.
    pub pattern: FlowMatch,
    /// Only flows outputting to this port; [`PortNo::NONE`] disables.
    pub out_port: PortNo,
}

/// Resumption point of a statistics walk: table index plus in-table offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCursor {
    /// Index into the selected table sequence.
    pub table: usize,
    /// Flows of that table already reported.
    pub offset: usize,
}

/// A point-in-time view of one installed flow.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    /// Table the flow lives in.
    pub table_id: u8,
    /// The flow's match.
    pub pattern: FlowMatch,
    /// Time since installation.
    pub duration: Duration,
    /// Match priority.
    pub priority: u16,
    /// Idle timeout in seconds.
    pub idle_timeout: u16,
    /// Hard timeout in seconds.
    pub hard_timeout: u16,
    /// Controller cookie.
    pub cookie: u64,
    /// Packets matched so far.
    pub packet_count: u64,
    /// Bytes matched so far.
    pub byte_count: u64,
    /// The flow's actions.
    pub actions: Vec<Action>,
}

/// Per-table counters for TABLE statistics.
#[derive(Debug, Clone)]
pub struct TableStats {
    /// Table id.
    pub table_id: u8,
    /// Table name.
    pub name: String,
    /// Wildcard bits the table supports.
    pub wildcards: u32,
    /// Table capacity.
    pub max_entries: u32,
    /// Flows installed.
    pub active_count: u32,
    /// Lookups performed.
    pub lookup_count: u64,
    /// Lookups that matched.
    pub matched_count: u64,
}

/// A flow the pipeline has removed, ready to be reported.
#[derive(Debug, Clone)]
pub struct RemovedFlow {
    /// The flow's match.
    pub pattern: FlowMatch,
    /// Match priority.
    pub priority: u16,
    /// Controller cookie.
    pub cookie: u64,
    /// Why the flow died.
    pub reason: FlowRemovedReason,
    /// Installed-to-removed duration.
    pub duration: Duration,
    /// Idle timeout in seconds.
    pub idle_timeout: u16,
    /// Final packet count.
    pub packet_count: u64,
    /// Final byte count.
    pub byte_count: u64,
    /// Whether the flow lived in the emergency table.
    pub emergency: bool,
    /// Whether the flow asked for a removal notification.
    pub notify: bool,
}

/// The flow-table pipeline of one datapath.
pub trait FlowPipeline: Send + Sync {
    /// Classify `frame` and act on it: run the matched flow's actions
    /// through the forwarding engine, or escalate a miss via
    /// [`Datapath::escalate_miss`].  Takes ownership of the frame.
    fn process_frame(&self, dp: &Arc<Datapath>, frame: Frame);

    /// Apply an already-validated action list to `frame` (packet-out).
    /// Takes ownership of the frame.
    fn execute_actions(&self, dp: &Arc<Datapath>, frame: Frame, actions: &[Action]);

    /// Handle a flow-table OpenFlow message (flow-mod and friends).
    ///
    /// # Errors
    ///
    /// Returns the errno to surface to `sender`.
    fn handle_openflow(
        &self,
        dp: &Arc<Datapath>,
        sender: &Sender,
        header: &Header,
        body: &[u8],
    ) -> Result<(), DpErrno>;

    /// Sweep timed-out flows, returning what was removed.
    fn expire_flows(&self, dp: &Arc<Datapath>) -> Vec<RemovedFlow>;

    /// Number of flow tables.
    fn n_tables(&self) -> usize;

    /// Per-table counters, one record per table.
    fn table_stats(&self) -> Vec<TableStats>;

    /// Walk flows selected by `filter` starting at `cursor`, advancing the
    /// cursor as flows are accepted.  `visit` returns `false` to pause the
    /// walk (reply fragment full).  Returns `true` once the walk is
    /// exhausted.
    fn visit_flows(
        &self,
        filter: &FlowFilter,
        cursor: &mut FlowCursor,
        visit: &mut dyn FnMut(&FlowSnapshot) -> bool,
    ) -> bool;
}

/// Builds the pipeline of a freshly created datapath.
pub trait PipelineFactory: Send + Sync {
    /// Create the pipeline for datapath `dp_idx`.
    ///
    /// # Errors
    ///
    /// Returns the errno creation should fail with.
    fn create(&self, dp_idx: u32) -> Result<Arc<dyn FlowPipeline>, DpErrno>;
}

/// The pool that stashes packets escalated to the controller.
pub trait BufferPool: Send + Sync {
    /// Stash a copy of `frame`, returning its buffer id or
    /// [`openflow::NO_BUFFER`] when the pool declines.
    fn stash(&self, frame: &Frame) -> u32;

    /// Yield a stashed frame back (packet-out by buffer id).
    fn retrieve(&self, id: u32) -> Option<Frame>;

    /// Number of packets the pool can hold, for the features reply.
    fn capacity(&self) -> u32;
}
