// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The ingress hook: frames enter the datapath here.

use crate::dp::Datapath;
use crate::frame::Frame;
use crate::port::Port;
use concurrency::sync::Arc;
use openflow::port::PortConfig;
use tracing::trace;

impl Datapath {
    /// Receive one frame from `port`'s interface.
    ///
    /// The driver hands the frame fully owned with its L2 header intact.
    /// Frames on administratively closed ports are counted and dropped;
    /// everything else is handed to the pipeline with the ingress port as
    /// context.  Never blocks.
    pub fn ingress(self: &Arc<Self>, port: &Arc<Port>, data: Vec<u8>) {
        if port
            .config()
            .intersects(PortConfig::PORT_DOWN | PortConfig::NO_RECV)
        {
            port.counters().count_rx_dropped();
            return;
        }
        port.counters().count_rx(data.len());
        trace!(
            "dp{}: rx {} bytes on port {}",
            self.dp_idx(),
            data.len(),
            port.port_no()
        );
        let frame = Frame::with_ingress(data, port.port_no());
        self.pipeline().process_frame(self, frame);
    }
}
