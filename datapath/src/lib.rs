// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # The switch datapath
//!
//! The forwarding plane of an OpenFlow 1.0 switch: datapaths own ports,
//! frames arriving on a port are classified by the flow pipeline, matched
//! frames are forwarded (or flooded, or escalated to the controller), and
//! every lifecycle event is reported on the control channel.
//!
//! The flow tables themselves, the packet-buffer pool, and the transport are
//! external collaborators consumed through the traits in [`pipeline`] and
//! [`chan`].  The fast path (ingress → lookup → output) never blocks: port
//! and datapath tables are read through `arc-swap` snapshots, and writers
//! serialize on the registry mutex and wait out readers instead of aborting
//! them.

pub mod chan;
pub mod dp;
pub mod frame;
pub mod hooks;
pub mod iface;
pub mod ingress;
pub mod output;
pub mod pipeline;
pub mod port;
pub mod registry;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use chan::{GroupId, PeerId, Sender, Transport};
pub use dp::{Datapath, SwitchDesc};
pub use frame::Frame;
pub use iface::{NetInterface, VirtualInterface};
pub use pipeline::{BufferPool, FlowPipeline, PipelineFactory};
pub use port::{DP_MAX_PORTS, Port};
pub use registry::{DP_MAX, DatapathRegistry, RegistryError};
