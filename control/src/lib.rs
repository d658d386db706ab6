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

//! # The control service
//!
//! Everything between the management transport and the datapath registry:
//! the administrative request dispatcher, the inbound OpenFlow request
//! handler, and the multi-part statistics engine.
//!
//! One [`ControlService`] serves every datapath in a registry.  Requests
//! from a peer are processed in arrival order (the registry's writer mutex
//! serializes the mutating ones), which is what makes barrier replies an
//! ordering fence.

pub mod openflow_req;
pub mod service;
pub mod stats;

pub use service::{ControlService, InterfaceProvider};
pub use stats::{VendorStatsHandler, VendorStatsRegistry};
