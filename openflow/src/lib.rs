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

//! # OpenFlow 1.0 wire model
//!
//! Byte-for-byte encode/decode of the OpenFlow 1.0 protocol as the switch
//! speaks it: the fixed header, the reserved port space, the 12-tuple match,
//! action lists, every message body the datapath produces or consumes, and
//! the statistics records.
//!
//! All multi-byte integers are big-endian on the wire, including the 64-bit
//! counters.  Decoding goes through [`wire::Reader`], which never panics on
//! short input; encoding goes through [`MsgBuf`], the two-phase builder that
//! reserves an upper bound, lets the caller fill the body, and patches the
//! 16-bit length field on [`MsgBuf::finish`].

pub mod action;
pub mod flow;
pub mod header;
pub mod message;
pub mod port;
pub mod stats;
pub mod wire;

mod buf;

pub use action::Action;
pub use buf::{MsgBuf, MsgTooLarge};
pub use flow::{FlowMatch, FlowMod, FlowModCommand, FlowModFlags, FlowRemovedReason, Wildcards};
pub use header::{Header, MsgType, OFP_VERSION};
pub use message::{
    Capabilities, ErrorKind, NO_BUFFER, PacketInReason, PacketOut, PortMod, PortStatusReason,
    SwitchConfig,
};
pub use port::{PhyPort, PortConfig, PortFeatures, PortNo, PortState};

/// Default number of bytes of a table-miss packet forwarded to the controller.
pub const DEFAULT_MISS_SEND_LEN: u16 = 128;
