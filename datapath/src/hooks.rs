// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lifecycle observer for satellite modules.
//!
//! A single subscriber may register on the registry and is called after the
//! corresponding event has completed (the datapath or port is already
//! published or already gone).

use crate::dp::Datapath;
use crate::port::Port;
use concurrency::sync::Arc;

/// Callbacks fired after datapath and port lifecycle events.
pub trait DatapathHooks: Send + Sync {
    /// A datapath finished creation.
    fn dp_added(&self, _dp: &Arc<Datapath>) {}

    /// A datapath finished destruction.
    fn dp_removed(&self, _dp: &Arc<Datapath>) {}

    /// A port finished attaching.
    fn port_added(&self, _dp: &Arc<Datapath>, _port: &Arc<Port>) {}

    /// A port finished detaching.
    fn port_removed(&self, _dp: &Arc<Datapath>, _port: &Arc<Port>) {}
}
