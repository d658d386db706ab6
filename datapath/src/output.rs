// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The forwarding engine: interpretation of OpenFlow output port numbers.

use crate::chan;
use crate::dp::Datapath;
use crate::frame::Frame;
use crate::iface::TransmitError;
use crate::port::Port;
use concurrency::sync::Arc;
use errno::DpErrno;
use openflow::message::PacketInReason;
use openflow::port::{PortConfig, PortNo};
use tracing::debug;

/// Ways an output can fail.  The frame is released on every one of them.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Numeric output named the frame's own ingress port (use `IN_PORT`).
    #[error("numeric output to the ingress port")]
    LoopToIngress,
    /// `IN_PORT` output on a frame with no known ingress.
    #[error("IN_PORT output without an ingress port")]
    NoIngress,
    /// `TABLE` output on a frame with no known ingress.
    #[error("TABLE output without an ingress port")]
    NoIngressForTable,
    /// No port in the named slot.
    #[error("no such port {0}")]
    UnknownPort(PortNo),
    /// The port's `NO_FWD` bit is set.
    #[error("forwarding disabled on port {0}")]
    ForwardingDisabled(PortNo),
    /// Frame larger than the egress MTU.
    #[error("frame of {len} payload bytes exceeds mtu {mtu}")]
    TooBig {
        /// MTU-relevant payload length.
        len: usize,
        /// Egress interface MTU.
        mtu: usize,
    },
    /// Legacy `NORMAL` processing is not implemented.
    #[error("NORMAL processing not supported")]
    Unsupported,
    /// The interface refused the frame.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
}

impl OutputError {
    /// The errno this failure surfaces as.
    #[must_use]
    pub fn errno(&self) -> DpErrno {
        match self {
            OutputError::LoopToIngress
            | OutputError::NoIngress
            | OutputError::NoIngressForTable
            | OutputError::Unsupported => DpErrno::Invalid,
            OutputError::UnknownPort(_) => DpErrno::NotFound,
            OutputError::ForwardingDisabled(_) => DpErrno::PermissionDenied,
            OutputError::TooBig { .. } => DpErrno::TooBig,
            OutputError::Transmit(_) => DpErrno::NoDevice,
        }
    }
}

/// Send `frame` out `out_port`, interpreting the reserved port values.
///
/// The engine owns the frame from here: every path either hands it to an
/// interface, re-injects it into the pipeline, escalates it, or drops it.
///
/// # Errors
///
/// Returns [`OutputError`]; the frame has been released when it does.
pub fn output(
    dp: &Arc<Datapath>,
    frame: Frame,
    out_port: PortNo,
    ignore_no_fwd: bool,
) -> Result<(), OutputError> {
    match out_port {
        PortNo::IN_PORT => {
            let Some(in_port) = frame.in_port() else {
                return Err(OutputError::NoIngress);
            };
            transmit_on(dp, frame, in_port, ignore_no_fwd, true)
        }
        PortNo::TABLE => {
            if frame.in_port().is_none() {
                return Err(OutputError::NoIngressForTable);
            }
            dp.pipeline().process_frame(dp, frame);
            Ok(())
        }
        PortNo::FLOOD => fan_out(dp, frame, true),
        PortNo::ALL => fan_out(dp, frame, false),
        PortNo::CONTROLLER => {
            // a direct controller output carries the whole frame; truncation
            // only applies through a flow's output action
            chan::output_control(dp, frame, u16::MAX, PacketInReason::Action);
            Ok(())
        }
        PortNo::LOCAL => xmit(dp.local_port(), frame),
        PortNo::NORMAL => Err(OutputError::Unsupported),
        numeric => {
            if frame.in_port() == Some(numeric) {
                return Err(OutputError::LoopToIngress);
            }
            transmit_on(dp, frame, numeric, ignore_no_fwd, false)
        }
    }
}

/// Transmit on a numeric port, enforcing `NO_FWD` unless waived.
fn transmit_on(
    dp: &Arc<Datapath>,
    frame: Frame,
    port_no: PortNo,
    ignore_no_fwd: bool,
    via_in_port: bool,
) -> Result<(), OutputError> {
    let Some(port) = dp.ports().get(port_no) else {
        return Err(OutputError::UnknownPort(port_no));
    };
    if !ignore_no_fwd && !via_in_port && port.config().contains(PortConfig::NO_FWD) {
        port.counters().count_tx_dropped();
        return Err(OutputError::ForwardingDisabled(port_no));
    }
    xmit(&port, frame)
}

/// MTU-checked transmit on one port, with counter upkeep.
fn xmit(port: &Arc<Port>, frame: Frame) -> Result<(), OutputError> {
    let mtu = port.iface().mtu();
    let len = frame.mtu_len();
    if len > mtu {
        port.counters().count_tx_dropped();
        return Err(OutputError::TooBig { len, mtu });
    }
    let bytes = frame.len();
    match port.iface().transmit(frame) {
        Ok(()) => {
            port.counters().count_tx(bytes);
            Ok(())
        }
        Err(e) => {
            port.counters().count_tx_error();
            Err(OutputError::Transmit(e))
        }
    }
}

/// FLOOD / ALL: transmit on every attached port except the ingress, cloning
/// the frame for all but the last selection.
fn fan_out(dp: &Arc<Datapath>, frame: Frame, skip_no_flood: bool) -> Result<(), OutputError> {
    let in_port = frame.in_port();
    let eligible: Vec<Arc<Port>> = dp
        .ports()
        .physical_ports()
        .into_iter()
        .filter(|p| Some(p.port_no()) != in_port)
        .filter(|p| !(skip_no_flood && p.config().contains(PortConfig::NO_FLOOD)))
        .collect();

    let Some((last, rest)) = eligible.split_last() else {
        // nothing to send on; the frame is simply released
        return Ok(());
    };
    for port in rest {
        if let Err(e) = xmit(port, frame.clone()) {
            debug!(
                "dp{}: fan-out transmit on port {} failed: {e}",
                dp.dp_idx(),
                port.port_no()
            );
        }
    }
    // the original frame goes out on the last selected port
    if let Err(e) = xmit(last, frame) {
        debug!(
            "dp{}: fan-out transmit on port {} failed: {e}",
            dp.dp_idx(),
            last.port_no()
        );
    }
    Ok(())
}
