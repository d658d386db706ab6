// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Inbound OpenFlow request handling.
//!
//! Requests the engine itself answers (echo, features, config, packet-out,
//! port-mod, statistics, barrier) are handled here; flow-table messages are
//! forwarded to the pipeline.  Version and length are validated up front,
//! and every failure both sends an OpenFlow error to the requester and
//! surfaces an errno to the transport.

use crate::service::ControlService;
use crate::stats::{StatsDump, StatsError, run_dump};
use concurrency::sync::Arc;
use datapath::chan::{self, Sender};
use datapath::frame::Frame;
use datapath::Datapath;
use errno::DpErrno;
use openflow::message::{ErrorKind, PacketOut, PortMod, PortStatusReason, SwitchConfig};
use openflow::port::PortNo;
use openflow::wire::Reader;
use openflow::{Header, MsgType, NO_BUFFER, OFP_VERSION};
use tracing::debug;

/// Handle one OpenFlow payload addressed to `dp`.
///
/// # Errors
///
/// Returns the errno the transport acknowledges the request with.
pub fn handle(
    svc: &ControlService,
    dp: &Arc<Datapath>,
    sender: &Sender,
    payload: &[u8],
) -> Result<(), DpErrno> {
    let mut r = Reader::new(payload);
    let Ok(header) = Header::decode(&mut r) else {
        return Err(DpErrno::Invalid);
    };
    if header.version < OFP_VERSION {
        chan::send_error(dp, sender, ErrorKind::HelloIncompatible, payload);
        return Err(DpErrno::Invalid);
    }
    if header.length as usize != payload.len() {
        chan::send_error(dp, sender, ErrorKind::BadLen, payload);
        return Err(DpErrno::Invalid);
    }
    let body = r.take_rest();

    match header.typ() {
        Ok(MsgType::Hello | MsgType::EchoReply) => Ok(()),
        Ok(MsgType::EchoRequest) => chan::send_echo_reply(dp, sender, body),
        Ok(MsgType::FeaturesRequest) => chan::send_features_reply(dp, sender),
        Ok(MsgType::GetConfigRequest) => chan::send_config_reply(dp, sender),
        Ok(MsgType::SetConfig) => {
            let Ok(config) = SwitchConfig::decode(body) else {
                chan::send_error(dp, sender, ErrorKind::BadLen, payload);
                return Err(DpErrno::Invalid);
            };
            dp.set_config(config.flags, config.miss_send_len);
            Ok(())
        }
        Ok(MsgType::PacketOut) => packet_out(dp, sender, payload, body),
        Ok(MsgType::PortMod) => port_mod(dp, sender, payload, body),
        Ok(MsgType::StatsRequest) => stats_request(svc, dp, sender, payload, body),
        Ok(MsgType::BarrierRequest) => chan::send_barrier_reply(dp, sender),
        Ok(MsgType::Vendor) => {
            chan::send_error(dp, sender, ErrorKind::BadVendor, payload);
            Err(DpErrno::Invalid)
        }
        // flow-table territory
        Ok(MsgType::FlowMod) => dp.pipeline().handle_openflow(dp, sender, &header, body),
        // replies and notifications have no business arriving here,
        // and neither do unknown type bytes
        Ok(
            MsgType::Error
            | MsgType::FeaturesReply
            | MsgType::GetConfigReply
            | MsgType::PacketIn
            | MsgType::FlowRemoved
            | MsgType::PortStatus
            | MsgType::StatsReply
            | MsgType::BarrierReply,
        )
        | Err(_) => {
            chan::send_error(dp, sender, ErrorKind::BadType, payload);
            Err(DpErrno::Invalid)
        }
    }
}

fn packet_out(
    dp: &Arc<Datapath>,
    sender: &Sender,
    payload: &[u8],
    body: &[u8],
) -> Result<(), DpErrno> {
    let po = match PacketOut::decode(body) {
        Ok(po) => po,
        Err(e) => {
            debug!("dp{}: malformed packet-out: {e}", dp.dp_idx());
            chan::send_error(dp, sender, ErrorKind::BadLen, payload);
            return Err(DpErrno::Invalid);
        }
    };
    let data = if po.buffer_id == NO_BUFFER {
        if po.data.is_empty() {
            chan::send_error(dp, sender, ErrorKind::BufferEmpty, payload);
            return Err(DpErrno::Invalid);
        }
        po.data
    } else {
        match dp.pool().retrieve(po.buffer_id) {
            Some(frame) => frame.bytes().to_vec(),
            None => {
                chan::send_error(dp, sender, ErrorKind::BufferUnknown, payload);
                return Err(DpErrno::Invalid);
            }
        }
    };
    let mut frame = Frame::new(data);
    if po.in_port != PortNo::NONE {
        frame.set_in_port(Some(po.in_port));
    }
    dp.pipeline().execute_actions(dp, frame, &po.actions);
    Ok(())
}

fn port_mod(
    dp: &Arc<Datapath>,
    sender: &Sender,
    payload: &[u8],
    body: &[u8],
) -> Result<(), DpErrno> {
    let Ok(pm) = PortMod::decode(body) else {
        chan::send_error(dp, sender, ErrorKind::BadLen, payload);
        return Err(DpErrno::Invalid);
    };
    match dp.apply_port_mod(&pm) {
        Ok(true) => {
            if let Some(port) = dp.lookup_port(pm.port_no) {
                chan::send_port_status(dp, PortStatusReason::Modify, &port);
            }
            Ok(())
        }
        // stale hardware address: skipped without an error message, the
        // request still fails on the transport
        Ok(false) => Err(DpErrno::Invalid),
        Err(e) => {
            chan::send_error(dp, sender, ErrorKind::PortModBadPort, payload);
            Err(e)
        }
    }
}

fn stats_request(
    svc: &ControlService,
    dp: &Arc<Datapath>,
    sender: &Sender,
    payload: &[u8],
    body: &[u8],
) -> Result<(), DpErrno> {
    let mut r = Reader::new(body);
    let (Ok(stats_type), Ok(_flags)) = (r.take_u16(), r.take_u16()) else {
        chan::send_error(dp, sender, ErrorKind::BadLen, payload);
        return Err(DpErrno::Invalid);
    };
    let request_body = r.take_rest();
    let mut dump = match StatsDump::new(dp, svc.vendor_stats(), sender.xid, stats_type, request_body)
    {
        Ok(dump) => dump,
        Err(e @ StatsError::BadStat(_)) => {
            debug!("dp{}: {e}", dp.dp_idx());
            chan::send_error(dp, sender, ErrorKind::BadStat, payload);
            return Err(DpErrno::Invalid);
        }
        Err(e @ StatsError::BadVendor(_)) => {
            debug!("dp{}: {e}", dp.dp_idx());
            chan::send_error(dp, sender, ErrorKind::BadVendor, payload);
            return Err(DpErrno::Invalid);
        }
        Err(StatsError::BadRequest) => {
            chan::send_error(dp, sender, ErrorKind::BadLen, payload);
            return Err(DpErrno::Invalid);
        }
    };
    run_dump(svc.registry(), &mut dump, sender).inspect_err(|e| {
        debug!("dp{}: dump failed: {e}", dp.dp_idx());
    })
}
