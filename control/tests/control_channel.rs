// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end control-channel tests: administrative dispatch, OpenFlow
//! request handling, and the forwarding scenarios driven through the
//! management transport.

#![allow(clippy::unwrap_used)]

mod rig;

use datapath::chan::envelope::{
    ATTR_DP_NAME, ATTR_MC_GROUP, ATTR_PORT_NAME, Envelope, EnvelopeBuilder, OP_ADD_DP,
    OP_ADD_PORT, OP_DEL_PORT, OP_QUERY_DP,
};
use datapath::chan::DP_NONE;
use openflow::flow::{FlowMatch, FlowModFlags, Wildcards};
use openflow::message::NO_BUFFER;
use openflow::port::{PortConfig, PortNo};
use openflow::{Action, MsgBuf, MsgType};
use pretty_assertions::assert_eq;
use rig::{Rig, ipv4_frame, PEER};

#[test]
fn hello_greets_a_new_peer_once() {
    let rig = Rig::new();
    rig.admin(EnvelopeBuilder::new(OP_QUERY_DP, 1, DP_NONE).finish());
    rig.admin(EnvelopeBuilder::new(OP_QUERY_DP, 2, DP_NONE).finish());
    let hellos: Vec<_> = rig
        .take_unicasts()
        .into_iter()
        .filter(|c| c.header.map(|h| h.msg_type) == Some(MsgType::Hello as u8))
        .collect();
    assert_eq!(hellos.len(), 1);
    assert_eq!(hellos[0].dp_idx, DP_NONE);
}

#[test]
fn unprivileged_admin_requests_are_rejected() {
    let rig = Rig::new();
    let datagram = EnvelopeBuilder::new(OP_ADD_DP, 9, 0).finish();
    rig.svc.handle_datagram(PEER, false, &datagram);
    assert_eq!(rig.ack_errno(9), errno::EPERM);
    assert!(rig.registry.get(0).is_none());
}

#[test]
fn add_query_and_delete_a_datapath() {
    let rig = Rig::new();
    rig.admin(EnvelopeBuilder::new(OP_ADD_DP, 1, 18).finish());
    assert_eq!(rig.ack_errno(1), errno::SUCCESS);

    rig.admin(EnvelopeBuilder::new(OP_QUERY_DP, 2, 18).finish());
    let replies = rig.take_unicasts();
    let reply = replies
        .iter()
        .find(|c| {
            Envelope::decode(&c.datagram).map(|e| e.op) == Ok(OP_QUERY_DP) && c.seq == 2
        })
        .unwrap();
    let env = Envelope::decode(&reply.datagram).unwrap();
    assert_eq!(env.dp_idx, 18);
    assert_eq!(env.attr_str(ATTR_DP_NAME), Some("of18"));
    // group is the index hashed into the 16 pre-allocated groups
    assert_eq!(env.attr_u32(ATTR_MC_GROUP), Some(2));

    rig.admin(EnvelopeBuilder::new(datapath::chan::envelope::OP_DEL_DP, 3, 18).finish());
    assert_eq!(rig.ack_errno(3), errno::SUCCESS);
    assert!(rig.registry.get(18).is_none());
}

#[test]
fn duplicate_datapath_is_eexist() {
    let rig = Rig::new();
    rig.admin(EnvelopeBuilder::new(OP_ADD_DP, 1, 0).finish());
    rig.admin(EnvelopeBuilder::new(OP_ADD_DP, 2, 0).finish());
    assert_eq!(rig.ack_errno(2), errno::EEXIST);
}

#[test]
fn ports_attach_and_detach_with_status_notifications() {
    let rig = Rig::with_dp(0);
    rig.provider.add("veth0", [2, 0, 0, 0, 0, 1]);
    rig.admin(
        EnvelopeBuilder::new(OP_ADD_PORT, 5, 0)
            .attr_str(ATTR_PORT_NAME, "veth0")
            .finish(),
    );
    assert_eq!(rig.ack_errno(5), errno::SUCCESS);
    let adds = rig.take_multicasts_of(MsgType::PortStatus);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].body[0], 0); // OFPPR_ADD

    rig.admin(
        EnvelopeBuilder::new(OP_DEL_PORT, 6, 0)
            .attr_str(ATTR_PORT_NAME, "veth0")
            .finish(),
    );
    assert_eq!(rig.ack_errno(6), errno::SUCCESS);
    let dels = rig.take_multicasts_of(MsgType::PortStatus);
    assert_eq!(dels.len(), 1);
    assert_eq!(dels[0].body[0], 1); // OFPPR_DELETE
}

#[test]
fn attaching_an_interface_twice_is_ebusy() {
    let rig = Rig::with_dp(0);
    rig.registry.create_dp(Some(1), None).unwrap();
    rig.provider.add("veth0", [2, 0, 0, 0, 0, 1]);
    for (seq, dp_idx) in [(1u32, 0u32), (2, 1)] {
        rig.admin(
            EnvelopeBuilder::new(OP_ADD_PORT, seq, dp_idx)
                .attr_str(ATTR_PORT_NAME, "veth0")
                .finish(),
        );
    }
    assert_eq!(rig.ack_errno(1), errno::SUCCESS);
    assert_eq!(rig.ack_errno(2), errno::EBUSY);
}

#[test]
fn features_reply_lists_local_plus_attached_ports() {
    // scenario S1: dp 0 with veth0 (02:00:00:00:00:01)
    let rig = Rig::with_dp(0);
    rig.attach("veth0", [0x02, 0, 0, 0, 0, 0x01]);
    rig.openflow(0, {
        MsgBuf::new(MsgType::FeaturesRequest, 0x55aa, 0)
    });
    let reply = rig.unicast_of(MsgType::FeaturesReply);
    assert_eq!(reply.header.unwrap().xid, 0x55aa);
    let body = &reply.body;
    let datapath_id = u64::from_be_bytes(body[0..8].try_into().unwrap());
    assert_eq!(datapath_id, 0x0200_0000_0001);
    assert_eq!(body[12], 1); // one flow table
    let ports = &body[24..];
    assert_eq!(ports.len() % 48, 0);
    let port_nos: Vec<u16> = ports
        .chunks(48)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(port_nos, vec![PortNo::LOCAL.0, 1]);
}

#[test]
fn config_set_then_get_round_trips() {
    let rig = Rig::with_dp(0);
    let mut set = MsgBuf::new(MsgType::SetConfig, 7, 4);
    set.put_u16(0x0001);
    set.put_u16(77);
    rig.openflow(0, set);
    rig.openflow(0, MsgBuf::new(MsgType::GetConfigRequest, 8, 0));
    let reply = rig.unicast_of(MsgType::GetConfigReply);
    assert_eq!(reply.header.unwrap().xid, 8);
    assert_eq!(u16::from_be_bytes([reply.body[0], reply.body[1]]), 0x0001);
    assert_eq!(u16::from_be_bytes([reply.body[2], reply.body[3]]), 77);
}

#[test]
fn echo_reply_carries_the_request_body() {
    let rig = Rig::with_dp(0);
    let mut echo = MsgBuf::new(MsgType::EchoRequest, 3, 4);
    echo.put_slice(b"ping");
    rig.openflow(0, echo);
    let reply = rig.unicast_of(MsgType::EchoReply);
    assert_eq!(reply.header.unwrap().xid, 3);
    assert_eq!(&reply.body, b"ping");
}

#[test]
fn barrier_reply_follows_earlier_replies() {
    let rig = Rig::with_dp(0);
    rig.openflow(0, MsgBuf::new(MsgType::FeaturesRequest, 1, 0));
    rig.openflow(0, MsgBuf::new(MsgType::BarrierRequest, 2, 0));
    let types: Vec<u8> = rig
        .take_unicasts()
        .into_iter()
        .filter_map(|c| c.header.map(|h| h.msg_type))
        .filter(|t| *t != MsgType::Hello as u8)
        .collect();
    assert_eq!(
        types,
        vec![MsgType::FeaturesReply as u8, MsgType::BarrierReply as u8]
    );
}

#[test]
fn old_version_elicits_hello_failed() {
    // testable property 13
    let rig = Rig::with_dp(0);
    let mut msg = MsgBuf::new(MsgType::FeaturesRequest, 5, 0).finish().unwrap();
    msg[0] = 0x00; // version below 1
    rig.raw_openflow(0, 11, &msg);
    let error = rig.unicast_of(MsgType::Error);
    assert_eq!(u16::from_be_bytes([error.body[0], error.body[1]]), 0); // HELLO_FAILED
    assert_eq!(u16::from_be_bytes([error.body[2], error.body[3]]), 0); // INCOMPATIBLE
    assert_eq!(rig.ack_errno(11), errno::EINVAL);
    // the datapath is unaffected
    assert!(rig.registry.get(0).is_some());
}

#[test]
fn unknown_message_type_is_bad_type() {
    let rig = Rig::with_dp(0);
    let mut msg = MsgBuf::new(MsgType::FeaturesRequest, 5, 0).finish().unwrap();
    msg[1] = 0x63;
    rig.raw_openflow(0, 12, &msg);
    let error = rig.unicast_of(MsgType::Error);
    assert_eq!(u16::from_be_bytes([error.body[0], error.body[1]]), 1); // BAD_REQUEST
    assert_eq!(u16::from_be_bytes([error.body[2], error.body[3]]), 1); // BAD_TYPE
    // the error echoes the offending request
    assert_eq!(&error.body[4..12], &msg[..8]);
}

#[test]
fn flow_to_controller_truncates_packet_in() {
    // scenario S2
    let rig = Rig::with_dp(0);
    rig.attach("veth0", [2, 0, 0, 0, 0, 1]);
    rig.install_flow(
        0,
        FlowMatch {
            wildcards: Wildcards(Wildcards::ALL & !Wildcards::DL_TYPE),
            dl_type: 0x0800,
            ..FlowMatch::default()
        },
        vec![Action::Output {
            port: PortNo::CONTROLLER,
            max_len: 64,
        }],
        0,
        0,
        FlowModFlags::empty(),
    );
    rig.inject(0, 1, ipv4_frame(128));
    let packet_ins = rig.take_multicasts_of(MsgType::PacketIn);
    assert_eq!(packet_ins.len(), 1);
    let body = &packet_ins[0].body;
    assert_eq!(body[8], 1); // OFPR_ACTION
    assert_eq!(u16::from_be_bytes([body[4], body[5]]), 128); // total_len
    assert_eq!(body.len() - 10, 64); // data truncated to max_len
}

#[test]
fn miss_with_zero_miss_send_len_keeps_ids_but_no_data() {
    // scenario S3
    let rig = Rig::with_dp(0);
    rig.attach("veth0", [2, 0, 0, 0, 0, 1]);
    let mut set = MsgBuf::new(MsgType::SetConfig, 1, 4);
    set.put_u16(0);
    set.put_u16(0);
    rig.openflow(0, set);
    rig.inject(0, 1, ipv4_frame(90));
    let packet_ins = rig.take_multicasts_of(MsgType::PacketIn);
    assert_eq!(packet_ins.len(), 1);
    let body = &packet_ins[0].body;
    let buffer_id = u32::from_be_bytes(body[0..4].try_into().unwrap());
    assert_ne!(buffer_id, NO_BUFFER);
    assert_eq!(body[8], 0); // OFPR_NO_MATCH
    assert_eq!(u16::from_be_bytes([body[4], body[5]]), 90);
    assert_eq!(body.len() - 10, 0);
}

#[test]
fn flood_reaches_every_other_port() {
    // scenario S4
    let rig = Rig::with_dp(0);
    let ifaces = [
        rig.attach("veth1", [2, 0, 0, 0, 0, 1]),
        rig.attach("veth2", [2, 0, 0, 0, 0, 2]),
        rig.attach("veth3", [2, 0, 0, 0, 0, 3]),
    ];
    rig.install_flow(
        0,
        FlowMatch {
            wildcards: Wildcards::all(),
            ..FlowMatch::default()
        },
        vec![Action::Output {
            port: PortNo::FLOOD,
            max_len: 0,
        }],
        0,
        0,
        FlowModFlags::empty(),
    );
    let mut broadcast = ipv4_frame(60);
    broadcast[0..6].copy_from_slice(&[0xff; 6]);
    rig.inject(0, 1, broadcast);
    assert_eq!(ifaces[0].transmit_count(), 0);
    assert_eq!(ifaces[1].transmit_count(), 1);
    assert_eq!(ifaces[2].transmit_count(), 1);
}

#[test]
fn port_mod_with_stale_mac_is_a_silent_no_op() {
    // scenario S5
    let rig = Rig::with_dp(0);
    rig.attach("veth1", [2, 0, 0, 0, 0, 1]);
    let iface2 = rig.attach("veth2", [2, 0, 0, 0, 0, 2]);
    let port = rig.registry.get(0).unwrap().lookup_port(PortNo(2)).unwrap();
    port.update_config(PortConfig::NO_FWD, PortConfig::NO_FWD);
    drop(iface2);
    rig.drain();

    let mut pm = MsgBuf::new(MsgType::PortMod, 9, 24);
    pm.put_u16(2);
    pm.put_slice(&[0xde, 0xad, 0xbe, 0xef, 0, 0]); // stale hardware address
    pm.put_u32(0); // clear NO_FWD ...
    pm.put_u32(PortConfig::NO_FWD.bits()); // ... per the mask
    pm.put_u32(0);
    pm.put_zeros(4);
    rig.raw_openflow(0, 31, &pm.finish().unwrap());

    // config unchanged, no error message, no port-status; the transport
    // still sees a non-zero result
    assert_eq!(rig.ack_errno(31), errno::EINVAL);
    assert!(port.config().contains(PortConfig::NO_FWD));
    assert!(rig.take_multicasts_of(MsgType::PortStatus).is_empty());
    let errors: Vec<_> = rig
        .take_unicasts()
        .into_iter()
        .filter(|c| c.header.map(|h| h.msg_type) == Some(MsgType::Error as u8))
        .collect();
    assert!(errors.is_empty());
}

#[test]
fn port_mod_with_current_mac_applies_and_notifies() {
    let rig = Rig::with_dp(0);
    rig.attach("veth1", [2, 0, 0, 0, 0, 1]);
    rig.drain();
    let mut pm = MsgBuf::new(MsgType::PortMod, 9, 24);
    pm.put_u16(1);
    pm.put_slice(&[2, 0, 0, 0, 0, 1]);
    pm.put_u32(PortConfig::NO_FLOOD.bits());
    pm.put_u32(PortConfig::NO_FLOOD.bits());
    pm.put_u32(0);
    pm.put_zeros(4);
    rig.raw_openflow(0, 32, &pm.finish().unwrap());
    let port = rig.registry.get(0).unwrap().lookup_port(PortNo(1)).unwrap();
    assert!(port.config().contains(PortConfig::NO_FLOOD));
    let mods = rig.take_multicasts_of(MsgType::PortStatus);
    assert_eq!(mods.len(), 1);
    assert_eq!(mods[0].body[0], 2); // OFPPR_MODIFY
}

#[test]
fn packet_out_with_inline_data_transmits() {
    let rig = Rig::with_dp(0);
    let iface = rig.attach("veth1", [2, 0, 0, 0, 0, 1]);
    let mut po = MsgBuf::new(MsgType::PacketOut, 4, 0);
    po.put_u32(NO_BUFFER);
    po.put_u16(PortNo::NONE.0);
    po.put_u16(8); // actions_len
    Action::Output {
        port: PortNo(1),
        max_len: 0,
    }
    .encode(po.body_mut());
    po.put_slice(&ipv4_frame(60));
    rig.openflow(0, po);
    assert_eq!(iface.transmit_count(), 1);
}

#[test]
fn packet_out_numerically_to_its_ingress_port_is_dropped() {
    // testable property 6
    let rig = Rig::with_dp(0);
    let iface = rig.attach("veth1", [2, 0, 0, 0, 0, 1]);
    let mut po = MsgBuf::new(MsgType::PacketOut, 4, 0);
    po.put_u32(NO_BUFFER);
    po.put_u16(1); // claims ingress port 1
    po.put_u16(8);
    Action::Output {
        port: PortNo(1),
        max_len: 0,
    }
    .encode(po.body_mut());
    po.put_slice(&ipv4_frame(60));
    rig.openflow(0, po);
    assert_eq!(iface.transmit_count(), 0);
}

#[test]
fn packet_out_to_table_runs_the_pipeline() {
    let rig = Rig::with_dp(0);
    rig.attach("veth1", [2, 0, 0, 0, 0, 1]);
    rig.drain();
    let mut po = MsgBuf::new(MsgType::PacketOut, 4, 0);
    po.put_u32(NO_BUFFER);
    po.put_u16(1);
    po.put_u16(8);
    Action::Output {
        port: PortNo::TABLE,
        max_len: 0,
    }
    .encode(po.body_mut());
    po.put_slice(&ipv4_frame(60));
    rig.openflow(0, po);
    // no flows installed: the re-injected frame misses to the controller
    let packet_ins = rig.take_multicasts_of(MsgType::PacketIn);
    assert_eq!(packet_ins.len(), 1);
    assert_eq!(u16::from_be_bytes([packet_ins[0].body[6], packet_ins[0].body[7]]), 1);
}

#[test]
fn flow_removed_after_idle_timeout_with_one_packet() {
    // scenario S6: install idle_timeout=1s + send_flow_rem, hit it once,
    // then let the maintenance worker reap it
    let rig = Rig::with_dp(0);
    rig.attach("veth0", [2, 0, 0, 0, 0, 1]);
    rig.install_flow(
        0,
        FlowMatch {
            wildcards: Wildcards::all(),
            ..FlowMatch::default()
        },
        vec![Action::Output {
            port: PortNo::LOCAL,
            max_len: 0,
        }],
        1, // idle_timeout
        0,
        FlowModFlags::SEND_FLOW_REM,
    );
    rig.inject(0, 1, ipv4_frame(60));
    rig.drain();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let removed = loop {
        let msgs = rig.take_multicasts_of(MsgType::FlowRemoved);
        if !msgs.is_empty() {
            break msgs;
        }
        assert!(std::time::Instant::now() < deadline, "no flow-removed within 5s");
        std::thread::sleep(std::time::Duration::from_millis(200));
    };
    assert_eq!(removed.len(), 1);
    let body = &removed[0].body;
    // match(40) + cookie(8) + priority(2) precede the reason byte
    assert_eq!(body[50], 0); // OFPRR_IDLE_TIMEOUT
    let packet_count = u64::from_be_bytes(body[64..72].try_into().unwrap());
    assert_eq!(packet_count, 1);
}

#[test]
fn emergency_and_quiet_flows_are_not_reported() {
    let rig = Rig::with_dp(0);
    rig.attach("veth0", [2, 0, 0, 0, 0, 1]);
    // no SEND_FLOW_REM flag
    rig.install_flow(
        0,
        FlowMatch {
            wildcards: Wildcards::all(),
            ..FlowMatch::default()
        },
        vec![],
        1,
        0,
        FlowModFlags::empty(),
    );
    // emergency flow with the flag set
    rig.install_flow(
        0,
        FlowMatch {
            wildcards: Wildcards(Wildcards::ALL & !Wildcards::DL_TYPE),
            dl_type: 0x86dd,
            ..FlowMatch::default()
        },
        vec![],
        1,
        0,
        FlowModFlags::SEND_FLOW_REM | FlowModFlags::EMERG,
    );
    rig.drain();
    let pipeline = rig.factory.get(0).unwrap();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while pipeline.flow_count() > 0 {
        assert!(std::time::Instant::now() < deadline, "flows not expired within 5s");
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    assert!(rig.take_multicasts_of(MsgType::FlowRemoved).is_empty());
}
