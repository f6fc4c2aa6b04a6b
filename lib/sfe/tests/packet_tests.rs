// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet path tests: IPv6 sanity checks, UDP forwarding and ICMPv6
//! error handling, driven through [`Sfe6::process_packet`].

use sfe::api::StatsSnap;
use sfe::engine::L2Rewrite;
use sfe::engine::headers::ICMP6_DST_UNREACH;
use sfe::engine::headers::IPV6_EXT_FRAGMENT;
use sfe::engine::headers::IPV6_EXT_HOP_BY_HOP;
use sfe_test_utils::*;

const ROUTER_IP: Ipv6Addr =
    Ipv6Addr::from_const([0x2001, 0xdb8, 0xff, 0, 0, 0, 0, 1]);

fn setup(req: &ConnectionCreate) -> (Sfe6, Arc<SyncRecorder>) {
    let (sfe, _log) = test_engine(Sfe6Config::default());
    let rec = Arc::new(SyncRecorder::default());
    sfe.set_sync_callback(Some(rec.clone()));
    sfe.create_connection(req).unwrap();
    (sfe, rec)
}

fn client_udp(payload: usize) -> Vec<u8> {
    udp6(CLIENT_IP, SERVER_IP, CLIENT_PORT, SERVER_PORT, &vec![7; payload])
}

fn stats(sfe: &Sfe6) -> StatsSnap {
    sfe.stats_snap()
}

#[test]
fn udp_snat_original_direction() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let mut pkt = client_udp(100);
    let fwd = expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));
    assert_eq!(fwd.xmit_dev.ifindex, WAN_IFINDEX);
    assert_eq!(fwd.mtu, 1500);
    assert_eq!(
        fwd.l2,
        Some(L2Rewrite { src: WAN_MAC, dst: GW_MAC, fast_eth: true })
    );

    fwd.apply(&mut pkt).unwrap();
    assert_eq!(src_of(&pkt), (PUBLIC_IP, PUBLIC_PORT));
    assert_eq!(dst_of(&pkt), (SERVER_IP, SERVER_PORT));
    assert_eq!(hop_limit(&pkt), DEFAULT_HOP_LIMIT - 1);
    assert!(l4_csum_ok(&pkt));

    let s = stats(&sfe);
    assert_eq!(s.packets_forwarded, 1);
    assert_eq!(s.packets_not_forwarded, 0);

    let dump = sfe.find_connection(&req.key()).unwrap();
    assert_eq!(dump.src.rx_packets, 1);
    assert_eq!(dump.src.rx_bytes, pkt.len() as u64);
    assert_eq!(dump.dest.rx_packets, 0);
}

#[test]
fn udp_snat_reply_direction() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let mut pkt =
        udp6(SERVER_IP, PUBLIC_IP, SERVER_PORT, PUBLIC_PORT, &[1; 20]);
    let fwd = expect_forward(sfe.process_packet(&wan(), RxPacket::new(&pkt)));
    assert_eq!(fwd.xmit_dev.ifindex, LAN_IFINDEX);
    assert_eq!(
        fwd.l2,
        Some(L2Rewrite { src: LAN_MAC, dst: CLIENT_MAC, fast_eth: true })
    );

    fwd.apply(&mut pkt).unwrap();
    assert_eq!(src_of(&pkt), (SERVER_IP, SERVER_PORT));
    assert_eq!(dst_of(&pkt), (CLIENT_IP, CLIENT_PORT));
    assert!(l4_csum_ok(&pkt));
}

#[test]
fn wrong_device_misses() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    // The original direction is only matched arriving on the LAN.
    let pkt = client_udp(10);
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&pkt)),
        ExceptionEvent::UdpNoConnection,
    );
    assert_eq!(stats(&sfe).packets_not_forwarded, 1);
    assert_eq!(sfe.num_connections(), 1);
}

#[test]
fn small_hop_limit_flushes() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, rec) = setup(&req);

    let mut pkt = client_udp(10);
    set_hop_limit(&mut pkt, 1);
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&pkt)),
        ExceptionEvent::UdpSmallTtl,
    );

    assert_eq!(sfe.num_connections(), 0);
    let flushed = rec.with_reason(SyncReason::Flush);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].src_ip, CLIENT_IP);
    assert_eq!(flushed[0].src_ip_xlate, PUBLIC_IP);

    let s = stats(&sfe);
    assert_eq!(s.connection_flushes, 1);
    assert_eq!(s.exception(ExceptionEvent::UdpSmallTtl), 1);
    sfe.validate();
}

#[test]
fn extension_header_flushes() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let pkt = with_dest_opts(&client_udp(10));
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&pkt)),
        ExceptionEvent::UdpIpOptionsOrInitialFragment,
    );
    assert_eq!(sfe.num_connections(), 0);
}

#[test]
fn initial_fragment_flushes_but_later_fragments_do_not() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let later = insert_ext_hdr(&client_udp(10), IPV6_EXT_FRAGMENT, 185);
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&later)),
        ExceptionEvent::NonInitialFragment,
    );
    assert_eq!(sfe.num_connections(), 1);

    let first = insert_ext_hdr(&client_udp(10), IPV6_EXT_FRAGMENT, 0);
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&first)),
        ExceptionEvent::UdpIpOptionsOrInitialFragment,
    );
    assert_eq!(sfe.num_connections(), 0);
}

#[test]
fn oversized_needs_fragmentation_unless_gso() {
    let req = ConnectionCreate { dest_mtu: 100, ..snat_conn(Protocol::UDP) };
    let (sfe, _) = setup(&req);

    // 40 + 8 + 52 fits exactly ...
    let pkt = client_udp(52);
    assert_eq!(pkt.len(), 100);
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));

    // ... unless it is a GSO super-frame, one byte more does not.
    let pkt = client_udp(53);
    let rx = RxPacket { gso: true, ..RxPacket::new(&pkt) };
    expect_forward(sfe.process_packet(&lan(), rx));

    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&pkt)),
        ExceptionEvent::UdpNeedsFragmentation,
    );
    assert_eq!(sfe.num_connections(), 0);
}

#[test]
fn trailing_bytes_are_not_charged() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let pkt = client_udp(20);
    let dgram_len = pkt.len();
    let mut padded = pkt.clone();
    padded.extend_from_slice(&[0; 16]);

    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&padded)));
    let dump = sfe.find_connection(&req.key()).unwrap();
    assert_eq!(dump.src.rx_bytes, dgram_len as u64);
}

#[test]
fn ipv6_sanity_checks() {
    let (sfe, _) = test_engine(Sfe6Config::default());
    let pkt = client_udp(10);

    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&pkt[..47])),
        ExceptionEvent::HeaderIncomplete,
    );

    let mut v4 = pkt.clone();
    v4[0] = 0x45;
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&v4)),
        ExceptionEvent::NonV6,
    );

    let mut long = pkt.clone();
    long[4..6].copy_from_slice(&1000u16.to_be_bytes());
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&long)),
        ExceptionEvent::BadTotalLength,
    );

    let mut other = pkt.clone();
    other[6] = 47;
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&other)),
        ExceptionEvent::UnhandledProtocol,
    );

    // A hop-by-hop header which claims more than the packet holds.
    let mut hbh = insert_ext_hdr(&pkt, IPV6_EXT_HOP_BY_HOP, 0);
    hbh[41] = 10;
    expect_exception(
        sfe.process_packet(&lan(), RxPacket::new(&hbh)),
        ExceptionEvent::IpOptionsIncomplete,
    );

    let s = stats(&sfe);
    assert_eq!(s.packets_not_forwarded, 5);
    assert_eq!(s.packets_forwarded, 0);
}

#[test]
fn icmp_error_flushes_connection() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, rec) = setup(&req);

    // The translated packet as it left for the server, quoted back to
    // us by a router on the way.
    let quoted =
        udp6(PUBLIC_IP, SERVER_IP, PUBLIC_PORT, SERVER_PORT, &[0; 32]);
    let err = icmp6_error(ROUTER_IP, PUBLIC_IP, ICMP6_DST_UNREACH, &quoted);
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&err)),
        ExceptionEvent::IcmpFlushedConnection,
    );

    assert_eq!(sfe.num_connections(), 0);
    assert_eq!(rec.with_reason(SyncReason::Flush).len(), 1);

    // Now there's nothing left to flush.
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&err)),
        ExceptionEvent::IcmpNoConnection,
    );
}

#[test]
fn icmp_non_error_types_are_ignored() {
    let req = snat_conn(Protocol::UDP);
    let (sfe, _) = setup(&req);

    let quoted =
        udp6(PUBLIC_IP, SERVER_IP, PUBLIC_PORT, SERVER_PORT, &[0; 32]);
    // Echo request.
    let echo = icmp6_error(ROUTER_IP, PUBLIC_IP, 128, &quoted);
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&echo)),
        ExceptionEvent::IcmpUnhandledType,
    );
    assert_eq!(sfe.num_connections(), 1);
}

#[test]
fn icmp_truncated_quote() {
    let (sfe, _) = test_engine(Sfe6Config::default());

    let quoted =
        udp6(PUBLIC_IP, SERVER_IP, PUBLIC_PORT, SERVER_PORT, &[0; 32]);

    let unreach = |quote: &[u8]| {
        icmp6_error(ROUTER_IP, PUBLIC_IP, ICMP6_DST_UNREACH, quote)
    };

    let err = unreach(&quoted[..30]);
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&err)),
        ExceptionEvent::IcmpIpv6HeaderIncomplete,
    );

    let err = unreach(&quoted[..44]);
    expect_exception(
        sfe.process_packet(&wan(), RxPacket::new(&err)),
        ExceptionEvent::IcmpIpv6UdpHeaderIncomplete,
    );
}

#[test]
fn device_flush_only_touches_that_device() {
    let (sfe, _) = test_engine(Sfe6Config::default());
    let rec = Arc::new(SyncRecorder::default());
    sfe.set_sync_callback(Some(rec.clone()));

    let a = snat_conn(Protocol::UDP);
    let dmz =
        Arc::new(NetDev::new(9, "dmz0", MacAddr::ZERO, LinkKind::Ethernet));
    let b = ConnectionCreate {
        src_dev: dmz.clone(),
        dest_dev: dmz.clone(),
        ..with_client_port(&a, 1234)
    };
    sfe.create_connection(&a).unwrap();
    sfe.create_connection(&b).unwrap();

    assert_eq!(sfe.flush_device(&lan()), 1);
    assert_eq!(sfe.num_connections(), 1);
    assert!(sfe.find_connection(&b.key()).is_some());
    let destroyed = rec.with_reason(SyncReason::Destroy);
    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].src_port, CLIENT_PORT);
    sfe.validate();
}
