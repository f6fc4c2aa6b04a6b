// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Connection reporting: periodic stats syncs and the final records of
//! destroyed and flushed connections.

use std::time::Duration;
use std::time::Instant;

use sfe::provider::ExecCtx;
use sfe_test_utils::*;

fn setup() -> (Sfe6, Arc<SyncRecorder>) {
    let (sfe, _log) = test_engine(Sfe6Config::default());
    let rec = Arc::new(SyncRecorder::default());
    sfe.set_sync_callback(Some(rec.clone()));
    (sfe, rec)
}

fn client_pkt(port: u16) -> Vec<u8> {
    udp6(CLIENT_IP, SERVER_IP, port, SERVER_PORT, &[0; 52])
}

fn server_pkt() -> Vec<u8> {
    udp6(SERVER_IP, PUBLIC_IP, SERVER_PORT, PUBLIC_PORT, &[0; 12])
}

#[test]
fn only_active_connections_are_synced() {
    let (sfe, rec) = setup();
    let a = snat_conn(Protocol::UDP);
    let b = with_client_port(&a, 5555);
    sfe.create_connection(&a).unwrap();
    sfe.create_connection(&b).unwrap();

    let pkt = client_pkt(CLIENT_PORT);
    for _ in 0..3 {
        expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));
    }

    assert_eq!(sfe.sync_now(), 1);
    let recs = rec.take();
    assert_eq!(recs.len(), 1);
    let r = &recs[0];
    assert_eq!(r.reason, SyncReason::Stats);
    assert_eq!(r.src_port, CLIENT_PORT);
    assert_eq!(r.src.new_packets, 3);
    assert_eq!(r.src.new_bytes, 3 * pkt.len() as u32);
    assert_eq!(r.src.dev, LAN_IFINDEX);
    assert_eq!(r.dest.new_packets, 0);
    assert_eq!(r.dest.dev, WAN_IFINDEX);

    // Nothing happened since.
    assert_eq!(sfe.sync_now(), 0);
    assert_eq!(sfe.active_len(), 0);
}

#[test]
fn both_directions_report_once() {
    let (sfe, rec) = setup();
    sfe.create_connection(&snat_conn(Protocol::UDP)).unwrap();

    let out = client_pkt(CLIENT_PORT);
    let back = server_pkt();
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&out)));
    expect_forward(sfe.process_packet(&wan(), RxPacket::new(&back)));
    assert_eq!(sfe.active_len(), 2);

    sfe.sync_now();
    let recs = rec.take();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].src.new_packets, 1);
    assert_eq!(recs[0].dest.new_packets, 1);
    assert_eq!(recs[0].dest.new_bytes, back.len() as u32);
}

#[test]
fn counters_are_deltas_totals_accumulate() {
    let (sfe, rec) = setup();
    let req = snat_conn(Protocol::UDP);
    sfe.create_connection(&req).unwrap();
    let pkt = client_pkt(CLIENT_PORT);
    let len = pkt.len() as u32;

    let mut total = 0u32;
    for n in [1u32, 4, 0, 2, 3] {
        for _ in 0..n {
            expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));
        }
        total += n;

        let synced = sfe.sync_now();
        let recs = rec.take();
        if n == 0 {
            assert_eq!(synced, 0);
            assert!(recs.is_empty());
            continue;
        }

        assert_eq!(synced, 1);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].src.new_packets, n);
        assert_eq!(recs[0].src.new_bytes, n * len);
        assert_eq!(recs[0].src.packets_total, u64::from(total));
        assert_eq!(recs[0].src.bytes_total, u64::from(total * len));
    }

    // The last sync left nothing pending: the final record carries the
    // totals and empty period counters.
    assert_eq!(sfe.destroy_connection(&req.key()), DestroyResult::Destroyed);
    let recs = rec.take();
    assert_eq!(recs.len(), 1);
    let last = &recs[0].src;
    assert_eq!((last.new_packets, last.new_bytes), (0, 0));
    assert_eq!(last.packets_total, u64::from(total));
    assert_eq!(last.bytes_total, u64::from(total * len));
    assert_eq!(recs[0].dest.new_packets, 0);
}

#[test]
fn destroy_reports_final_counts() {
    let (sfe, rec) = setup();
    let req = snat_conn(Protocol::UDP);
    sfe.create_connection(&req).unwrap();
    let pkt = client_pkt(CLIENT_PORT);
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));

    assert_eq!(sfe.destroy_connection(&req.key()), DestroyResult::Destroyed);
    let recs = rec.take();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].reason, SyncReason::Destroy);
    assert_eq!(recs[0].src.new_packets, 1);

    // The pending activity went with the connection.
    assert_eq!(sfe.active_len(), 0);
    assert_eq!(sfe.sync_now(), 0);
}

#[test]
fn mark_rides_along_in_records() {
    let (sfe, rec) = setup();
    let req = snat_conn(Protocol::UDP);
    sfe.create_connection(&req).unwrap();
    sfe.mark_connection(&req.key(), 0x7).unwrap();

    let pkt = client_pkt(CLIENT_PORT);
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));
    assert_eq!(sfe.sync_now(), 1);
    assert_eq!(rec.take()[0].mark, 0x7);

    sfe.mark_connection(&req.key(), 0x9).unwrap();
    assert_eq!(sfe.destroy_connection(&req.key()), DestroyResult::Destroyed);
    assert_eq!(rec.take()[0].mark, 0x9);
}

#[test]
fn removing_the_callback_stops_delivery() {
    let (sfe, rec) = setup();
    sfe.create_connection(&snat_conn(Protocol::UDP)).unwrap();
    let pkt = client_pkt(CLIENT_PORT);
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));

    sfe.set_sync_callback(None);
    assert_eq!(sfe.sync_now(), 1);
    assert_eq!(rec.len(), 0);
}

#[test]
fn shutdown_reports_every_connection() {
    let (sfe, rec) = setup();
    let req = snat_conn(Protocol::UDP);
    for port in 1..=4 {
        sfe.create_connection(&with_client_port(&req, port)).unwrap();
    }

    sfe.shutdown();
    assert_eq!(sfe.num_connections(), 0);
    assert_eq!(rec.with_reason(SyncReason::Destroy).len(), 4);
}

#[test]
fn timer_delivers_stats() {
    let log = Arc::new(MemLog::default());
    let ectx = Arc::new(ExecCtx { log: Box::new(log.clone()) });
    let cfg = Sfe6Config { sync_interval_ms: 5, ..Default::default() };
    let sfe = Sfe6::new(cfg, ectx).unwrap();
    let rec = Arc::new(SyncRecorder::default());
    sfe.set_sync_callback(Some(rec.clone()));

    sfe.create_connection(&snat_conn(Protocol::UDP)).unwrap();
    let pkt = client_pkt(CLIENT_PORT);
    expect_forward(sfe.process_packet(&lan(), RxPacket::new(&pkt)));

    let deadline = Instant::now() + Duration::from_secs(5);
    while rec.with_reason(SyncReason::Stats).is_empty() {
        assert!(Instant::now() < deadline, "timer never synced");
        std::thread::sleep(Duration::from_millis(5));
    }

    let recs = rec.with_reason(SyncReason::Stats);
    assert_eq!(recs[0].src.new_packets, 1);
}
