// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packets, connection churn and syncs racing each other.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use sfe::engine::L2Rewrite;
use sfe_test_utils::*;

const PORTS: u16 = 32;
const SENDERS: usize = 4;
const PKTS_PER_SENDER: usize = 2000;

#[test]
fn churn_under_traffic() {
    let (sfe, _log) = test_engine(Sfe6Config::default());
    let sfe = Arc::new(sfe);
    let rec = Arc::new(SyncRecorder::default());
    sfe.set_sync_callback(Some(rec.clone()));

    let base = snat_conn(Protocol::TCP);
    let base = ConnectionCreate { flags: CreateFlags::NO_SEQ_CHECK, ..base };

    let forwarded = thread::scope(|s| {
        let senders: Vec<_> = (0..SENDERS)
            .map(|i| {
                let sfe = &sfe;
                s.spawn(move || {
                    let mut fwd = 0u64;
                    for n in 0..PKTS_PER_SENDER {
                        let port = ((n + i) % PORTS as usize) as u16 + 1;
                        let seg = TcpSeg::ack(n as u32, 0);
                        let pkt =
                            tcp6(CLIENT_IP, SERVER_IP, port, SERVER_PORT, &seg);
                        let res =
                            sfe.process_packet(&lan(), RxPacket::new(&pkt));
                        match res {
                            ProcessResult::Forward(_) => fwd += 1,
                            ProcessResult::Exception(ev) => assert_eq!(
                                ev,
                                ExceptionEvent::TcpNoConnectionFastFlags
                            ),
                        }
                    }
                    fwd
                })
            })
            .collect();

        s.spawn(|| {
            for round in 0..200u16 {
                let port = round % PORTS + 1;
                let req = with_client_port(&base, port);
                if round % 3 == 0 {
                    let _ = sfe.destroy_connection(&req.key());
                } else {
                    let _ = sfe.create_connection(&req);
                }
            }
        });

        s.spawn(|| {
            for _ in 0..50 {
                sfe.sync_now();
                thread::yield_now();
            }
        });

        senders.into_iter().map(|h| h.join().unwrap()).sum::<u64>()
    });

    sfe.validate();
    let s = sfe.stats_snap();
    let total = (SENDERS * PKTS_PER_SENDER) as u64;
    assert_eq!(s.packets_forwarded, forwarded);
    assert_eq!(s.packets_forwarded + s.packets_not_forwarded, total);

    // Every forwarded packet is accounted to some connection, either in
    // a record already delivered or still pending.
    sfe.flush_all();
    let reported: u64 =
        rec.take().iter().map(|r| u64::from(r.src.new_packets)).sum();
    assert_eq!(reported, forwarded);
}

#[test]
fn steady_connection_reads_whole_under_churn() {
    // Two buckets, so the churn lands in the steady connection's chains
    // and keeps reordering them.
    let cfg = Sfe6Config { hash_shift: 1, ..Default::default() };
    let (sfe, _log) = test_engine(cfg);
    let base = ConnectionCreate {
        flags: CreateFlags::NO_SEQ_CHECK,
        ..snat_conn(Protocol::TCP)
    };
    sfe.create_connection(&base).unwrap();
    let churn_done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..SENDERS {
            s.spawn(|| {
                let mut n = 0u32;
                while !churn_done.load(Ordering::Relaxed) {
                    let seg = TcpSeg::ack(n, 0);
                    let pkt = tcp6(
                        CLIENT_IP,
                        SERVER_IP,
                        CLIENT_PORT,
                        SERVER_PORT,
                        &seg,
                    );
                    let res = sfe.process_packet(&lan(), RxPacket::new(&pkt));
                    let fwd = expect_forward(res);
                    let src = fwd.xlate_src.as_ref().unwrap();
                    assert_eq!((src.ip, src.port), (PUBLIC_IP, PUBLIC_PORT));
                    assert!(fwd.xlate_dest.is_none());
                    assert_eq!(fwd.xmit_dev.ifindex, WAN_IFINDEX);
                    assert_eq!(
                        fwd.l2,
                        Some(L2Rewrite {
                            src: WAN_MAC,
                            dst: GW_MAC,
                            fast_eth: true,
                        })
                    );
                    n = n.wrapping_add(1);
                }
            });
        }

        s.spawn(|| {
            for round in 0..2000u16 {
                let port = round % PORTS + 1;
                let req = with_client_port(&base, port);
                if round % 3 == 0 {
                    let _ = sfe.destroy_connection(&req.key());
                } else {
                    let _ = sfe.create_connection(&req);
                }
            }
            churn_done.store(true, Ordering::Relaxed);
        });
    });

    sfe.validate();
    assert!(sfe.find_connection(&base.key()).is_some());
}
