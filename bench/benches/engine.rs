// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Fast path microbenchmarks.

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use sfe_test_utils::*;
use std::hint::black_box;

/// An engine holding `n` UDP connections which differ by client port.
fn populated(n: u16) -> Sfe6 {
    let cfg = Sfe6Config {
        max_connections: u32::from(n) + 1,
        ..Default::default()
    };
    let (sfe, _log) = test_engine(cfg);
    let base = snat_conn(Protocol::UDP);
    for port in 1..=n {
        sfe.create_connection(&with_client_port(&base, port))
            .expect("create connection");
    }
    sfe
}

/// Classify a packet for an existing connection, at various table sizes.
fn process_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("process/udp_hit");
    group.throughput(Throughput::Elements(1));

    for size in [1u16, 1_000, 30_000] {
        let sfe = populated(size);
        let dev = lan();
        let pkt = udp6(CLIENT_IP, SERVER_IP, 1, SERVER_PORT, &[0; 64]);
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |b, _| {
                b.iter(|| {
                    black_box(sfe.process_packet(&dev, RxPacket::new(&pkt)))
                })
            },
        );
    }
    group.finish();
}

/// A miss runs the same parsing but stops at the lookup.
fn process_miss(c: &mut Criterion) {
    let sfe = populated(1_000);
    let dev = lan();
    let pkt = udp6(CLIENT_IP, SERVER_IP, 9, SERVER_PORT + 1, &[0; 64]);
    c.bench_function("process/udp_miss", |b| {
        b.iter(|| black_box(sfe.process_packet(&dev, RxPacket::new(&pkt))))
    });
}

/// A forwarded TCP ACK including the window check and the rewrite.
fn tcp_forward_and_apply(c: &mut Criterion) {
    let (sfe, _log) = test_engine(Sfe6Config::default());
    sfe.create_connection(&established_tcp()).expect("create connection");
    let dev = lan();
    let seg = TcpSeg::ack(1000, 5000);
    let pkt = tcp6(CLIENT_IP, SERVER_IP, CLIENT_PORT, SERVER_PORT, &seg);

    c.bench_function("process/tcp_ack_rewrite", |b| {
        b.iter(|| {
            let mut buf = pkt.clone();
            if let ProcessResult::Forward(fwd) =
                sfe.process_packet(&dev, RxPacket::new(&pkt))
            {
                fwd.apply(&mut buf).expect("rewrite");
            }
            black_box(buf)
        })
    });
}

fn create_destroy(c: &mut Criterion) {
    let (sfe, _log) = test_engine(Sfe6Config::default());
    let req = snat_conn(Protocol::UDP);
    let key = req.key();
    c.bench_function("table/create_destroy", |b| {
        b.iter(|| {
            sfe.create_connection(black_box(&req)).expect("create");
            black_box(sfe.destroy_connection(&key))
        })
    });
}

criterion_group!(
    benches,
    process_hit,
    process_miss,
    tcp_forward_and_apply,
    create_destroy
);
criterion_main!(benches);
