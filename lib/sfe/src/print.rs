// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print engine state in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by tools and integration tests alike.

use crate::api::ConnectionDump;
use crate::api::ConnectionSync;
use crate::api::DirectionDump;
use crate::api::StatsSnap;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a list of [`ConnectionDump`].
pub fn print_connections(conns: &[ConnectionDump]) -> std::io::Result<()> {
    print_connections_into(&mut std::io::stdout(), conns)
}

/// Print a list of [`ConnectionDump`] into a given writer.
pub fn print_connections_into(
    writer: &mut impl Write,
    conns: &[ConnectionDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Connections: {}", conns.len())?;
    write_hr(&mut t)?;
    print_connection_header(&mut t)?;
    for conn in conns {
        print_connection(&mut t, conn)?;
    }
    t.flush()
}

/// Print the header for the [`print_connection()`] output.
pub fn print_connection_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "PROTO\tDIR\tDEV\tADDR\tXLATE\tPKTS\tBYTES\tMARK")
}

/// Print both directions of one connection.
pub fn print_connection(
    t: &mut impl Write,
    conn: &ConnectionDump,
) -> std::io::Result<()> {
    print_direction(t, &conn.protocol.to_string(), "SRC", &conn.src)?;
    print_direction(t, "", "DST", &conn.dest)?;
    writeln!(t, "\t\t\t\t\t\t\t{:08x}", conn.mark)
}

fn print_direction(
    t: &mut impl Write,
    proto: &str,
    dir: &str,
    d: &DirectionDump,
) -> std::io::Result<()> {
    writeln!(
        t,
        "{proto}\t{dir}\t{}\t[{}]:{}\t[{}]:{}\t{}\t{}\t",
        d.dev,
        d.ip,
        d.port,
        d.ip_xlate,
        d.port_xlate,
        d.rx_packets,
        d.rx_bytes,
    )
}

/// Print a [`StatsSnap`].
pub fn print_stats(stats: &StatsSnap) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print a [`StatsSnap`] into a given writer. Only exceptions which have
/// occurred are listed.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &StatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Engine Stats")?;
    write_hrb(&mut t)?;
    let rows = [
        ("connections", u64::from(stats.num_connections)),
        ("packets forwarded", stats.packets_forwarded),
        ("packets not forwarded", stats.packets_not_forwarded),
        ("create requests", stats.connection_create_requests),
        ("create collisions", stats.connection_create_collisions),
        ("destroy requests", stats.connection_destroy_requests),
        ("destroy misses", stats.connection_destroy_misses),
        ("flushes", stats.connection_flushes),
        ("hash hits", stats.connection_match_hash_hits),
        ("hash reorders", stats.connection_match_hash_reorders),
    ];
    for (name, val) in rows {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()?;

    writeln!(t, "\nExceptions")?;
    write_hr(&mut t)?;
    writeln!(t, "NAME\tCOUNT")?;
    for (ev, count) in stats.nonzero_exceptions() {
        writeln!(t, "{ev}\t{count}")?;
    }
    t.flush()
}

/// Print one [`ConnectionSync`] record on a single line.
pub fn print_sync_into(
    t: &mut impl Write,
    rec: &ConnectionSync,
) -> std::io::Result<()> {
    writeln!(
        t,
        "{}\t{} [{}]:{} -> [{}]:{}\t+{}/{}\t+{}/{}\t{}ms",
        rec.reason,
        rec.protocol,
        rec.src_ip,
        rec.src_port,
        rec.dest_ip,
        rec.dest_port,
        rec.src.new_packets,
        rec.src.new_bytes,
        rec.dest.new_packets,
        rec.dest.new_bytes,
        rec.delta_ms,
    )
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ExceptionEvent;

    #[test]
    fn stats_lists_only_seen_exceptions() {
        let mut events = vec![0; ExceptionEvent::COUNT];
        events[ExceptionEvent::TcpSmallTtl.index()] = 3;
        let snap = StatsSnap {
            num_connections: 2,
            packets_forwarded: 10,
            exception_events: events,
            ..Default::default()
        };

        let mut out = Vec::new();
        print_stats_into(&mut out, &snap).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(ExceptionEvent::TcpSmallTtl.name()));
        assert!(!out.contains(ExceptionEvent::UdpSmallTtl.name()));
        assert!(out.lines().any(|l| l.starts_with("packets forwarded")));
    }

    #[test]
    fn connection_rows() {
        let dir = |dev: &str| DirectionDump {
            dev: dev.into(),
            ip: "fd00::1".parse().unwrap(),
            ip_xlate: "2001:db8::1".parse().unwrap(),
            port: 1000,
            port_xlate: 2000,
            ..Default::default()
        };
        let conn = ConnectionDump {
            protocol: crate::api::Protocol::UDP,
            src: dir("lan0"),
            dest: dir("wan0"),
            last_sync: 0,
            mark: 0xbeef,
        };

        let mut out = Vec::new();
        print_connections_into(&mut out, &[conn]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("[2001:db8::1]:2000"));
        assert!(out.contains("0000beef"));
        assert!(out.contains("wan0"));
    }
}
