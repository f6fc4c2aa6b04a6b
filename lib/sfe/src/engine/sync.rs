// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Statistics sync.
//!
//! The packet path only bumps 32-bit per-period counters. A sync pass
//! folds those into the 64-bit totals and reports every connection that
//! saw traffic during the period to the connection manager, which uses
//! the reports to keep its own connection tracking alive. A connection
//! leaving the table gets one final report.

use super::conn::Connection;
use super::conn::Direction;
use super::flow_table::FlowTable;
use super::stat::EngineStats;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use sfe_api::ConnectionSync;
use sfe_api::DirectionSync;
use sfe_api::SyncReason;

/// Receives connection reports.
///
/// Reports are delivered with no engine lock held, but from the
/// engine's own threads; an implementation must not call back into the
/// engine.
pub trait SyncRuleCallback: Send + Sync {
    fn sync(&self, rec: &ConnectionSync);
}

/// Fold a connection's counters and build its report. `now` is in
/// milliseconds since the engine epoch.
pub fn gen_sync(
    conn: &Connection,
    reason: SyncReason,
    now: u64,
) -> ConnectionSync {
    let tcp = *conn.tcp.lock();

    let [src, dest] = Direction::BOTH.map(|dir| {
        let cm = conn.cm(dir);
        let (new_packets, new_bytes) = cm.counters.fold();
        DirectionSync {
            dev: cm.match_dev.ifindex,
            tcp: tcp[dir.index()].snap(),
            new_packets,
            new_bytes,
            packets_total: cm.counters.rx_packets.total(),
            bytes_total: cm.counters.rx_bytes.total(),
        }
    });

    let last = conn.last_sync.swap(now, Ordering::Relaxed);

    ConnectionSync {
        protocol: conn.protocol,
        src_ip: conn.src_ip,
        src_ip_xlate: conn.src_ip_xlate,
        dest_ip: conn.dest_ip,
        dest_ip_xlate: conn.dest_ip_xlate,
        src_port: conn.src_port,
        src_port_xlate: conn.src_port_xlate,
        dest_port: conn.dest_port,
        dest_port_xlate: conn.dest_port_xlate,
        src,
        dest,
        reason,
        delta_ms: now.saturating_sub(last),
        mark: conn.mark,
    }
}

/// Run one periodic pass over the table: fold the engine counters and
/// build a report for each connection on the active list, emptying it.
///
/// The table must be held at least shared; the reports are returned
/// for delivery after it is released.
pub fn sync_pass(
    table: &FlowTable,
    stats: &EngineStats,
    now: u64,
) -> Vec<ConnectionSync> {
    stats.fold();

    table
        .take_active()
        .into_iter()
        .filter_map(|id| table.get(id))
        .map(|conn| gen_sync(conn, SyncReason::Stats, now))
        .collect()
}
