// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Counters kept by the engine and by each match.
//!
//! Every counter has two halves: a 32-bit per-period value bumped on
//! the hot path, and a 64-bit summary the sync pass folds it into.
//! Readers that want a current total add the two.

use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering::Relaxed;
use sfe_api::ExceptionEvent;
use sfe_api::StatsSnap;

/// A per-period counter and its running summary.
#[derive(Debug, Default)]
pub struct PeriodCounter {
    period: AtomicU32,
    summary: AtomicU64,
}

impl PeriodCounter {
    #[inline]
    pub fn incr(&self) {
        self.period.fetch_add(1, Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u32) {
        self.period.fetch_add(n, Relaxed);
    }

    /// Move the per-period value into the summary, returning what was
    /// moved.
    pub fn fold(&self) -> u32 {
        let n = self.period.swap(0, Relaxed);
        self.summary.fetch_add(n as u64, Relaxed);
        n
    }

    /// The summary plus whatever is pending in this period.
    pub fn total(&self) -> u64 {
        self.summary.load(Relaxed) + self.period.load(Relaxed) as u64
    }
}

/// Packet and byte counters for one match direction.
#[derive(Debug, Default)]
pub struct MatchCounters {
    pub rx_packets: PeriodCounter,
    pub rx_bytes: PeriodCounter,
}

impl MatchCounters {
    #[inline]
    pub fn record(&self, bytes: u32) {
        self.rx_packets.incr();
        self.rx_bytes.add(bytes);
    }

    /// Fold the period counters into the lifetime totals, returning
    /// the `(packets, bytes)` that were new in this period.
    pub fn fold(&self) -> (u32, u32) {
        (self.rx_packets.fold(), self.rx_bytes.fold())
    }
}

/// Engine-wide counters.
#[derive(Debug)]
pub struct EngineStats {
    /// Connection creation requests, including those that collided.
    pub connection_create_requests: PeriodCounter,

    /// Creation requests refused because the connection, or one of
    /// its matches, already existed.
    pub connection_create_collisions: PeriodCounter,

    /// Connection destroy requests, including misses.
    pub connection_destroy_requests: PeriodCounter,

    /// Destroy requests for a connection that wasn't in the table.
    pub connection_destroy_misses: PeriodCounter,

    /// Match lookups satisfied by the head of a hash chain.
    pub connection_match_hash_hits: PeriodCounter,

    /// Match lookups that found the entry further down a chain and
    /// moved it to the head.
    pub connection_match_hash_reorders: PeriodCounter,

    /// Connections removed from the table, by any path.
    pub connection_flushes: PeriodCounter,

    /// Packets handed back with a [`Forward`](super::Forward).
    pub packets_forwarded: PeriodCounter,

    /// Packets handed back as an exception.
    pub packets_not_forwarded: PeriodCounter,

    /// One counter per [`ExceptionEvent`].
    exception_events: [PeriodCounter; ExceptionEvent::COUNT],
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            connection_create_requests: PeriodCounter::default(),
            connection_create_collisions: PeriodCounter::default(),
            connection_destroy_requests: PeriodCounter::default(),
            connection_destroy_misses: PeriodCounter::default(),
            connection_match_hash_hits: PeriodCounter::default(),
            connection_match_hash_reorders: PeriodCounter::default(),
            connection_flushes: PeriodCounter::default(),
            packets_forwarded: PeriodCounter::default(),
            packets_not_forwarded: PeriodCounter::default(),
            exception_events: core::array::from_fn(|_| {
                PeriodCounter::default()
            }),
        }
    }
}

impl EngineStats {
    /// Count an exception and the packet that caused it.
    pub fn exception(&self, ev: ExceptionEvent) {
        self.exception_events[ev.index()].incr();
        if ev != ExceptionEvent::FlowCookieAddFail {
            self.packets_not_forwarded.incr();
        }
    }

    pub fn exception_count(&self, ev: ExceptionEvent) -> u64 {
        self.exception_events[ev.index()].total()
    }

    fn scalars(&self) -> [&PeriodCounter; 9] {
        [
            &self.connection_create_requests,
            &self.connection_create_collisions,
            &self.connection_destroy_requests,
            &self.connection_destroy_misses,
            &self.connection_match_hash_hits,
            &self.connection_match_hash_reorders,
            &self.connection_flushes,
            &self.packets_forwarded,
            &self.packets_not_forwarded,
        ]
    }

    /// Fold every per-period counter into its summary.
    pub fn fold(&self) {
        for c in self.scalars() {
            c.fold();
        }

        for c in &self.exception_events {
            c.fold();
        }
    }

    pub fn snap(&self, num_connections: u32) -> StatsSnap {
        StatsSnap {
            num_connections,
            packets_forwarded: self.packets_forwarded.total(),
            packets_not_forwarded: self.packets_not_forwarded.total(),
            connection_create_requests: self
                .connection_create_requests
                .total(),
            connection_create_collisions: self
                .connection_create_collisions
                .total(),
            connection_destroy_requests: self
                .connection_destroy_requests
                .total(),
            connection_destroy_misses: self.connection_destroy_misses.total(),
            connection_flushes: self.connection_flushes.total(),
            connection_match_hash_hits: self.connection_match_hash_hits.total(),
            connection_match_hash_reorders: self
                .connection_match_hash_reorders
                .total(),
            exception_events: self
                .exception_events
                .iter()
                .map(PeriodCounter::total)
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fold_moves_period_into_summary() {
        let c = PeriodCounter::default();
        c.add(5);
        c.incr();
        assert_eq!(c.total(), 6);
        assert_eq!(c.fold(), 6);
        assert_eq!(c.fold(), 0);
        c.incr();
        assert_eq!(c.total(), 7);
    }

    #[test]
    fn exceptions_count_packets() {
        let s = EngineStats::default();
        s.exception(ExceptionEvent::TcpFlags);
        s.exception(ExceptionEvent::TcpFlags);
        s.exception(ExceptionEvent::FlowCookieAddFail);
        s.fold();
        let snap = s.snap(3);
        assert_eq!(snap.num_connections, 3);
        assert_eq!(snap.exception(ExceptionEvent::TcpFlags), 2);
        assert_eq!(snap.exception(ExceptionEvent::FlowCookieAddFail), 1);
        // A cookie failure is not a packet.
        assert_eq!(snap.packets_not_forwarded, 2);
    }
}
