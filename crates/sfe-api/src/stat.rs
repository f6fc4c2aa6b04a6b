// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::exception::ExceptionEvent;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// A point-in-time copy of the engine-wide counters.
///
/// Every value is the 64-bit summary plus whatever has accumulated in
/// the current sync period, so a snapshot never goes backwards across a
/// sync pass.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StatsSnap {
    pub num_connections: u32,
    pub packets_forwarded: u64,
    pub packets_not_forwarded: u64,
    pub connection_create_requests: u64,
    pub connection_create_collisions: u64,
    pub connection_destroy_requests: u64,
    pub connection_destroy_misses: u64,
    pub connection_flushes: u64,
    pub connection_match_hash_hits: u64,
    pub connection_match_hash_reorders: u64,

    /// One entry per [`ExceptionEvent`], indexed by
    /// [`ExceptionEvent::index`].
    pub exception_events: Vec<u64>,
}

impl StatsSnap {
    pub fn exception(&self, ev: ExceptionEvent) -> u64 {
        self.exception_events.get(ev.index()).copied().unwrap_or(0)
    }

    /// Iterate the exception kinds with a non-zero count.
    pub fn nonzero_exceptions(
        &self,
    ) -> impl Iterator<Item = (ExceptionEvent, u64)> + '_ {
        ExceptionEvent::iter()
            .map(|ev| (ev, self.exception(ev)))
            .filter(|(_, count)| *count != 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nonzero_exceptions_skips_zero() {
        let mut exception_events = vec![0; ExceptionEvent::COUNT];
        exception_events[ExceptionEvent::TcpFlags.index()] = 3;
        exception_events[ExceptionEvent::NonV6.index()] = 1;
        let snap = StatsSnap { exception_events, ..Default::default() };
        let got: Vec<_> = snap.nonzero_exceptions().collect();
        assert_eq!(
            got,
            vec![(ExceptionEvent::TcpFlags, 3), (ExceptionEvent::NonV6, 1)]
        );
        assert_eq!(snap.exception(ExceptionEvent::UdpSmallTtl), 0);
    }
}
