// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The shortcut forwarding engine.
//!
//! A received packet is parsed just far enough to build its
//! [`MatchKey`](conn::MatchKey), looked up in the
//! [`FlowTable`](flow_table::FlowTable), run past its protocol's
//! validator and then either described as a [`Forward`] or handed back
//! as an exception.
pub mod checksum;
pub mod conn;
pub mod cookie;
pub mod dump;
pub mod flow_table;
pub mod forward;
pub mod headers;
pub mod icmp;
pub mod ip6;
pub mod sfe6;
pub mod stat;
pub mod sync;
pub mod tcp;
pub mod tcp_state;
pub mod udp;

use conn::MatchKey;
use flow_table::FlowTable;
use flow_table::MatchId;
use sfe_api::ExceptionEvent;
use sfe_api::Ipv6Addr;
use stat::EngineStats;

pub use forward::Forward;
pub use forward::L2Rewrite;
pub use forward::RewriteError;
pub use sfe6::Sfe6;

/// A received packet as handed to [`Sfe6::process_packet`].
#[derive(Clone, Copy, Debug)]
pub struct RxPacket<'a> {
    /// The packet, starting at the IPv6 header.
    pub bytes: &'a [u8],
    /// The packet is a GSO super-frame and will be segmented below
    /// us, so it is exempt from the MTU check.
    pub gso: bool,
    /// Flow cookie attached by the NIC, if any.
    pub flow_cookie: Option<u32>,
}

impl<'a> RxPacket<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, gso: false, flow_cookie: None }
    }
}

/// What the engine decided about a packet.
#[derive(Debug)]
pub enum ProcessResult {
    Forward(Forward),
    Exception(ExceptionEvent),
}

impl ProcessResult {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward(_))
    }

    pub fn exception(&self) -> Option<ExceptionEvent> {
        match self {
            Self::Exception(ev) => Some(*ev),
            Self::Forward(_) => None,
        }
    }
}

/// A validator's answer. The validators never modify the table; the
/// engine acts on the verdict once the validator returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Verdict {
    /// Forward the packet through `id`. `len` is the datagram length
    /// the match is charged for.
    Forward { id: MatchId, l4_off: usize, len: usize },
    Exception(ExceptionEvent),
    /// Count the exception and give the connection back to the slow
    /// path.
    Flush(MatchId, ExceptionEvent),
}

/// The parts of an IPv6 packet the protocol validators need, gathered
/// once by [`ip6::recv`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct L3Info<'a> {
    pub dev: u32,
    /// The datagram, cut to its declared length.
    pub dgram: &'a [u8],
    pub l4_off: usize,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub hop_limit: u8,
    /// Extension headers were present; a match found for this packet
    /// is flushed rather than used.
    pub flush_on_find: bool,
    pub gso: bool,
    pub flow_cookie: Option<u32>,
}

impl L3Info<'_> {
    pub fn l4(&self) -> &[u8] {
        &self.dgram[self.l4_off..]
    }

    pub fn len(&self) -> usize {
        self.dgram.len()
    }

    pub fn forward(&self, id: MatchId) -> Verdict {
        Verdict::Forward { id, l4_off: self.l4_off, len: self.len() }
    }

    /// Too big for the egress device, and nobody below will split it.
    pub fn needs_frag(&self, mtu: u32) -> bool {
        !self.gso && self.len() > mtu as usize
    }
}

/// Find the match for `key`, trying the packet's flow cookie before the
/// hash. A cookie that points at some other match is ignored.
pub(crate) fn lookup(
    table: &FlowTable,
    stats: &EngineStats,
    key: &MatchKey,
    cookie: Option<u32>,
) -> Option<MatchId> {
    if let Some(id) = cookie.and_then(|c| table.cookies.lookup(c)) {
        if table.cm(id).is_some_and(|cm| cm.key == *key) {
            return Some(id);
        }
    }

    table.find_match(key, stats)
}
