// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The reasons a packet may be refused by the fast path.
//!
//! The ordering of [`ExceptionEvent`] is part of the API: the
//! exception counters are indexed by it and dumps list them in this
//! order.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

macro_rules! exception_events {
    ($($variant:ident => $name:literal,)*) => {
        /// Why a packet was handed back to the slow path.
        #[derive(
            Clone,
            Copy,
            Debug,
            Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Serialize,
        )]
        #[repr(u8)]
        pub enum ExceptionEvent {
            $($variant,)*
        }

        impl ExceptionEvent {
            /// Every exception kind, in counter order.
            pub const ALL: &'static [ExceptionEvent] = &[
                $(ExceptionEvent::$variant,)*
            ];

            /// The printable name used in dumps.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(ExceptionEvent::$variant => $name,)*
                }
            }
        }
    };
}

exception_events! {
    UdpHeaderIncomplete => "UDP_HEADER_INCOMPLETE",
    UdpNoConnection => "UDP_NO_CONNECTION",
    UdpIpOptionsOrInitialFragment => "UDP_IP_OPTIONS_OR_INITIAL_FRAGMENT",
    UdpSmallTtl => "UDP_SMALL_TTL",
    UdpNeedsFragmentation => "UDP_NEEDS_FRAGMENTATION",
    TcpHeaderIncomplete => "TCP_HEADER_INCOMPLETE",
    TcpNoConnectionSlowFlags => "TCP_NO_CONNECTION_SLOW_FLAGS",
    TcpNoConnectionFastFlags => "TCP_NO_CONNECTION_FAST_FLAGS",
    TcpIpOptionsOrInitialFragment => "TCP_IP_OPTIONS_OR_INITIAL_FRAGMENT",
    TcpSmallTtl => "TCP_SMALL_TTL",
    TcpNeedsFragmentation => "TCP_NEEDS_FRAGMENTATION",
    TcpFlags => "TCP_FLAGS",
    TcpSeqExceedsRightEdge => "TCP_SEQ_EXCEEDS_RIGHT_EDGE",
    TcpSmallDataOffs => "TCP_SMALL_DATA_OFFS",
    TcpBadSack => "TCP_BAD_SACK",
    TcpBigDataOffs => "TCP_BIG_DATA_OFFS",
    TcpSeqBeforeLeftEdge => "TCP_SEQ_BEFORE_LEFT_EDGE",
    TcpAckExceedsRightEdge => "TCP_ACK_EXCEEDS_RIGHT_EDGE",
    TcpAckBeforeLeftEdge => "TCP_ACK_BEFORE_LEFT_EDGE",
    IcmpHeaderIncomplete => "ICMP_HEADER_INCOMPLETE",
    IcmpUnhandledType => "ICMP_UNHANDLED_TYPE",
    IcmpIpv6HeaderIncomplete => "ICMP_IPV6_HEADER_INCOMPLETE",
    IcmpIpv6NonV6 => "ICMP_IPV6_NON_V6",
    IcmpIpv6IpOptionsIncomplete => "ICMP_IPV6_IP_OPTIONS_INCOMPLETE",
    IcmpIpv6UdpHeaderIncomplete => "ICMP_IPV6_UDP_HEADER_INCOMPLETE",
    IcmpIpv6TcpHeaderIncomplete => "ICMP_IPV6_TCP_HEADER_INCOMPLETE",
    IcmpIpv6UnhandledProtocol => "ICMP_IPV6_UNHANDLED_PROTOCOL",
    IcmpNoConnection => "ICMP_NO_CONNECTION",
    IcmpFlushedConnection => "ICMP_FLUSHED_CONNECTION",
    HeaderIncomplete => "HEADER_INCOMPLETE",
    BadTotalLength => "BAD_TOTAL_LENGTH",
    NonV6 => "NON_V6",
    NonInitialFragment => "NON_INITIAL_FRAGMENT",
    DatagramIncomplete => "DATAGRAM_INCOMPLETE",
    IpOptionsIncomplete => "IP_OPTIONS_INCOMPLETE",
    UnhandledProtocol => "UNHANDLED_PROTOCOL",
    FlowCookieAddFail => "FLOW_COOKIE_ADD_FAIL",
}

impl ExceptionEvent {
    /// The number of distinct exception kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// The counter slot for this kind.
    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn iter() -> impl Iterator<Item = ExceptionEvent> {
        Self::ALL.iter().copied()
    }
}

impl Display for ExceptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering_matches_counter_slots() {
        assert_eq!(ExceptionEvent::COUNT, 37);
        for (i, ev) in ExceptionEvent::iter().enumerate() {
            assert_eq!(ev.index(), i);
            assert_eq!(ExceptionEvent::from_index(i), Some(ev));
        }
        assert_eq!(ExceptionEvent::from_index(ExceptionEvent::COUNT), None);
        assert_eq!(
            ExceptionEvent::FlowCookieAddFail.name(),
            "FLOW_COOKIE_ADD_FAIL"
        );
        assert_eq!(ExceptionEvent::UdpHeaderIncomplete.index(), 0);
    }
}
