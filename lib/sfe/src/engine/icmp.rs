// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ICMPv6 receive.
//!
//! ICMP is never forwarded. An error message quoting a packet of one
//! of our connections means the path for that connection has changed
//! under us (a route went away, an MTU shrank, a hop limit ran out), so
//! the connection is flushed and the slow path deals with both the
//! error and the flow.

use super::L3Info;
use super::Verdict;
use super::conn::MatchKey;
use super::flow_table::FlowTable;
use super::headers::ExtWalkErr;
use super::headers::ICMP6_DST_UNREACH;
use super::headers::ICMP6_HDR_SZ;
use super::headers::ICMP6_TIME_EXCEEDED;
use super::headers::IPV6_VERSION;
use super::headers::Icmpv6HdrRaw;
use super::headers::Ipv6HdrRaw;
use super::headers::TcpHdrRaw;
use super::headers::UdpHdrRaw;
use super::headers::view;
use super::headers::walk_ext_hdrs;
use super::stat::EngineStats;
use sfe_api::ExceptionEvent;
use sfe_api::Protocol;

pub(crate) fn recv(
    table: &FlowTable,
    stats: &EngineStats,
    l3: &L3Info,
) -> Verdict {
    let l4 = l3.l4();
    let Some(icmp) = view::<Icmpv6HdrRaw>(l4) else {
        return Verdict::Exception(ExceptionEvent::IcmpHeaderIncomplete);
    };

    if icmp.ty != ICMP6_DST_UNREACH && icmp.ty != ICMP6_TIME_EXCEEDED {
        return Verdict::Exception(ExceptionEvent::IcmpUnhandledType);
    }

    // The quoted packet: as much of the offending datagram as fit.
    let inner = &l4[ICMP6_HDR_SZ..];
    let Some(ip) = view::<Ipv6HdrRaw>(inner) else {
        return Verdict::Exception(ExceptionEvent::IcmpIpv6HeaderIncomplete);
    };

    if ip.version() != IPV6_VERSION {
        return Verdict::Exception(ExceptionEvent::IcmpIpv6NonV6);
    }

    // The quote is usually truncated, so it is bounded by what we have
    // rather than by its own payload length.
    let walk = match walk_ext_hdrs(inner, ip.next_hdr, inner.len(), false) {
        Ok(walk) => walk,
        Err(ExtWalkErr::Incomplete | ExtWalkErr::DatagramIncomplete) => {
            return Verdict::Exception(
                ExceptionEvent::IcmpIpv6IpOptionsIncomplete,
            );
        }
        Err(ExtWalkErr::NonInitialFragment) => {
            return Verdict::Exception(
                ExceptionEvent::IcmpIpv6UnhandledProtocol,
            );
        }
    };

    let quoted_l4 = &inner[walk.l4_off..];
    let protocol = Protocol::from(walk.proto);
    let (src_port, dst_port) = match protocol {
        Protocol::UDP => match view::<UdpHdrRaw>(quoted_l4) {
            Some(udp) => (udp.src_port(), udp.dst_port()),
            None => {
                return Verdict::Exception(
                    ExceptionEvent::IcmpIpv6UdpHeaderIncomplete,
                );
            }
        },

        Protocol::TCP => match view::<TcpHdrRaw>(quoted_l4) {
            Some(tcp) => (tcp.src_port(), tcp.dst_port()),
            None => {
                return Verdict::Exception(
                    ExceptionEvent::IcmpIpv6TcpHeaderIncomplete,
                );
            }
        },

        _ => {
            return Verdict::Exception(
                ExceptionEvent::IcmpIpv6UnhandledProtocol,
            );
        }
    };

    // The quoted packet was travelling the other way: we sent it, the
    // error came back.
    let key = MatchKey {
        dev: l3.dev,
        protocol,
        src_ip: ip.dst(),
        src_port: dst_port,
        dst_ip: ip.src(),
        dst_port: src_port,
    };

    match table.find_match(&key, stats) {
        Some(id) => Verdict::Flush(id, ExceptionEvent::IcmpFlushedConnection),
        None => Verdict::Exception(ExceptionEvent::IcmpNoConnection),
    }
}
