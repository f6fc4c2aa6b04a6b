// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 receive: the checks common to every protocol, then dispatch.

use super::L3Info;
use super::RxPacket;
use super::Verdict;
use super::flow_table::FlowTable;
use super::headers::ExtWalkErr;
use super::headers::IPV6_EXT_HDR_SZ;
use super::headers::IPV6_HDR_SZ;
use super::headers::IPV6_VERSION;
use super::headers::Ipv6HdrRaw;
use super::headers::view;
use super::headers::walk_ext_hdrs;
use super::icmp;
use super::stat::EngineStats;
use super::tcp;
use super::udp;
use sfe_api::ExceptionEvent;
use sfe_api::Protocol;

pub(crate) fn recv(
    table: &FlowTable,
    stats: &EngineStats,
    dev: u32,
    rx: &RxPacket,
) -> Verdict {
    let bytes = rx.bytes;

    // Anything shorter can't carry a transport header worth looking
    // at.
    if bytes.len() < IPV6_HDR_SZ + IPV6_EXT_HDR_SZ {
        return Verdict::Exception(ExceptionEvent::HeaderIncomplete);
    }

    let Some(ip) = view::<Ipv6HdrRaw>(bytes) else {
        return Verdict::Exception(ExceptionEvent::HeaderIncomplete);
    };

    if ip.version() != IPV6_VERSION {
        return Verdict::Exception(ExceptionEvent::NonV6);
    }

    let dgram_len = IPV6_HDR_SZ + ip.payload_len() as usize;
    if dgram_len > bytes.len() {
        return Verdict::Exception(ExceptionEvent::BadTotalLength);
    }

    let walk = match walk_ext_hdrs(bytes, ip.next_hdr, dgram_len, true) {
        Ok(walk) => walk,
        Err(ExtWalkErr::Incomplete) => {
            return Verdict::Exception(ExceptionEvent::IpOptionsIncomplete);
        }
        Err(ExtWalkErr::DatagramIncomplete) => {
            return Verdict::Exception(ExceptionEvent::DatagramIncomplete);
        }
        Err(ExtWalkErr::NonInitialFragment) => {
            return Verdict::Exception(ExceptionEvent::NonInitialFragment);
        }
    };

    let l3 = L3Info {
        dev,
        dgram: &bytes[..dgram_len],
        l4_off: walk.l4_off,
        src: ip.src(),
        dst: ip.dst(),
        hop_limit: ip.hop_limit,
        flush_on_find: walk.saw_ext,
        gso: rx.gso,
        flow_cookie: rx.flow_cookie,
    };

    match Protocol::from(walk.proto) {
        Protocol::TCP => tcp::recv(table, stats, &l3),
        Protocol::UDP => udp::recv(table, stats, &l3),
        Protocol::ICMPv6 => icmp::recv(table, stats, &l3),
        Protocol::Unknown(_) => {
            Verdict::Exception(ExceptionEvent::UnhandledProtocol)
        }
    }
}
