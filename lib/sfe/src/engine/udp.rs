// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! UDP receive.

use super::L3Info;
use super::Verdict;
use super::conn::MatchKey;
use super::flow_table::FlowTable;
use super::headers::UdpHdrRaw;
use super::headers::view;
use super::lookup;
use super::stat::EngineStats;
use sfe_api::ExceptionEvent;
use sfe_api::Protocol;

pub(crate) fn recv(
    table: &FlowTable,
    stats: &EngineStats,
    l3: &L3Info,
) -> Verdict {
    let Some(udp) = view::<UdpHdrRaw>(l3.l4()) else {
        return Verdict::Exception(ExceptionEvent::UdpHeaderIncomplete);
    };

    let key = MatchKey {
        dev: l3.dev,
        protocol: Protocol::UDP,
        src_ip: l3.src,
        src_port: udp.src_port(),
        dst_ip: l3.dst,
        dst_port: udp.dst_port(),
    };

    let Some(id) = lookup(table, stats, &key, l3.flow_cookie) else {
        return Verdict::Exception(ExceptionEvent::UdpNoConnection);
    };

    if l3.flush_on_find {
        return Verdict::Flush(
            id,
            ExceptionEvent::UdpIpOptionsOrInitialFragment,
        );
    }

    if l3.hop_limit < 2 {
        return Verdict::Flush(id, ExceptionEvent::UdpSmallTtl);
    }

    // The match was found under the table lock we're still holding.
    let Some(cm) = table.cm(id) else {
        return Verdict::Exception(ExceptionEvent::UdpNoConnection);
    };

    if l3.needs_frag(cm.xmit_mtu) {
        return Verdict::Flush(id, ExceptionEvent::UdpNeedsFragmentation);
    }

    l3.forward(id)
}
