// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP receive.
//!
//! Only pure ACKs ride the fast path. Anything carrying SYN, FIN or RST
//! changes the connection's state and belongs to the slow path, which
//! gets the whole connection back.

use super::L3Info;
use super::Verdict;
use super::conn::MatchFlags;
use super::conn::MatchKey;
use super::flow_table::FlowTable;
use super::headers::TcpHdrRaw;
use super::headers::view;
use super::lookup;
use super::stat::EngineStats;
use super::tcp_state::check_window;
use super::tcp_state::is_pure_ack;
use sfe_api::ExceptionEvent;
use sfe_api::Protocol;

pub(crate) fn recv(
    table: &FlowTable,
    stats: &EngineStats,
    l3: &L3Info,
) -> Verdict {
    let seg = l3.l4();
    let Some(tcp) = view::<TcpHdrRaw>(seg) else {
        return Verdict::Exception(ExceptionEvent::TcpHeaderIncomplete);
    };

    let key = MatchKey {
        dev: l3.dev,
        protocol: Protocol::TCP,
        src_ip: l3.src,
        src_port: tcp.src_port(),
        dst_ip: l3.dst,
        dst_port: tcp.dst_port(),
    };

    let Some(id) = lookup(table, stats, &key, l3.flow_cookie) else {
        // A pure ACK for a connection we don't know about may just be
        // racing its creation; tell the slow path which it is.
        let ev = if is_pure_ack(tcp.flags) {
            ExceptionEvent::TcpNoConnectionFastFlags
        } else {
            ExceptionEvent::TcpNoConnectionSlowFlags
        };
        return Verdict::Exception(ev);
    };

    let Some(conn) = table.get(id.conn) else {
        return Verdict::Exception(ExceptionEvent::TcpNoConnectionSlowFlags);
    };
    let cm = conn.cm(id.dir);

    if l3.flush_on_find {
        return Verdict::Flush(
            id,
            ExceptionEvent::TcpIpOptionsOrInitialFragment,
        );
    }

    if l3.hop_limit < 2 {
        return Verdict::Flush(id, ExceptionEvent::TcpSmallTtl);
    }

    if l3.needs_frag(cm.xmit_mtu) {
        return Verdict::Flush(id, ExceptionEvent::TcpNeedsFragmentation);
    }

    if !is_pure_ack(tcp.flags) {
        return Verdict::Flush(id, ExceptionEvent::TcpFlags);
    }

    if !cm.flags.contains(MatchFlags::NO_SEQ_CHECK) {
        let mut trackers = conn.tcp.lock();
        if let Err(ev) = check_window(&mut trackers, id.dir, seg, tcp) {
            return Verdict::Flush(id, ev);
        }
    }

    l3.forward(id)
}
