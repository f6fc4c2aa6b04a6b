// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Connections and their per-direction matches.
//!
//! A [`Connection`] is created from a [`ConnectionCreate`] request and
//! owns exactly two [`ConnectionMatch`] values: one for packets
//! travelling in the original direction (source to destination) and
//! one for replies. Everything the fast path needs to rewrite and
//! retransmit a packet is computed up front, when the connection is
//! built, so the per-packet work is a lookup and a few stores.

use super::checksum::CsumAdjust;
use super::stat::MatchCounters;
use super::tcp_state::TcpTracker;
use crate::ddi::sync::KMutex;
use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use sfe_api::ConnKey;
use sfe_api::ConnectionCreate;
use sfe_api::CreateFlags;
use sfe_api::Ipv6Addr;
use sfe_api::LinkKind;
use sfe_api::MacAddr;
use sfe_api::NetDev;
use sfe_api::Protocol;
use sfe_api::TcpTrackInit;

/// Which half of a connection a match describes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    /// Packets from the connection's source to its destination.
    Original,
    /// Packets from the destination back to the source.
    Reply,
}

impl Direction {
    /// The direction of the counter match.
    #[inline]
    pub const fn flip(self) -> Self {
        match self {
            Self::Original => Self::Reply,
            Self::Reply => Self::Original,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Original => 0,
            Self::Reply => 1,
        }
    }

    pub const BOTH: [Direction; 2] = [Direction::Original, Direction::Reply];
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Original => "ORIG",
            Self::Reply => "REPLY",
        };
        write!(f, "{s}")
    }
}

/// The identity a packet is looked up by: the device it arrived on
/// plus its 5-tuple, pre-translation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MatchKey {
    pub dev: u32,
    pub protocol: Protocol,
    pub src_ip: Ipv6Addr,
    pub src_port: u16,
    pub dst_ip: Ipv6Addr,
    pub dst_port: u16,
}

impl MatchKey {
    /// The 5-tuple without the device, as handed to a flow cookie
    /// offload.
    pub fn tuple(&self) -> ConnKey {
        ConnKey {
            protocol: self.protocol,
            src_ip: self.src_ip,
            src_port: self.src_port,
            dest_ip: self.dst_ip,
            dest_port: self.dst_port,
        }
    }
}

impl Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "dev {} {} [{}]:{} -> [{}]:{}",
            self.dev,
            self.protocol,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port
        )
    }
}

bitflags::bitflags! {
    /// Per-match behaviour, derived when the connection is created.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MatchFlags: u32 {
        /// Rewrite the source address and port.
        const XLATE_SRC          = 1 << 0;
        /// Rewrite the destination address and port.
        const XLATE_DEST         = 1 << 1;
        /// Skip TCP sequence/window validation.
        const NO_SEQ_CHECK       = 1 << 2;
        /// The L2 header is a plain Ethernet header.
        const WRITE_FAST_ETH_HDR = 1 << 3;
        /// The egress device needs an L2 header written.
        const WRITE_L2_HDR       = 1 << 4;
        const PRIORITY_REMARK    = 1 << 5;
        const DSCP_REMARK        = 1 << 6;
    }
}

/// An address/port rewrite and the transport checksum delta it
/// causes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Xlate {
    pub ip: Ipv6Addr,
    pub port: u16,
    pub csum_adjust: CsumAdjust,
}

impl Xlate {
    fn new(old_ip: Ipv6Addr, old_port: u16, ip: Ipv6Addr, port: u16) -> Self {
        let old_ip_b = old_ip.bytes();
        let new_ip_b = ip.bytes();
        let old_port_b = old_port.to_be_bytes();
        let new_port_b = port.to_be_bytes();
        let csum_adjust = CsumAdjust::compute_pairs(&[
            (&old_ip_b[..], &new_ip_b[..]),
            (&old_port_b[..], &new_port_b[..]),
        ]);
        Self { ip, port, csum_adjust }
    }
}

/// One direction of a connection.
pub struct ConnectionMatch {
    pub key: MatchKey,
    pub match_dev: Arc<NetDev>,
    pub flags: MatchFlags,

    pub xlate_src: Option<Xlate>,
    pub xlate_dest: Option<Xlate>,

    pub xmit_dev: Arc<NetDev>,
    pub xmit_mtu: u32,
    pub xmit_src_mac: MacAddr,
    pub xmit_dest_mac: MacAddr,

    pub priority: u32,
    /// Already shifted into its traffic-class position.
    pub dscp: u8,

    pub counters: MatchCounters,

    /// Set while the match sits on the active list.
    pub active: AtomicBool,

    /// Hardware flow cookie, zero when none is assigned.
    pub flow_cookie: AtomicU32,
}

impl ConnectionMatch {
    /// The DSCP code point as configured, unshifted.
    pub fn dscp_codepoint(&self) -> u8 {
        self.dscp >> 2
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn flow_cookie(&self) -> u16 {
        self.flow_cookie.load(Ordering::Relaxed) as u16
    }
}

/// A bidirectional shortcut installed by the connection manager.
pub struct Connection {
    pub protocol: Protocol,
    pub src_ip: Ipv6Addr,
    pub src_ip_xlate: Ipv6Addr,
    pub dest_ip: Ipv6Addr,
    pub dest_ip_xlate: Ipv6Addr,
    pub src_port: u16,
    pub src_port_xlate: u16,
    pub dest_port: u16,
    pub dest_port_xlate: u16,

    matches: [ConnectionMatch; 2],

    /// TCP window tracking, indexed by [`Direction::index`]. The
    /// validator reads the counter direction and writes both, so the
    /// pair shares one lock.
    pub tcp: KMutex<[TcpTracker; 2]>,

    /// Milliseconds since the engine epoch at the last sync.
    pub last_sync: AtomicU64,
    pub mark: u32,

    /// The dump sequence this connection was last emitted in.
    pub debug_read_seq: AtomicU32,
}

impl Connection {
    /// Build a connection, and both its matches, from a create
    /// request. `now` is the current time in engine milliseconds.
    pub fn from_create(req: &ConnectionCreate, now: u64) -> Self {
        let original = build_match(req, Direction::Original);
        let reply = build_match(req, Direction::Reply);

        Self {
            protocol: req.protocol,
            src_ip: req.src_ip,
            src_ip_xlate: req.src_ip_xlate,
            dest_ip: req.dest_ip,
            dest_ip_xlate: req.dest_ip_xlate,
            src_port: req.src_port,
            src_port_xlate: req.src_port_xlate,
            dest_port: req.dest_port,
            dest_port_xlate: req.dest_port_xlate,
            matches: [original, reply],
            tcp: KMutex::new([
                TcpTracker::from(&req.src_tcp),
                TcpTracker::from(&req.dest_tcp),
            ]),
            last_sync: AtomicU64::new(now),
            mark: req.mark,
            debug_read_seq: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> ConnKey {
        ConnKey {
            protocol: self.protocol,
            src_ip: self.src_ip,
            src_port: self.src_port,
            dest_ip: self.dest_ip,
            dest_port: self.dest_port,
        }
    }

    #[inline]
    pub fn cm(&self, dir: Direction) -> &ConnectionMatch {
        &self.matches[dir.index()]
    }

    #[inline]
    pub fn cm_mut(&mut self, dir: Direction) -> &mut ConnectionMatch {
        &mut self.matches[dir.index()]
    }

    /// The ingress device of the original direction.
    pub fn original_dev(&self) -> &Arc<NetDev> {
        &self.cm(Direction::Original).match_dev
    }

    /// The ingress device of the reply direction.
    pub fn reply_dev(&self) -> &Arc<NetDev> {
        &self.cm(Direction::Reply).match_dev
    }

    pub fn uses_dev(&self, ifindex: u32) -> bool {
        self.original_dev().ifindex == ifindex
            || self.reply_dev().ifindex == ifindex
    }

    /// Merge newer TCP tracking data and the sequence check flag from
    /// a request for this same connection.
    ///
    /// The window values only ever move forward (modulo 2^32); a
    /// request carrying older data leaves them alone.
    pub fn refresh(&mut self, req: &ConnectionCreate) {
        if self.protocol == Protocol::TCP {
            let mut tcp = self.tcp.lock();
            tcp[Direction::Original.index()].raise_to(&req.src_tcp);
            tcp[Direction::Reply.index()].raise_to(&req.dest_tcp);
        }

        let no_seq = req.flags.contains(CreateFlags::NO_SEQ_CHECK);
        for dir in Direction::BOTH {
            self.cm_mut(dir).flags.set(MatchFlags::NO_SEQ_CHECK, no_seq);
        }
    }
}

fn build_match(req: &ConnectionCreate, dir: Direction) -> ConnectionMatch {
    // The reply direction mirrors the original: it is keyed on the
    // post-translation tuple swapped around, and undoes the original's
    // translation.
    let (match_dev, xmit_dev, xmit_mtu, xmit_dest_mac, priority, dscp) =
        match dir {
            Direction::Original => (
                &req.src_dev,
                &req.dest_dev,
                req.dest_mtu,
                req.dest_mac_xlate,
                req.src_priority,
                req.src_dscp,
            ),
            Direction::Reply => (
                &req.dest_dev,
                &req.src_dev,
                req.src_mtu,
                req.src_mac,
                req.dest_priority,
                req.dest_dscp,
            ),
        };

    let key = match dir {
        Direction::Original => MatchKey {
            dev: match_dev.ifindex,
            protocol: req.protocol,
            src_ip: req.src_ip,
            src_port: req.src_port,
            dst_ip: req.dest_ip,
            dst_port: req.dest_port,
        },
        Direction::Reply => MatchKey {
            dev: match_dev.ifindex,
            protocol: req.protocol,
            src_ip: req.dest_ip_xlate,
            src_port: req.dest_port_xlate,
            dst_ip: req.src_ip_xlate,
            dst_port: req.src_port_xlate,
        },
    };

    let src_changes = req.src_ip != req.src_ip_xlate
        || req.src_port != req.src_port_xlate;
    let dest_changes = req.dest_ip != req.dest_ip_xlate
        || req.dest_port != req.dest_port_xlate;

    let mut flags = MatchFlags::empty();
    let (xlate_src, xlate_dest) = match dir {
        Direction::Original => (
            src_changes.then(|| {
                Xlate::new(
                    req.src_ip,
                    req.src_port,
                    req.src_ip_xlate,
                    req.src_port_xlate,
                )
            }),
            dest_changes.then(|| {
                Xlate::new(
                    req.dest_ip,
                    req.dest_port,
                    req.dest_ip_xlate,
                    req.dest_port_xlate,
                )
            }),
        ),
        Direction::Reply => (
            dest_changes.then(|| {
                Xlate::new(
                    req.dest_ip_xlate,
                    req.dest_port_xlate,
                    req.dest_ip,
                    req.dest_port,
                )
            }),
            src_changes.then(|| {
                Xlate::new(
                    req.src_ip_xlate,
                    req.src_port_xlate,
                    req.src_ip,
                    req.src_port,
                )
            }),
        ),
    };

    flags.set(MatchFlags::XLATE_SRC, xlate_src.is_some());
    flags.set(MatchFlags::XLATE_DEST, xlate_dest.is_some());

    match xmit_dev.kind {
        LinkKind::PointToPoint => {}
        LinkKind::Ethernet => {
            flags |= MatchFlags::WRITE_L2_HDR | MatchFlags::WRITE_FAST_ETH_HDR;
        }
        LinkKind::OtherL2 => flags |= MatchFlags::WRITE_L2_HDR,
    }

    if req.flags.contains(CreateFlags::PRIORITY_REMARK) {
        flags |= MatchFlags::PRIORITY_REMARK;
    }

    if req.flags.contains(CreateFlags::DSCP_REMARK) {
        flags |= MatchFlags::DSCP_REMARK;
    }

    if req.flags.contains(CreateFlags::NO_SEQ_CHECK) {
        flags |= MatchFlags::NO_SEQ_CHECK;
    }

    ConnectionMatch {
        key,
        match_dev: match_dev.clone(),
        flags,
        xlate_src,
        xlate_dest,
        xmit_dev: xmit_dev.clone(),
        xmit_mtu,
        xmit_src_mac: xmit_dev.mac,
        xmit_dest_mac,
        priority,
        dscp: dscp << 2,
        counters: MatchCounters::default(),
        active: AtomicBool::new(false),
        flow_cookie: AtomicU32::new(0),
    }
}

impl From<&TcpTrackInit> for TcpTracker {
    fn from(init: &TcpTrackInit) -> Self {
        TcpTracker {
            window_scale: init.window_scale,
            max_win: init.max_window.max(1),
            end: init.end,
            max_end: init.max_end,
        }
    }
}
