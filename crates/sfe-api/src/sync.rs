// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Records handed out of the engine: the per-connection sync record
//! delivered to the connection manager, and the per-connection dump
//! record used for inspection.

use super::ip::Ipv6Addr;
use super::ip::Protocol;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Why a [`ConnectionSync`] record was produced.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SyncReason {
    /// Periodic statistics update; the connection lives on.
    Stats,
    /// The fast path gave the connection back to the slow path.
    Flush,
    /// The connection was evicted to make room.
    Evict,
    /// The connection manager (or teardown) removed the connection.
    Destroy,
}

impl Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Stats => "STATS",
            Self::Flush => "FLUSH",
            Self::Evict => "EVICT",
            Self::Destroy => "DESTROY",
        };
        write!(f, "{s}")
    }
}

/// TCP window tracking state for one direction.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TcpWindowSnap {
    pub max_win: u32,
    pub end: u32,
    pub max_end: u32,
}

/// The half of a [`ConnectionSync`] describing one direction.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct DirectionSync {
    /// Interface index of the device packets in this direction
    /// arrive on.
    pub dev: u32,
    pub tcp: TcpWindowSnap,
    /// Packets seen since the previous record.
    pub new_packets: u32,
    /// Bytes seen since the previous record.
    pub new_bytes: u32,
    pub packets_total: u64,
    pub bytes_total: u64,
}

/// A per-connection report delivered to the sync callback, either on
/// the periodic pass or when the connection leaves the table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionSync {
    pub protocol: Protocol,
    pub src_ip: Ipv6Addr,
    pub src_ip_xlate: Ipv6Addr,
    pub dest_ip: Ipv6Addr,
    pub dest_ip_xlate: Ipv6Addr,
    pub src_port: u16,
    pub src_port_xlate: u16,
    pub dest_port: u16,
    pub dest_port_xlate: u16,
    /// The original direction (source to destination).
    pub src: DirectionSync,
    /// The reply direction (destination to source).
    pub dest: DirectionSync,
    pub reason: SyncReason,
    /// Milliseconds since the previous record for this connection.
    pub delta_ms: u64,
    pub mark: u32,
}

/// The half of a [`ConnectionDump`] describing one direction.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DirectionDump {
    pub dev: String,
    pub ip: Ipv6Addr,
    pub ip_xlate: Ipv6Addr,
    pub port: u16,
    pub port_xlate: u16,
    pub priority: u32,
    /// DSCP code point, unshifted.
    pub dscp: u8,
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

/// A point-in-time view of one connection for inspection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionDump {
    pub protocol: Protocol,
    pub src: DirectionDump,
    pub dest: DirectionDump,
    /// Milliseconds since the engine started, at the last sync.
    pub last_sync: u64,
    pub mark: u32,
}
