// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Requests made by the connection manager, and the errors they can
//! produce.

use super::dev::NetDev;
use super::ip::Ipv6Addr;
use super::ip::Protocol;
use super::mac::MacAddr;
use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The default number of hash buckets is `1 << DEFAULT_HASH_SHIFT`.
pub const DEFAULT_HASH_SHIFT: u8 = 12;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 65_536;
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 10;

bitflags::bitflags! {
    /// Per-connection options supplied by the connection manager.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct CreateFlags: u32 {
        /// Skip TCP sequence/window validation for this connection.
        const NO_SEQ_CHECK    = 1 << 0;
        /// Set the packet priority from the request.
        const PRIORITY_REMARK = 1 << 1;
        /// Rewrite the DSCP bits of the traffic class.
        const DSCP_REMARK     = 1 << 2;
    }
}

/// The pre-translation identity of a connection, as the connection
/// manager knows it.
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
pub struct ConnKey {
    pub protocol: Protocol,
    pub src_ip: Ipv6Addr,
    pub src_port: u16,
    pub dest_ip: Ipv6Addr,
    pub dest_port: u16,
}

impl Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{}]:{} -> [{}]:{}",
            self.protocol,
            self.src_ip,
            self.src_port,
            self.dest_ip,
            self.dest_port
        )
    }
}

/// Initial TCP tracking state for one direction.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TcpTrackInit {
    pub window_scale: u8,
    pub max_window: u32,
    pub end: u32,
    pub max_end: u32,
}

/// A request to install a shortcut connection.
///
/// The "src" side is the host that sent the first packet of the flow.
/// Addresses and ports come in pre-translation (`*_ip`, `*_port`) and
/// post-translation (`*_xlate`) pairs; they are equal when no
/// translation takes place.
#[derive(Clone, Debug)]
pub struct ConnectionCreate {
    pub protocol: Protocol,
    pub src_dev: Arc<NetDev>,
    pub dest_dev: Arc<NetDev>,
    pub flags: CreateFlags,
    pub src_mtu: u32,
    pub dest_mtu: u32,
    pub src_ip: Ipv6Addr,
    pub src_ip_xlate: Ipv6Addr,
    pub dest_ip: Ipv6Addr,
    pub dest_ip_xlate: Ipv6Addr,
    pub src_port: u16,
    pub src_port_xlate: u16,
    pub dest_port: u16,
    pub dest_port_xlate: u16,
    /// Next hop for reply traffic heading back to the source.
    pub src_mac: MacAddr,
    /// Next hop for original traffic heading to the destination.
    pub dest_mac_xlate: MacAddr,
    pub src_tcp: TcpTrackInit,
    pub dest_tcp: TcpTrackInit,
    pub src_priority: u32,
    pub dest_priority: u32,
    pub src_dscp: u8,
    pub dest_dscp: u8,
    pub mark: u32,
}

impl ConnectionCreate {
    pub fn key(&self) -> ConnKey {
        ConnKey {
            protocol: self.protocol,
            src_ip: self.src_ip,
            src_port: self.src_port,
            dest_ip: self.dest_ip,
            dest_port: self.dest_port,
        }
    }
}

/// The outcome of a destroy request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum DestroyResult {
    Destroyed,
    Miss,
}

/// Errors returned to the connection manager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, thiserror::Error)]
pub enum SfeError {
    #[error("connection already exists: {0}")]
    Collision(ConnKey),

    #[error("connection table is full ({0} entries)")]
    MaxCapacity(u32),

    #[error("no such connection: {0}")]
    NotFound(ConnKey),
}

impl SfeError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Collision(_) => libc::EADDRINUSE,
            Self::MaxCapacity(_) => libc::ENOMEM,
            Self::NotFound(_) => libc::ENOENT,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Sfe6Config {
    /// Both hash tables have `1 << hash_shift` buckets.
    pub hash_shift: u8,
    /// Creates beyond this many live connections fail with
    /// [`SfeError::MaxCapacity`].
    pub max_connections: u32,
    /// Period of the sync timer. Zero disables the timer; sync passes
    /// must then be driven by hand.
    pub sync_interval_ms: u64,
    /// Allocate hardware flow cookies for new matches.
    pub flow_cookies: bool,
}

impl Default for Sfe6Config {
    fn default() -> Self {
        Self {
            hash_shift: DEFAULT_HASH_SHIFT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            flow_cookies: false,
        }
    }
}

impl Sfe6Config {
    pub fn hash_size(&self) -> usize {
        1 << self.hash_shift
    }
}
