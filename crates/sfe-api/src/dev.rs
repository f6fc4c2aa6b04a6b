// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::mac::MacAddr;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The link-layer framing of a device, which decides how a packet
/// leaving through it has its L2 header written.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LinkKind {
    /// Plain Ethernet II framing; eligible for the fast header write.
    Ethernet,
    /// No L2 header at all (tunnels, PPP).
    PointToPoint,
    /// Some other L2 framing that the transmit path builds itself.
    OtherL2,
}

impl Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ethernet => "ether",
            Self::PointToPoint => "ptp",
            Self::OtherL2 => "l2",
        };
        write!(f, "{s}")
    }
}

/// A host network device as seen by the engine.
///
/// Devices are compared and hashed by interface index alone; the name
/// is only used when rendering dumps.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetDev {
    pub ifindex: u32,
    pub name: String,
    pub mac: MacAddr,
    pub kind: LinkKind,
}

impl NetDev {
    pub fn new(ifindex: u32, name: &str, mac: MacAddr, kind: LinkKind) -> Self {
        Self { ifindex, name: name.into(), mac, kind }
    }

    pub fn is_point_to_point(&self) -> bool {
        self.kind == LinkKind::PointToPoint
    }
}

impl PartialEq for NetDev {
    fn eq(&self, other: &Self) -> bool {
        self.ifindex == other.ifindex
    }
}

impl Eq for NetDev {}

impl core::hash::Hash for NetDev {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.ifindex.hash(state);
    }
}

impl Display for NetDev {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
