// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Connection create requests for tests.

use sfe::api::ConnectionCreate;
use sfe::api::CreateFlags;
use sfe::api::Ipv6Addr;
use sfe::api::LinkKind;
use sfe::api::MacAddr;
use sfe::api::NetDev;
use sfe::api::Protocol;
use sfe::api::TcpTrackInit;
use std::sync::Arc;

pub const LAN_IFINDEX: u32 = 1;
pub const WAN_IFINDEX: u32 = 2;

pub const LAN_MAC: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 1]);
pub const WAN_MAC: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 2]);
pub const CLIENT_MAC: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 0x10]);
pub const GW_MAC: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 0x20]);

/// fd00::10, a host behind the LAN.
pub const CLIENT_IP: Ipv6Addr =
    Ipv6Addr::from_const([0xfd00, 0, 0, 0, 0, 0, 0, 0x10]);
/// 2001:db8::1, the address the client is translated to.
pub const PUBLIC_IP: Ipv6Addr =
    Ipv6Addr::from_const([0x2001, 0xdb8, 0, 0, 0, 0, 0, 1]);
/// 2001:db8:1::53, a server on the far side of the WAN.
pub const SERVER_IP: Ipv6Addr =
    Ipv6Addr::from_const([0x2001, 0xdb8, 1, 0, 0, 0, 0, 0x53]);

pub const CLIENT_PORT: u16 = 40_000;
pub const PUBLIC_PORT: u16 = 61_000;
pub const SERVER_PORT: u16 = 443;

pub fn lan() -> Arc<NetDev> {
    Arc::new(NetDev::new(LAN_IFINDEX, "lan0", LAN_MAC, LinkKind::Ethernet))
}

pub fn wan() -> Arc<NetDev> {
    Arc::new(NetDev::new(WAN_IFINDEX, "wan0", WAN_MAC, LinkKind::Ethernet))
}

/// A client on the LAN talking to a server on the WAN, source
/// translated to [`PUBLIC_IP`]:[`PUBLIC_PORT`].
pub fn snat_conn(protocol: Protocol) -> ConnectionCreate {
    ConnectionCreate {
        protocol,
        src_dev: lan(),
        dest_dev: wan(),
        flags: CreateFlags::empty(),
        src_mtu: 1500,
        dest_mtu: 1500,
        src_ip: CLIENT_IP,
        src_ip_xlate: PUBLIC_IP,
        dest_ip: SERVER_IP,
        dest_ip_xlate: SERVER_IP,
        src_port: CLIENT_PORT,
        src_port_xlate: PUBLIC_PORT,
        dest_port: SERVER_PORT,
        dest_port_xlate: SERVER_PORT,
        src_mac: CLIENT_MAC,
        dest_mac_xlate: GW_MAC,
        src_tcp: TcpTrackInit::default(),
        dest_tcp: TcpTrackInit::default(),
        src_priority: 0,
        dest_priority: 0,
        src_dscp: 0,
        dest_dscp: 0,
        mark: 0,
    }
}

/// The same as [`snat_conn`] with no translation at all.
pub fn routed_conn(protocol: Protocol) -> ConnectionCreate {
    ConnectionCreate {
        src_ip_xlate: CLIENT_IP,
        src_port_xlate: CLIENT_PORT,
        ..snat_conn(protocol)
    }
}

/// A TCP connection in the middle of its life: the client has sent up
/// to 1000 and the server up to 5000, each with a window of 8000.
pub fn established_tcp() -> ConnectionCreate {
    ConnectionCreate {
        src_tcp: TcpTrackInit {
            window_scale: 0,
            max_window: 8000,
            end: 1000,
            max_end: 1000 + 8000,
        },
        dest_tcp: TcpTrackInit {
            window_scale: 0,
            max_window: 8000,
            end: 5000,
            max_end: 5000 + 8000,
        },
        ..snat_conn(Protocol::TCP)
    }
}

/// Give each connection a distinct client port.
pub fn with_client_port(req: &ConnectionCreate, port: u16) -> ConnectionCreate {
    ConnectionCreate {
        src_port: port,
        src_port_xlate: port,
        ..req.clone()
    }
}
