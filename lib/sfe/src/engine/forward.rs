// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The description of a forwarded packet.
//!
//! The engine never owns packet buffers. When a packet may take the
//! fast path it hands back a [`Forward`] which says where the packet
//! goes and how it must be rewritten first; [`Forward::apply`] performs
//! the IPv6 and transport rewrite on the caller's buffer and the L2
//! header is left to whoever builds the frame.

use super::conn::Connection;
use super::conn::MatchFlags;
use super::conn::Xlate;
use super::flow_table::MatchId;
use super::headers::IPV6_HDR_SZ;
use super::headers::Ipv6HdrRaw;
use super::headers::TCP_HDR_SZ;
use super::headers::TcpHdrRaw;
use super::headers::UDP_HDR_SZ;
use super::headers::UdpHdrRaw;
use super::headers::view_mut;
use alloc::sync::Arc;
use sfe_api::MacAddr;
use sfe_api::NetDev;
use sfe_api::Protocol;

/// The link-layer header to put on the packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct L2Rewrite {
    pub src: MacAddr,
    pub dst: MacAddr,
    /// A plain Ethernet header will do.
    pub fast_eth: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("packet too short for an IPv6 header ({0} bytes)")]
    Ipv6Truncated(usize),

    #[error("packet too short for a {0} header at offset {1}")]
    L4Truncated(Protocol, usize),
}

/// Where and how to forward one packet.
#[derive(Clone, Debug)]
pub struct Forward {
    /// The match the packet hit.
    pub id: MatchId,
    pub xmit_dev: Arc<NetDev>,
    pub mtu: u32,
    /// `None` when the egress device takes no L2 header.
    pub l2: Option<L2Rewrite>,
    pub xlate_src: Option<Xlate>,
    pub xlate_dest: Option<Xlate>,
    /// The DSCP to stamp, already shifted into its traffic-class
    /// position.
    pub dscp: Option<u8>,
    pub priority: Option<u32>,
    pub mark: u32,
    pub protocol: Protocol,
    /// Offset of the transport header.
    pub l4_off: usize,
}

impl Forward {
    pub(crate) fn new(id: MatchId, conn: &Connection, l4_off: usize) -> Self {
        let cm = conn.cm(id.dir);
        let l2 = cm.flags.contains(MatchFlags::WRITE_L2_HDR).then(|| {
            L2Rewrite {
                src: cm.xmit_src_mac,
                dst: cm.xmit_dest_mac,
                fast_eth: cm.flags.contains(MatchFlags::WRITE_FAST_ETH_HDR),
            }
        });

        Self {
            id,
            xmit_dev: cm.xmit_dev.clone(),
            mtu: cm.xmit_mtu,
            l2,
            xlate_src: cm.xlate_src,
            xlate_dest: cm.xlate_dest,
            dscp: cm.flags.contains(MatchFlags::DSCP_REMARK).then_some(cm.dscp),
            priority: cm
                .flags
                .contains(MatchFlags::PRIORITY_REMARK)
                .then_some(cm.priority),
            mark: conn.mark,
            protocol: conn.protocol,
            l4_off,
        }
    }

    /// Rewrite the packet in `pkt`, which starts at its IPv6 header:
    /// decrement the hop limit, remark DSCP, translate addresses and
    /// ports, and patch the transport checksum.
    ///
    /// Nothing is written unless every header to be touched is
    /// present.
    pub fn apply(&self, pkt: &mut [u8]) -> Result<(), RewriteError> {
        if pkt.len() < IPV6_HDR_SZ {
            return Err(RewriteError::Ipv6Truncated(pkt.len()));
        }

        let l4_need = match self.protocol {
            Protocol::TCP => TCP_HDR_SZ,
            Protocol::UDP => UDP_HDR_SZ,
            _ => 0,
        };

        if pkt.len() < self.l4_off + l4_need {
            return Err(RewriteError::L4Truncated(self.protocol, self.l4_off));
        }

        let (l3, rest) = pkt.split_at_mut(IPV6_HDR_SZ);
        let ip = view_mut::<Ipv6HdrRaw>(l3)
            .ok_or(RewriteError::Ipv6Truncated(IPV6_HDR_SZ))?;

        ip.hop_limit = ip.hop_limit.saturating_sub(1);

        if let Some(dscp) = self.dscp {
            ip.set_dscp(dscp);
        }

        if let Some(x) = &self.xlate_src {
            ip.src = x.ip.bytes();
        }

        if let Some(x) = &self.xlate_dest {
            ip.dst = x.ip.bytes();
        }

        let l4 = &mut rest[self.l4_off.saturating_sub(IPV6_HDR_SZ)..];
        match self.protocol {
            Protocol::TCP => {
                let tcp = view_mut::<TcpHdrRaw>(l4).ok_or(
                    RewriteError::L4Truncated(self.protocol, self.l4_off),
                )?;

                if let Some(x) = &self.xlate_src {
                    tcp.src_port = x.port.to_be_bytes();
                    tcp.csum = x.csum_adjust.apply(tcp.csum);
                }

                if let Some(x) = &self.xlate_dest {
                    tcp.dst_port = x.port.to_be_bytes();
                    tcp.csum = x.csum_adjust.apply(tcp.csum);
                }
            }

            Protocol::UDP => {
                let udp = view_mut::<UdpHdrRaw>(l4).ok_or(
                    RewriteError::L4Truncated(self.protocol, self.l4_off),
                )?;

                // A zero UDP checksum means none was computed.
                let has_csum = udp.csum != [0, 0];

                if let Some(x) = &self.xlate_src {
                    udp.src_port = x.port.to_be_bytes();
                    if has_csum {
                        udp.csum = x.csum_adjust.apply(udp.csum);
                    }
                }

                if let Some(x) = &self.xlate_dest {
                    udp.dst_port = x.port.to_be_bytes();
                    if has_csum {
                        udp.csum = x.csum_adjust.apply(udp.csum);
                    }
                }
            }

            _ => {}
        }

        Ok(())
    }
}
