// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Build IPv6 packets byte by byte.
//!
//! Every builder produces a packet starting at the IPv6 header with a
//! correct payload length and a valid transport checksum, so tests can
//! check that a rewrite preserved it.

use sfe::api::Ipv6Addr;
use sfe::api::Protocol;
use sfe::engine::checksum::Checksum;
use sfe::engine::headers::ICMP6_HDR_SZ;
use sfe::engine::headers::IPV6_EXT_DEST_OPTS;
use sfe::engine::headers::IPV6_EXT_FRAGMENT;
use sfe::engine::headers::IPV6_HDR_SZ;
use sfe::engine::headers::TCP_ACK;
use sfe::engine::headers::TCP_HDR_SZ;
use sfe::engine::headers::UDP_HDR_SZ;

pub const DEFAULT_HOP_LIMIT: u8 = 64;

/// The fields of a TCP segment that tests care about.
#[derive(Clone, Debug)]
pub struct TcpSeg {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    /// Raw option bytes; must be a multiple of four long.
    pub opts: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSeg {
    /// A pure ACK with no payload.
    pub fn ack(seq: u32, ack: u32) -> Self {
        Self {
            seq,
            ack,
            flags: TCP_ACK,
            window: 8000,
            opts: vec![],
            payload: vec![],
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, len: usize) -> Self {
        self.payload = vec![0x5A; len];
        self
    }

    pub fn with_opts(mut self, opts: &[u8]) -> Self {
        assert_eq!(opts.len() % 4, 0, "TCP options must be word aligned");
        self.opts = opts.to_vec();
        self
    }
}

fn pseudo_hdr(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    proto: Protocol,
    len: usize,
) -> Checksum {
    let mut c = Checksum::new();
    c.add_bytes(&src.bytes());
    c.add_bytes(&dst.bytes());
    c.add_bytes(&(len as u32).to_be_bytes());
    c.add_bytes(&[0, 0, 0, u8::from(proto)]);
    c
}

/// Wrap `l4` in an IPv6 header.
pub fn ipv6(src: Ipv6Addr, dst: Ipv6Addr, proto: u8, l4: &[u8]) -> Vec<u8> {
    let mut b = vec![0x60, 0, 0, 0];
    b.extend_from_slice(&(l4.len() as u16).to_be_bytes());
    b.push(proto);
    b.push(DEFAULT_HOP_LIMIT);
    b.extend_from_slice(&src.bytes());
    b.extend_from_slice(&dst.bytes());
    b.extend_from_slice(l4);
    b
}

pub fn udp6(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let len = UDP_HDR_SZ + payload.len();
    let mut l4 = Vec::with_capacity(len);
    l4.extend_from_slice(&sport.to_be_bytes());
    l4.extend_from_slice(&dport.to_be_bytes());
    l4.extend_from_slice(&(len as u16).to_be_bytes());
    l4.extend_from_slice(&[0, 0]);
    l4.extend_from_slice(payload);

    let mut csum = pseudo_hdr(&src, &dst, Protocol::UDP, len);
    csum.add_bytes(&l4);
    l4[6..8].copy_from_slice(&csum.header_bytes());
    ipv6(src, dst, u8::from(Protocol::UDP), &l4)
}

pub fn tcp6(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    sport: u16,
    dport: u16,
    seg: &TcpSeg,
) -> Vec<u8> {
    let doff = TCP_HDR_SZ + seg.opts.len();
    let mut l4 = vec![0u8; TCP_HDR_SZ];
    l4[0..2].copy_from_slice(&sport.to_be_bytes());
    l4[2..4].copy_from_slice(&dport.to_be_bytes());
    l4[4..8].copy_from_slice(&seg.seq.to_be_bytes());
    l4[8..12].copy_from_slice(&seg.ack.to_be_bytes());
    l4[12] = ((doff / 4) as u8) << 4;
    l4[13] = seg.flags;
    l4[14..16].copy_from_slice(&seg.window.to_be_bytes());
    l4.extend_from_slice(&seg.opts);
    l4.extend_from_slice(&seg.payload);

    let mut csum = pseudo_hdr(&src, &dst, Protocol::TCP, l4.len());
    csum.add_bytes(&l4);
    l4[16..18].copy_from_slice(&csum.header_bytes());
    ipv6(src, dst, u8::from(Protocol::TCP), &l4)
}

/// An ICMPv6 error of type `ty` quoting `quoted`, which is itself an
/// IPv6 packet.
pub fn icmp6_error(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    ty: u8,
    quoted: &[u8],
) -> Vec<u8> {
    let mut l4 = vec![0u8; ICMP6_HDR_SZ];
    l4[0] = ty;
    l4.extend_from_slice(quoted);

    let mut csum = pseudo_hdr(&src, &dst, Protocol::ICMPv6, l4.len());
    csum.add_bytes(&l4);
    l4[2..4].copy_from_slice(&csum.header_bytes());
    ipv6(src, dst, u8::from(Protocol::ICMPv6), &l4)
}

pub fn hop_limit(pkt: &[u8]) -> u8 {
    pkt[7]
}

pub fn set_hop_limit(pkt: &mut [u8], hl: u8) {
    pkt[7] = hl;
}

/// Insert an 8-byte extension header of type `kind` directly after the
/// IPv6 header. For a fragment header `frag_off` is the offset in
/// 8-byte units; it is ignored otherwise.
pub fn insert_ext_hdr(pkt: &[u8], kind: u8, frag_off: u16) -> Vec<u8> {
    let mut ext = [0u8; 8];
    ext[0] = pkt[6];
    if kind == IPV6_EXT_FRAGMENT {
        ext[2..4].copy_from_slice(&(frag_off << 3).to_be_bytes());
    }

    let payload_len = u16::from_be_bytes([pkt[4], pkt[5]]) + 8;
    let mut out = pkt[..IPV6_HDR_SZ].to_vec();
    out[4..6].copy_from_slice(&payload_len.to_be_bytes());
    out[6] = kind;
    out.extend_from_slice(&ext);
    out.extend_from_slice(&pkt[IPV6_HDR_SZ..]);
    out
}

/// Insert an empty destination options header.
pub fn with_dest_opts(pkt: &[u8]) -> Vec<u8> {
    insert_ext_hdr(pkt, IPV6_EXT_DEST_OPTS, 0)
}

/// Verify the transport checksum of an IPv6 packet with no extension
/// headers.
pub fn l4_csum_ok(pkt: &[u8]) -> bool {
    let src = Ipv6Addr::from(addr_at(pkt, 8));
    let dst = Ipv6Addr::from(addr_at(pkt, 24));
    let proto = Protocol::from(pkt[6]);
    let l4 = &pkt[IPV6_HDR_SZ..];
    let mut c = pseudo_hdr(&src, &dst, proto, l4.len());
    c.add_bytes(l4);
    c.finalize() == 0xFFFF
}

fn addr_at(pkt: &[u8], off: usize) -> [u8; 16] {
    let mut a = [0u8; 16];
    a.copy_from_slice(&pkt[off..off + 16]);
    a
}

/// The source address and port of an IPv6 packet with no extension
/// headers.
pub fn src_of(pkt: &[u8]) -> (Ipv6Addr, u16) {
    let port = u16::from_be_bytes([pkt[40], pkt[41]]);
    (Ipv6Addr::from(addr_at(pkt, 8)), port)
}

/// The destination address and port of an IPv6 packet with no
/// extension headers.
pub fn dst_of(pkt: &[u8]) -> (Ipv6Addr, u16) {
    let port = u16::from_be_bytes([pkt[42], pkt[43]]);
    (Ipv6Addr::from(addr_at(pkt, 24)), port)
}
