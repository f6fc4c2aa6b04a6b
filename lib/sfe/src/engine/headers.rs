// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw views of the headers the fast path reads and rewrites.
//!
//! Each `*Raw` type mirrors the on-wire layout byte for byte and is
//! overlaid on the packet buffer with zerocopy. Multi-byte fields are
//! kept as byte arrays so the types stay unaligned; accessors do the
//! network-order conversion.

use sfe_api::Ipv6Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV6_HDR_SZ: usize = 40;
pub const IPV6_VERSION: u8 = 6;
/// The minimum size of any IPv6 extension header.
pub const IPV6_EXT_HDR_SZ: usize = 8;
pub const TCP_HDR_SZ: usize = 20;
pub const UDP_HDR_SZ: usize = 8;
pub const ICMP6_HDR_SZ: usize = 8;

pub const IPV6_EXT_HOP_BY_HOP: u8 = 0;
pub const IPV6_EXT_ROUTING: u8 = 43;
pub const IPV6_EXT_FRAGMENT: u8 = 44;
pub const IPV6_EXT_AH: u8 = 51;
pub const IPV6_EXT_DEST_OPTS: u8 = 60;
pub const IPV6_EXT_MOBILITY: u8 = 135;

/// Bits of the fragment header's offset field holding the offset.
pub const IPV6_FRAG_OFFSET_MASK: u16 = 0xFFF8;

/// The first 16 bits of the IPv6 header with the DSCP bits cleared.
pub const IPV6_DSCP_MASK: u16 = 0xF03F;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

pub const ICMP6_DST_UNREACH: u8 = 1;
pub const ICMP6_TIME_EXCEEDED: u8 = 3;

pub fn is_ext_hdr(next_hdr: u8) -> bool {
    matches!(
        next_hdr,
        IPV6_EXT_HOP_BY_HOP
            | IPV6_EXT_ROUTING
            | IPV6_EXT_FRAGMENT
            | IPV6_EXT_AH
            | IPV6_EXT_DEST_OPTS
            | IPV6_EXT_MOBILITY
    )
}

/// Overlay a header on the front of `bytes`, if there are enough of
/// them.
#[inline]
pub fn view<T>(bytes: &[u8]) -> Option<&T>
where
    T: FromBytes + KnownLayout + Immutable,
{
    T::ref_from_prefix(bytes).ok().map(|(hdr, _)| hdr)
}

#[inline]
pub fn view_mut<T>(bytes: &mut [u8]) -> Option<&mut T>
where
    T: FromBytes + IntoBytes + KnownLayout,
{
    T::mut_from_prefix(bytes).ok().map(|(hdr, _)| hdr)
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vtc_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6HdrRaw {
    pub fn version(&self) -> u8 {
        self.vtc_flow[0] >> 4
    }

    /// The full 8-bit traffic class.
    pub fn tclass(&self) -> u8 {
        (self.vtc_flow[0] << 4) | (self.vtc_flow[1] >> 4)
    }

    pub fn payload_len(&self) -> u16 {
        u16::from_be_bytes(self.payload_len)
    }

    pub fn src(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst)
    }

    /// Replace the DSCP bits. `dscp` is already shifted into its
    /// traffic-class position (`dscp << 2`); ECN is preserved.
    pub fn set_dscp(&mut self, dscp: u8) {
        let w = u16::from_be_bytes([self.vtc_flow[0], self.vtc_flow[1]]);
        let w = (w & IPV6_DSCP_MASK) | ((dscp as u16) << 4);
        let [b0, b1] = w.to_be_bytes();
        self.vtc_flow[0] = b0;
        self.vtc_flow[1] = b1;
    }
}

/// The common leading bytes of every extension header.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6ExtHdrRaw {
    pub next_hdr: u8,
    pub hdr_len: u8,
}

impl Ipv6ExtHdrRaw {
    /// Total length of this header in bytes.
    pub fn len(&self) -> usize {
        ((self.hdr_len as usize) << 3) + IPV6_EXT_HDR_SZ
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6FragHdrRaw {
    pub next_hdr: u8,
    pub reserved: u8,
    pub frag_off: [u8; 2],
    pub ident: [u8; 4],
}

impl Ipv6FragHdrRaw {
    pub fn offset(&self) -> u16 {
        u16::from_be_bytes(self.frag_off) & IPV6_FRAG_OFFSET_MASK
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub window: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl TcpHdrRaw {
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.seq)
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.ack)
    }

    /// The header length in bytes, options included.
    pub fn data_offset(&self) -> usize {
        ((self.offset >> 4) as usize) * 4
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.window)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub len: [u8; 2],
    pub csum: [u8; 2],
}

impl UdpHdrRaw {
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Icmpv6HdrRaw {
    pub ty: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub body: [u8; 4],
}

/// Why an extension header walk stopped short.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtWalkErr {
    /// The chain runs off the end of the buffer.
    Incomplete,
    /// The chain runs past the datagram's declared payload.
    DatagramIncomplete,
    /// A fragment header carries a non-zero offset.
    NonInitialFragment,
}

/// The result of walking past the extension headers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtWalk {
    /// The upper-layer protocol.
    pub proto: u8,
    /// Offset of the upper-layer header from the start of the IPv6
    /// header.
    pub l4_off: usize,
    /// At least one extension header was present.
    pub saw_ext: bool,
}

/// Walk the extension header chain of the IPv6 packet in `pkt`.
///
/// `dgram_len` bounds the walk to the declared datagram, which may be
/// shorter than the buffer. When `check_frag` is set, a non-initial
/// fragment stops the walk.
pub fn walk_ext_hdrs(
    pkt: &[u8],
    first: u8,
    dgram_len: usize,
    check_frag: bool,
) -> Result<ExtWalk, ExtWalkErr> {
    let mut next_hdr = first;
    let mut off = IPV6_HDR_SZ;
    let mut saw_ext = false;

    while is_ext_hdr(next_hdr) {
        saw_ext = true;
        let rest = pkt.get(off..).ok_or(ExtWalkErr::Incomplete)?;

        if check_frag && next_hdr == IPV6_EXT_FRAGMENT {
            let frag = view::<Ipv6FragHdrRaw>(rest)
                .ok_or(ExtWalkErr::Incomplete)?;
            if frag.offset() != 0 {
                return Err(ExtWalkErr::NonInitialFragment);
            }
        }

        let ext =
            view::<Ipv6ExtHdrRaw>(rest).ok_or(ExtWalkErr::Incomplete)?;
        off += ext.len();

        // There must be room for at least one more minimal header
        // after this one.
        if off + IPV6_EXT_HDR_SZ > pkt.len() {
            return Err(ExtWalkErr::Incomplete);
        }

        if off > dgram_len {
            return Err(ExtWalkErr::DatagramIncomplete);
        }

        next_hdr = ext.next_hdr;
    }

    Ok(ExtWalk { proto: next_hdr, l4_off: off, saw_ext })
}
