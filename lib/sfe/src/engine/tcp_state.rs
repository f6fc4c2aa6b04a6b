// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP window tracking and validation.
//!
//! Each direction of a TCP connection tracks the largest window it has
//! seen (`max_win`), the highest sequence number it has sent (`end`)
//! and the right edge its peer has advertised (`max_end`). A segment
//! is accepted on the fast path only if its sequence and
//! acknowledgement numbers fall inside the envelope these values
//! describe; anything else is handed back to the slow path, which
//! takes the connection with it.
//!
//! All sequence arithmetic is modulo 2^32 and all comparisons are
//! made on the signed difference.

use super::conn::Direction;
use super::headers::TCP_ACK;
use super::headers::TCP_FIN;
use super::headers::TCP_HDR_SZ;
use super::headers::TCP_RST;
use super::headers::TCP_SYN;
use super::headers::TcpHdrRaw;
use sfe_api::ExceptionEvent;
use sfe_api::TcpTrackInit;
use sfe_api::TcpWindowSnap;

/// How far behind the peer's `end` an acknowledgement may fall, on
/// top of the window.
pub const MAX_ACK_WINDOW: u32 = 65520;

pub const TCPOPT_EOL: u8 = 0;
pub const TCPOPT_NOP: u8 = 1;
pub const TCPOPT_SACK: u8 = 5;
pub const TCPOPT_TIMESTAMP: u8 = 8;
pub const TCPOLEN_TIMESTAMP: u8 = 10;
pub const TCPOLEN_SACK_PERBLOCK: usize = 8;

/// The flags that decide whether a segment may take the fast path.
const TCP_FLAGS_CHECKED: u8 = TCP_SYN | TCP_RST | TCP_FIN | TCP_ACK;

/// Is this a plain ACK, ignoring PSH/URG/ECN bits?
#[inline]
pub fn is_pure_ack(flags: u8) -> bool {
    flags & TCP_FLAGS_CHECKED == TCP_ACK
}

/// `a > b` in sequence space.
#[inline]
fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// `a < b` in sequence space.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Window tracking state for one direction of a connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpTracker {
    pub window_scale: u8,
    /// Largest window seen; never zero.
    pub max_win: u32,
    /// Highest sequence number sent, plus one.
    pub end: u32,
    /// Right edge of the window advertised by the peer.
    pub max_end: u32,
}

impl TcpTracker {
    /// Raise the tracked values to those of `init`, where `init` is
    /// ahead. The window scale is fixed at creation.
    pub fn raise_to(&mut self, init: &TcpTrackInit) {
        if seq_gt(init.max_window, self.max_win) {
            self.max_win = init.max_window;
        }

        if seq_gt(init.end, self.end) {
            self.end = init.end;
        }

        if seq_gt(init.max_end, self.max_end) {
            self.max_end = init.max_end;
        }
    }

    pub fn snap(&self) -> TcpWindowSnap {
        TcpWindowSnap {
            max_win: self.max_win,
            end: self.end,
            max_end: self.max_end,
        }
    }
}

/// The lowest sequence number (end of segment) the receiver will
/// accept from the sender tracked by `cm`, given its peer `counter`.
#[inline]
pub fn seq_left_edge(cm: &TcpTracker, counter: &TcpTracker) -> u32 {
    cm.end.wrapping_sub(counter.max_win).wrapping_sub(1)
}

/// Scan the TCP options for SACK blocks, returning the effective
/// acknowledgement: the highest SACK right edge if it is beyond `ack`,
/// otherwise `ack`. Returns `None` for a malformed option list.
///
/// `opts` is the option area, i.e. the bytes between the fixed header
/// and the data offset.
pub fn parse_sack(opts: &[u8], ack: u32) -> Option<u32> {
    // The overwhelmingly common case is a bare timestamp option.
    if opts.len() == TCPOLEN_TIMESTAMP as usize + 2
        && opts[0] == TCPOPT_NOP
        && opts[1] == TCPOPT_NOP
        && opts[2] == TCPOPT_TIMESTAMP
        && opts[3] == TCPOLEN_TIMESTAMP
    {
        return Some(ack);
    }

    let mut sack = ack;
    let mut pos = 0;

    while pos < opts.len() {
        let kind = opts[pos];

        if kind == TCPOPT_NOP {
            pos += 1;
            continue;
        }

        if kind == TCPOPT_EOL {
            break;
        }

        let size = *opts.get(pos + 1)? as usize;

        if kind == TCPOPT_SACK {
            if size < 2 + TCPOLEN_SACK_PERBLOCK
                || (size - 2) % TCPOLEN_SACK_PERBLOCK != 0
                || size > opts.len() - pos
            {
                return None;
            }

            // Each block is a (left, right) pair; only right edges
            // matter.
            let blocks = &opts[pos + 2..pos + size];
            let max_re = blocks
                .chunks_exact(TCPOLEN_SACK_PERBLOCK)
                .map(|b| u32::from_be_bytes([b[4], b[5], b[6], b[7]]))
                .max()
                .unwrap_or(0);

            if max_re > sack {
                sack = max_re;
            }

            pos += size;
            continue;
        }

        if size < 2 {
            return None;
        }

        pos += size;
    }

    Some(sack)
}

/// Validate a segment against the window envelope and, when it passes,
/// fold it into the trackers.
///
/// `seg` is the whole TCP segment (header, options and payload) as
/// bounded by the datagram length. On rejection the trackers are left
/// untouched.
pub fn check_window(
    trackers: &mut [TcpTracker; 2],
    dir: Direction,
    seg: &[u8],
    tcp: &TcpHdrRaw,
) -> Result<(), ExceptionEvent> {
    let cm = trackers[dir.index()];
    let counter = trackers[dir.flip().index()];

    let seq = tcp.seq();
    let ack = tcp.ack();

    if seq_gt(seq, cm.max_end.wrapping_add(1)) {
        return Err(ExceptionEvent::TcpSeqExceedsRightEdge);
    }

    let data_offs = tcp.data_offset();
    if data_offs < TCP_HDR_SZ {
        return Err(ExceptionEvent::TcpSmallDataOffs);
    }

    // A truncated option area is reported as a bad data offset
    // below rather than as a bad SACK.
    let mut sack = ack;
    if data_offs > TCP_HDR_SZ && seg.len() >= data_offs {
        sack = parse_sack(&seg[TCP_HDR_SZ..data_offs], ack)
            .ok_or(ExceptionEvent::TcpBadSack)?;
    }

    if seg.len() < data_offs {
        return Err(ExceptionEvent::TcpBigDataOffs);
    }

    let payload_len = (seg.len() - data_offs) as u32;
    let end = seq.wrapping_add(payload_len);

    if seq_lt(end, seq_left_edge(&cm, &counter)) {
        return Err(ExceptionEvent::TcpSeqBeforeLeftEdge);
    }

    if seq_gt(sack, counter.end.wrapping_add(1)) {
        return Err(ExceptionEvent::TcpAckExceedsRightEdge);
    }

    let ack_left_edge = counter
        .end
        .wrapping_sub(cm.max_win)
        .wrapping_sub(MAX_ACK_WINDOW)
        .wrapping_sub(1);
    if seq_lt(sack, ack_left_edge) {
        return Err(ExceptionEvent::TcpAckBeforeLeftEdge);
    }

    // RFC 7323 caps the shift at 14. SACKed data past the ack widens
    // the window by the same amount.
    let scaled_win = ((tcp.window() as u32) << cm.window_scale.min(14))
        .wrapping_add(sack.wrapping_sub(ack));

    let cm = &mut trackers[dir.index()];
    if cm.max_win < scaled_win {
        cm.max_win = scaled_win;
    }

    if seq_gt(end, cm.end) {
        cm.end = end;
    }

    let max_end = sack.wrapping_add(scaled_win);
    let counter = &mut trackers[dir.flip().index()];
    if seq_gt(max_end, counter.max_end) {
        counter.max_end = max_end;
    }

    Ok(())
}
