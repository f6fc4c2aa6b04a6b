// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The diagnostic dump.
//!
//! The dump is an XML-ish document describing every connection, every
//! exception kind that has fired, and the engine totals:
//!
//! ```text
//! <sfe_ipv6>
//!     <connections>
//!         <connection protocol="6" src_dev="lan0" ... mark="00000000" />
//!     </connections>
//!     <exceptions>
//!         <exception name="TCP_FLAGS" count="3" />
//!     </exceptions>
//!     <stats num_connections="1" ... />
//! </sfe_ipv6>
//! ```
//!
//! It is produced by a cursor ([`DumpWriter`]) one line at a time into
//! buffers the caller supplies, so a large table never has to be
//! rendered in one go and the table lock is only held per line.
//!
//! Each dump takes a fresh read sequence number. A connection is
//! emitted only while its own sequence number is behind the dump's and
//! is stamped with the dump's number once emitted; connections created
//! during the dump are stamped at creation and so never show up. A
//! connection removed before the cursor reaches it is simply not
//! emitted. Only one dump should be in progress at a time: two cursors
//! stamp over each other's connections.

use super::conn::Connection;
use super::conn::Direction;
use super::flow_table::FlowTable;
use super::stat::EngineStats;
use alloc::string::String;
use core::fmt::Write;
use core::sync::atomic::Ordering;
use sfe_api::ConnectionDump;
use sfe_api::DirectionDump;
use sfe_api::ExceptionEvent;

/// The longest single line the dump produces.
pub const DUMP_MSG_MAX: usize = 1024;

type DumpMsg = heapless::String<DUMP_MSG_MAX>;

/// Where the cursor is in the document.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum DumpState {
    Start,
    ConnectionsStart,
    ConnectionsConnection,
    ConnectionsEnd,
    ExceptionsStart,
    ExceptionsException,
    ExceptionsEnd,
    Stats,
    End,
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DumpProgress {
    /// Bytes written into the buffer.
    pub written: usize,
    /// The document is complete.
    pub done: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DumpError {
    #[error("buffer too small: next line needs {needed} bytes")]
    BufferTooSmall { needed: usize },

    #[error("dump line exceeds {} bytes", DUMP_MSG_MAX)]
    LineTooLong,
}

/// What the engine needs to hand a cursor for it to produce a line.
pub(crate) struct DumpSource<'a> {
    pub table: &'a FlowTable,
    pub stats: &'a EngineStats,
}

/// Sequence numbers wrap; compare on the signed difference.
fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// A resumable position in the dump.
#[derive(Clone, Debug)]
pub struct DumpWriter {
    state: DumpState,
    iter_exception: usize,
    read_seq: u32,
}

/// Side effects of a line, applied only once it has been copied out.
enum Commit<'a> {
    Stamp(&'a Connection),
    NextException(usize),
    Nothing,
}

impl DumpWriter {
    pub(crate) fn new(read_seq: u32) -> Self {
        Self { state: DumpState::Start, iter_exception: 0, read_seq }
    }

    pub fn state(&self) -> DumpState {
        self.state
    }

    pub fn read_seq(&self) -> u32 {
        self.read_seq
    }

    pub fn is_done(&self) -> bool {
        self.state == DumpState::Done
    }

    /// Write the next line into `buf`.
    ///
    /// A state with nothing to say (no connections left, no more
    /// non-zero exceptions) is passed over, so every call that isn't
    /// done writes exactly one line. If the line doesn't fit, nothing
    /// is written and the cursor stays put.
    pub(crate) fn next_line(
        &mut self,
        src: &DumpSource,
        buf: &mut [u8],
    ) -> Result<DumpProgress, DumpError> {
        use DumpState::*;

        loop {
            let mut msg = DumpMsg::new();
            let mut commit = Commit::Nothing;

            let next = match self.state {
                Start => {
                    line(&mut msg, format_args!("<sfe_ipv6>\n"))?;
                    ConnectionsStart
                }

                ConnectionsStart => {
                    line(&mut msg, format_args!("\t<connections>\n"))?;
                    ConnectionsConnection
                }

                ConnectionsConnection => {
                    let pending = src.table.iter().find(|(_, c)| {
                        seq_before(
                            c.debug_read_seq.load(Ordering::Relaxed),
                            self.read_seq,
                        )
                    });

                    let Some((_, conn)) = pending else {
                        self.state = ConnectionsEnd;
                        continue;
                    };

                    write_connection(&mut msg, &conn_dump(conn))?;
                    commit = Commit::Stamp(conn);
                    ConnectionsConnection
                }

                ConnectionsEnd => {
                    line(&mut msg, format_args!("\t</connections>\n"))?;
                    ExceptionsStart
                }

                ExceptionsStart => {
                    line(&mut msg, format_args!("\t<exceptions>\n"))?;
                    ExceptionsException
                }

                ExceptionsException => {
                    let pending = ExceptionEvent::ALL
                        .iter()
                        .enumerate()
                        .skip(self.iter_exception)
                        .map(|(i, ev)| (i, ev, src.stats.exception_count(*ev)))
                        .find(|(_, _, count)| *count != 0);

                    let Some((i, ev, count)) = pending else {
                        self.state = ExceptionsEnd;
                        continue;
                    };

                    line(
                        &mut msg,
                        format_args!(
                            "\t\t<exception name=\"{}\" count=\"{}\" />\n",
                            ev.name(),
                            count
                        ),
                    )?;
                    commit = Commit::NextException(i + 1);
                    ExceptionsException
                }

                ExceptionsEnd => {
                    line(&mut msg, format_args!("\t</exceptions>\n"))?;
                    Stats
                }

                Stats => {
                    write_stats(&mut msg, src)?;
                    End
                }

                End => {
                    line(&mut msg, format_args!("</sfe_ipv6>\n"))?;
                    Done
                }

                Done => return Ok(DumpProgress { written: 0, done: true }),
            };

            let bytes = msg.as_bytes();
            if bytes.len() > buf.len() {
                return Err(DumpError::BufferTooSmall { needed: bytes.len() });
            }
            buf[..bytes.len()].copy_from_slice(bytes);

            match commit {
                Commit::Stamp(conn) => {
                    conn.debug_read_seq.store(self.read_seq, Ordering::Relaxed)
                }
                Commit::NextException(i) => self.iter_exception = i,
                Commit::Nothing => {}
            }

            self.state = next;
            return Ok(DumpProgress {
                written: bytes.len(),
                done: self.state == Done,
            });
        }
    }

    /// Fill `buf` with as many whole lines as fit, returning the number
    /// of bytes written. Zero means the dump is complete.
    pub(crate) fn fill(
        &mut self,
        src: &DumpSource,
        buf: &mut [u8],
    ) -> Result<usize, DumpError> {
        let mut off = 0;

        while !self.is_done() {
            match self.next_line(src, &mut buf[off..]) {
                Ok(p) => off += p.written,
                Err(DumpError::BufferTooSmall { .. }) if off > 0 => break,
                Err(e) => return Err(e),
            }
        }

        Ok(off)
    }
}

fn line(
    msg: &mut DumpMsg,
    args: core::fmt::Arguments,
) -> Result<(), DumpError> {
    msg.write_fmt(args).map_err(|_| DumpError::LineTooLong)
}

fn write_connection(
    msg: &mut DumpMsg,
    d: &ConnectionDump,
) -> Result<(), DumpError> {
    line(
        msg,
        format_args!(
            "\t\t<connection protocol=\"{}\" ",
            u8::from(d.protocol)
        ),
    )?;

    for (p, dd) in [("src", &d.src), ("dest", &d.dest)] {
        line(
            msg,
            format_args!(
                "{p}_dev=\"{}\" {p}_ip=\"{}\" {p}_ip_xlate=\"{}\" \
                 {p}_port=\"{}\" {p}_port_xlate=\"{}\" \
                 {p}_priority=\"{}\" {p}_dscp=\"{}\" \
                 {p}_rx_pkts=\"{}\" {p}_rx_bytes=\"{}\" ",
                dd.dev,
                dd.ip,
                dd.ip_xlate,
                dd.port,
                dd.port_xlate,
                dd.priority,
                dd.dscp,
                dd.rx_packets,
                dd.rx_bytes,
            ),
        )?;
    }

    line(
        msg,
        format_args!(
            "last_sync=\"{}\" mark=\"{:08x}\" />\n",
            d.last_sync, d.mark
        ),
    )
}

fn write_stats(msg: &mut DumpMsg, src: &DumpSource) -> Result<(), DumpError> {
    let s = src.stats.snap(src.table.num_connections());
    line(
        msg,
        format_args!(
            "\t<stats num_connections=\"{}\" \
             pkts_forwarded=\"{}\" pkts_not_forwarded=\"{}\" \
             create_requests=\"{}\" create_collisions=\"{}\" \
             destroy_requests=\"{}\" destroy_misses=\"{}\" \
             flushes=\"{}\" hash_hits=\"{}\" hash_reorders=\"{}\" />\n",
            s.num_connections,
            s.packets_forwarded,
            s.packets_not_forwarded,
            s.connection_create_requests,
            s.connection_create_collisions,
            s.connection_destroy_requests,
            s.connection_destroy_misses,
            s.connection_flushes,
            s.connection_match_hash_hits,
            s.connection_match_hash_reorders,
        ),
    )
}

/// A point-in-time view of `conn`. Counters include whatever is
/// pending in the current sync period.
pub fn conn_dump(conn: &Connection) -> ConnectionDump {
    let dir = |dir: Direction| {
        let cm = conn.cm(dir);
        let (ip, ip_xlate, port, port_xlate) = match dir {
            Direction::Original => (
                conn.src_ip,
                conn.src_ip_xlate,
                conn.src_port,
                conn.src_port_xlate,
            ),
            Direction::Reply => (
                conn.dest_ip,
                conn.dest_ip_xlate,
                conn.dest_port,
                conn.dest_port_xlate,
            ),
        };

        DirectionDump {
            dev: String::from(cm.match_dev.name.as_str()),
            ip,
            ip_xlate,
            port,
            port_xlate,
            priority: cm.priority,
            dscp: cm.dscp_codepoint(),
            rx_packets: cm.counters.rx_packets.total(),
            rx_bytes: cm.counters.rx_bytes.total(),
        }
    };

    ConnectionDump {
        protocol: conn.protocol,
        src: dir(Direction::Original),
        dest: dir(Direction::Reply),
        last_sync: conn.last_sync.load(Ordering::Relaxed),
        mark: conn.mark,
    }
}
