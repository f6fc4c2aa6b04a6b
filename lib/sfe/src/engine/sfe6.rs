// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The IPv6 engine instance.
//!
//! # Locking
//!
//! The [`FlowTable`] sits behind a reader/writer lock. The packet path,
//! the sync pass and the dump take it shared; anything that adds or
//! removes connections, or changes a connection's flags, takes it
//! exclusive. Under the table lock sit, in no particular order, the
//! per-bucket chain locks, the per-connection TCP lock and the active
//! list lock; none of them is ever held while acquiring the table lock.
//!
//! Sync records are built under the table lock and delivered after it
//! is dropped, so a callback never runs with an engine lock held.
//! Flow-cookie programming is the exception: it happens with the table
//! held exclusive, between inserting a connection and making it
//! visible to the caller.

use super::ProcessResult;
use super::RxPacket;
use super::Verdict;
use super::conn::Connection;
use super::conn::Direction;
use super::cookie::CookieAssign;
use super::cookie::FlowCookieOffload;
use super::dump::DumpError;
use super::dump::DumpProgress;
use super::dump::DumpSource;
use super::dump::DumpWriter;
use super::dump::conn_dump;
use super::flow_table::ConnId;
use super::flow_table::FlowTable;
use super::flow_table::InsertError;
use super::forward::Forward;
use super::ip6;
use super::stat::EngineStats;
use super::sync;
use super::sync::SyncRuleCallback;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KRwLock;
use crate::ddi::time::Moment;
use crate::ddi::time::Periodic;
use crate::provider::ExecCtx;
use crate::provider::LogLevel;
use alloc::sync::Arc;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use core::time::Duration;
use sfe_api::ConnKey;
use sfe_api::ConnectionCreate;
use sfe_api::ConnectionDump;
use sfe_api::ConnectionSync;
use sfe_api::DestroyResult;
use sfe_api::ExceptionEvent;
use sfe_api::NetDev;
use sfe_api::Sfe6Config;
use sfe_api::SfeError;
use sfe_api::StatsSnap;
use sfe_api::SyncReason;

/// The name given to the sync timer thread.
pub const SYNC_THREAD_NAME: &str = "sfe6-sync";

struct Sfe6Inner {
    ectx: Arc<ExecCtx>,
    cfg: Sfe6Config,
    table: KRwLock<FlowTable>,
    stats: EngineStats,
    sync_cb: KRwLock<Option<Arc<dyn SyncRuleCallback>>>,
    cookie_offload: KRwLock<Option<Arc<dyn FlowCookieOffload>>>,
    epoch: Moment,
    debug_read_seq: AtomicU32,
}

impl Sfe6Inner {
    /// Milliseconds since the engine was created.
    fn now_ms(&self) -> u64 {
        Moment::now().delta_as_millis(self.epoch)
    }

    fn deliver(&self, recs: &[ConnectionSync]) {
        if recs.is_empty() {
            return;
        }

        // Load once: a callback swapped mid-delivery only sees the
        // next batch.
        let cb = self.sync_cb.read().clone();
        if let Some(cb) = cb {
            for rec in recs {
                cb.sync(rec);
            }
        }
    }

    fn sync_pass(&self) -> usize {
        let recs = {
            let table = self.table.read();
            sync::sync_pass(&table, &self.stats, self.now_ms())
        };

        self.deliver(&recs);
        recs.len()
    }

    /// Take a connection out of the table and build its final record.
    fn remove_locked(
        &self,
        table: &mut FlowTable,
        id: ConnId,
        reason: SyncReason,
    ) -> Option<ConnectionSync> {
        let conn = table.remove(id)?;
        self.stats.connection_flushes.incr();

        let offload = self.cookie_offload.read().clone();
        let now = Moment::now();
        for dir in Direction::BOTH {
            let cm = conn.cm(dir);
            let cookie = cm.flow_cookie();
            if cookie != 0 {
                table.cookies.release(
                    cookie,
                    &cm.key.tuple(),
                    offload.as_deref(),
                    now,
                );
            }
        }

        Some(sync::gen_sync(&conn, reason, self.now_ms()))
    }

    fn assign_cookies(&self, table: &mut FlowTable, id: ConnId) {
        if !table.cookies.is_enabled() {
            return;
        }

        let Some(offload) = self.cookie_offload.read().clone() else {
            return;
        };

        let now = Moment::now();
        for dir in Direction::BOTH {
            let Some(tuple) = table.cm(id.cm(dir)).map(|cm| cm.key.tuple())
            else {
                return;
            };

            match table.cookies.assign(id.cm(dir), &tuple, &*offload, now) {
                CookieAssign::Assigned(cookie) => {
                    if let Some(cm) = table.cm(id.cm(dir)) {
                        cm.flow_cookie.store(cookie as u32, Ordering::Relaxed);
                    }
                }

                fail => {
                    self.stats.exception(ExceptionEvent::FlowCookieAddFail);
                    self.ectx.log.log(
                        LogLevel::Warn,
                        &format!("no flow cookie for {tuple}: {fail:?}"),
                    );
                }
            }
        }
    }
}

/// An IPv6 shortcut forwarding engine.
pub struct Sfe6 {
    inner: Arc<Sfe6Inner>,
    periodic: KMutex<Option<Periodic>>,
}

impl Sfe6 {
    /// Create an engine. Unless `cfg.sync_interval_ms` is zero this
    /// also starts the sync timer thread.
    pub fn new(cfg: Sfe6Config, ectx: Arc<ExecCtx>) -> std::io::Result<Self> {
        let inner = Arc::new(Sfe6Inner {
            ectx,
            table: KRwLock::new(FlowTable::new(&cfg)),
            stats: EngineStats::default(),
            sync_cb: KRwLock::new(None),
            cookie_offload: KRwLock::new(None),
            epoch: Moment::now(),
            debug_read_seq: AtomicU32::new(0),
            cfg,
        });

        let periodic = if inner.cfg.sync_interval_ms != 0 {
            let weak: Weak<Sfe6Inner> = Arc::downgrade(&inner);
            let interval = Duration::from_millis(inner.cfg.sync_interval_ms);
            Some(Periodic::new(SYNC_THREAD_NAME, interval, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.sync_pass();
                }
            })?)
        } else {
            None
        };

        Ok(Self { inner, periodic: KMutex::new(periodic) })
    }

    pub fn config(&self) -> &Sfe6Config {
        &self.inner.cfg
    }

    pub fn num_connections(&self) -> u32 {
        self.inner.table.read().num_connections()
    }

    /// Install a shortcut for a connection the connection manager has
    /// classified.
    ///
    /// If the connection, or either of its matches, already exists the
    /// request fails and the existing connection is left as it was.
    /// Use [`Sfe6::update_connection`] to carry newer tracking state
    /// over to it.
    pub fn create_connection(
        &self,
        req: &ConnectionCreate,
    ) -> Result<ConnId, SfeError> {
        let inner = &*self.inner;
        inner.stats.connection_create_requests.incr();

        let conn = Connection::from_create(req, inner.now_ms());
        conn.debug_read_seq.store(
            inner.debug_read_seq.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );

        let mut table = inner.table.write();
        match table.insert(conn) {
            Ok(id) => {
                inner.assign_cookies(&mut table, id);
                Ok(id)
            }

            Err(InsertError::Collision(_)) => {
                inner.stats.connection_create_collisions.incr();
                drop(table);

                inner.ectx.log.log(
                    LogLevel::Note,
                    &format!("create collision: {}", req.key()),
                );
                Err(SfeError::Collision(req.key()))
            }

            Err(InsertError::Full) => {
                let limit = table.limit();
                drop(table);

                inner.ectx.log.log(
                    LogLevel::Warn,
                    &format!(
                        "connection table full ({limit}), refusing {}",
                        req.key()
                    ),
                );
                Err(SfeError::MaxCapacity(limit))
            }
        }
    }

    /// Refresh an existing connection from a newer request: TCP
    /// tracking values only move forward, the sequence check flag is
    /// replaced.
    pub fn update_connection(
        &self,
        req: &ConnectionCreate,
    ) -> Result<(), SfeError> {
        let mut table = self.inner.table.write();
        let key = req.key();
        let id = table.find_conn(&key).ok_or(SfeError::NotFound(key))?;
        if let Some(c) = table.get_mut(id) {
            c.refresh(req);
        }
        Ok(())
    }

    /// Replace the packet mark of a connection.
    pub fn mark_connection(
        &self,
        key: &ConnKey,
        mark: u32,
    ) -> Result<(), SfeError> {
        let mut table = self.inner.table.write();
        let id = table.find_conn(key).ok_or(SfeError::NotFound(*key))?;
        if let Some(c) = table.get_mut(id) {
            c.mark = mark;
        }
        Ok(())
    }

    pub fn destroy_connection(&self, key: &ConnKey) -> DestroyResult {
        let inner = &*self.inner;
        inner.stats.connection_destroy_requests.incr();

        let rec = {
            let mut table = inner.table.write();
            match table.find_conn(key) {
                Some(id) => {
                    inner.remove_locked(&mut table, id, SyncReason::Destroy)
                }
                None => None,
            }
        };

        match rec {
            Some(rec) => {
                inner.deliver(&[rec]);
                DestroyResult::Destroyed
            }

            None => {
                inner.stats.connection_destroy_misses.incr();
                DestroyResult::Miss
            }
        }
    }

    /// Remove every connection for which `pred` holds, returning how
    /// many were removed.
    pub fn flush<P>(&self, pred: P) -> usize
    where
        P: FnMut(&Connection) -> bool,
    {
        let inner = &*self.inner;
        let recs: Vec<ConnectionSync> = {
            let mut table = inner.table.write();
            table
                .select(pred)
                .into_iter()
                .filter_map(|id| {
                    inner.remove_locked(&mut table, id, SyncReason::Destroy)
                })
                .collect()
        };

        inner.deliver(&recs);
        recs.len()
    }

    /// Remove every connection arriving on or leaving through `dev`,
    /// e.g. when the device goes away.
    pub fn flush_device(&self, dev: &NetDev) -> usize {
        let n = self.flush(|c| c.uses_dev(dev.ifindex));
        if n != 0 {
            self.inner.ectx.log.log(
                LogLevel::Note,
                &format!("flushed {n} connections on {dev}"),
            );
        }
        n
    }

    pub fn flush_all(&self) -> usize {
        self.flush(|_| true)
    }

    /// Classify a packet received on `dev`.
    pub fn process_packet(&self, dev: &NetDev, rx: RxPacket) -> ProcessResult {
        let inner = &*self.inner;
        let table = inner.table.read();

        match ip6::recv(&table, &inner.stats, dev.ifindex, &rx) {
            Verdict::Forward { id, l4_off, len } => {
                // The validator found it under this same read lock.
                let Some(conn) = table.get(id.conn) else {
                    panic!("forward verdict for missing conn {}", id.conn);
                };

                conn.cm(id.dir).counters.record(len as u32);
                table.activate(id);
                inner.stats.packets_forwarded.incr();
                ProcessResult::Forward(Forward::new(id, conn, l4_off))
            }

            Verdict::Exception(ev) => {
                inner.stats.exception(ev);
                ProcessResult::Exception(ev)
            }

            Verdict::Flush(id, ev) => {
                inner.stats.exception(ev);
                drop(table);

                // Someone else may have removed it in between; the
                // generation in `id` keeps us off any newcomer in the
                // same slot.
                let rec = {
                    let mut table = inner.table.write();
                    inner.remove_locked(&mut table, id.conn, SyncReason::Flush)
                };

                if let Some(rec) = rec {
                    inner.deliver(&[rec]);
                }
                ProcessResult::Exception(ev)
            }
        }
    }

    /// Replace the sync callback; `None` stops delivery.
    pub fn set_sync_callback(&self, cb: Option<Arc<dyn SyncRuleCallback>>) {
        *self.inner.sync_cb.write() = cb;
    }

    /// Register (or with `None`, unregister) hardware flow cookie
    /// programming. Only connections created afterwards get cookies.
    pub fn set_flow_cookie_offload(
        &self,
        offload: Option<Arc<dyn FlowCookieOffload>>,
    ) {
        *self.inner.cookie_offload.write() = offload;
    }

    /// Run a sync pass now, returning the number of records produced.
    pub fn sync_now(&self) -> usize {
        self.inner.sync_pass()
    }

    pub fn stats_snap(&self) -> StatsSnap {
        let table = self.inner.table.read();
        self.inner.stats.snap(table.num_connections())
    }

    /// A view of every connection, in creation order.
    pub fn dump_connections(&self) -> Vec<ConnectionDump> {
        let table = self.inner.table.read();
        table.iter().map(|(_, c)| conn_dump(c)).collect()
    }

    pub fn find_connection(&self, key: &ConnKey) -> Option<ConnectionDump> {
        let table = self.inner.table.read();
        let id = table.find_conn(key)?;
        table.get(id).map(conn_dump)
    }

    /// Begin a new diagnostic dump.
    pub fn dump_start(&self) -> DumpWriter {
        let seq = self.inner.debug_read_seq.fetch_add(1, Ordering::Relaxed);
        DumpWriter::new(seq.wrapping_add(1))
    }

    /// Write the next line of the dump into `buf`.
    pub fn dump_next(
        &self,
        w: &mut DumpWriter,
        buf: &mut [u8],
    ) -> Result<DumpProgress, DumpError> {
        let table = self.inner.table.read();
        let src = DumpSource { table: &table, stats: &self.inner.stats };
        w.next_line(&src, buf)
    }

    /// Stop the sync timer and flush every connection. The engine stays
    /// usable, but nothing syncs on a timer any more.
    pub fn shutdown(&self) {
        let periodic = self.periodic.lock().take();
        if let Some(mut p) = periodic {
            p.stop();
        }

        let n = self.flush_all();
        if n != 0 {
            self.inner.ectx.log.log(
                LogLevel::Note,
                &format!("shutdown flushed {n} connections"),
            );
        }
    }

    /// Check the table's structural invariants.
    #[cfg(any(feature = "test-help", test))]
    pub fn validate(&self) {
        let table = self.inner.table.read();
        table.validate();
    }

    /// The TCP tracking state of a connection, by direction.
    #[cfg(any(feature = "test-help", test))]
    pub fn tcp_state(
        &self,
        key: &ConnKey,
    ) -> Option<[sfe_api::TcpWindowSnap; 2]> {
        let table = self.inner.table.read();
        let conn = table.get(table.find_conn(key)?)?;
        let tcp = conn.tcp.lock();
        Some([tcp[0].snap(), tcp[1].snap()])
    }

    /// The number of matches waiting on the active list.
    #[cfg(any(feature = "test-help", test))]
    pub fn active_len(&self) -> usize {
        self.inner.table.read().active_snapshot().len()
    }
}

impl DumpWriter {
    /// Fill `buf` with as many whole dump lines as fit, returning the
    /// number of bytes written; zero once the dump is complete.
    pub fn read(
        &mut self,
        sfe: &Sfe6,
        buf: &mut [u8],
    ) -> Result<usize, DumpError> {
        let table = sfe.inner.table.read();
        let src = DumpSource { table: &table, stats: &sfe.inner.stats };
        self.fill(&src, buf)
    }
}

impl Drop for Sfe6 {
    fn drop(&mut self) {
        self.shutdown();
    }
}
