// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The connection table.
//!
//! Connections live in an arena of slots. Everything else refers to
//! them by [`ConnId`], an index plus a generation, so a handle to a
//! removed connection can never alias whatever is later stored in the
//! same slot. The table keeps:
//!
//! * a hash of connection keys (pre-translation 5-tuple), used by the
//!   connection manager's requests;
//!
//! * a hash of match keys (device plus 5-tuple for each direction),
//!   used by the packet path. Each chain has its own lock so that a
//!   lookup, which moves the entry it finds to the front of its chain,
//!   can run with the table only read-locked;
//!
//! * the all-connections list, in insertion order, threaded through
//!   the slots;
//!
//! * the active list of matches that forwarded traffic since the last
//!   sync, in activation order.

use super::conn::Connection;
use super::conn::ConnectionMatch;
use super::conn::Direction;
use super::conn::MatchKey;
use super::cookie::FlowCookieTable;
use super::stat::EngineStats;
use crate::ddi::sync::KMutex;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::Ordering;
use sfe_api::ConnKey;
use sfe_api::Ipv6Addr;
use sfe_api::Protocol;
use sfe_api::Sfe6Config;

/// A handle to a connection in the table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl ConnId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The handle of one direction of this connection.
    pub fn cm(self, dir: Direction) -> MatchId {
        MatchId { conn: self, dir }
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// A handle to one direction of a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MatchId {
    pub conn: ConnId,
    pub dir: Direction,
}

impl MatchId {
    /// The other direction of the same connection.
    pub fn counter(self) -> MatchId {
        MatchId { conn: self.conn, dir: self.dir.flip() }
    }
}

#[inline]
fn addr_hash(ip: &Ipv6Addr) -> u32 {
    ip.words().iter().fold(0, |h, w| h ^ w)
}

fn tuple_hash(
    protocol: Protocol,
    src_ip: &Ipv6Addr,
    src_port: u16,
    dst_ip: &Ipv6Addr,
    dst_port: u16,
) -> u32 {
    addr_hash(src_ip)
        ^ addr_hash(dst_ip)
        ^ u8::from(protocol) as u32
        ^ (src_port ^ dst_port) as u32
}

/// Fold a raw hash into a bucket index.
#[inline]
fn fold_hash(hash: u32, shift: u8, mask: u32) -> usize {
    (((hash >> shift) ^ hash) & mask) as usize
}

/// Why an insert failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertError {
    /// The connection, or one of its matches, already exists.
    Collision(ConnId),
    /// The table is at its configured limit.
    Full,
}

struct Entry {
    conn: Connection,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Clone, Copy, Debug, Default)]
struct ActiveLink {
    linked: bool,
    prev: Option<MatchId>,
    next: Option<MatchId>,
}

/// The matches that have seen traffic since the last sync, oldest
/// activation first.
#[derive(Debug, Default)]
pub struct ActiveList {
    // Indexed by slot, then by direction.
    links: Vec<[ActiveLink; 2]>,
    head: Option<MatchId>,
    tail: Option<MatchId>,
    len: usize,
}

impl ActiveList {
    fn link_mut(&mut self, id: MatchId) -> &mut ActiveLink {
        let idx = id.conn.index as usize;
        if idx >= self.links.len() {
            self.links.resize(idx + 1, Default::default());
        }
        &mut self.links[idx][id.dir.index()]
    }

    fn is_linked(&self, id: MatchId) -> bool {
        self.links
            .get(id.conn.index as usize)
            .is_some_and(|l| l[id.dir.index()].linked)
    }

    /// Append `id`, unless it is already on the list.
    pub fn push_back(&mut self, id: MatchId) -> bool {
        if self.is_linked(id) {
            return false;
        }

        let tail = self.tail;
        *self.link_mut(id) =
            ActiveLink { linked: true, prev: tail, next: None };

        match tail {
            Some(t) => self.link_mut(t).next = Some(id),
            None => self.head = Some(id),
        }

        self.tail = Some(id);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, id: MatchId) -> bool {
        if !self.is_linked(id) {
            return false;
        }

        let link = core::mem::take(self.link_mut(id));

        match link.prev {
            Some(p) => self.link_mut(p).next = link.next,
            None => self.head = link.next,
        }

        match link.next {
            Some(n) => self.link_mut(n).prev = link.prev,
            None => self.tail = link.prev,
        }

        self.len -= 1;
        true
    }

    pub fn pop_front(&mut self) -> Option<MatchId> {
        let id = self.head?;
        self.remove(id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The list in order, for inspection.
    pub fn to_vec(&self) -> Vec<MatchId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(id) = cur {
            out.push(id);
            cur = self.links[id.conn.index as usize][id.dir.index()].next;
        }
        out
    }
}

/// The connection table: the arena, both hashes and both lists.
pub struct FlowTable {
    shift: u8,
    mask: u32,
    limit: u32,

    slots: Vec<Slot>,
    free: Vec<u32>,

    conn_hash: Vec<Vec<ConnId>>,
    match_hash: Vec<KMutex<Vec<MatchId>>>,

    all_head: Option<u32>,
    all_tail: Option<u32>,
    num_connections: u32,

    active: KMutex<ActiveList>,

    pub cookies: FlowCookieTable,
}

impl FlowTable {
    pub fn new(cfg: &Sfe6Config) -> Self {
        let size = cfg.hash_size();
        Self {
            shift: cfg.hash_shift,
            mask: (size - 1) as u32,
            limit: cfg.max_connections,
            slots: Vec::new(),
            free: Vec::new(),
            conn_hash: (0..size).map(|_| Vec::new()).collect(),
            match_hash: (0..size).map(|_| KMutex::new(Vec::new())).collect(),
            all_head: None,
            all_tail: None,
            num_connections: 0,
            active: KMutex::new(ActiveList::default()),
            cookies: FlowCookieTable::new(cfg.flow_cookies),
        }
    }

    pub fn num_connections(&self) -> u32 {
        self.num_connections
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn match_bucket(&self, key: &MatchKey) -> usize {
        let hash = key.dev
            ^ tuple_hash(
                key.protocol,
                &key.src_ip,
                key.src_port,
                &key.dst_ip,
                key.dst_port,
            );
        fold_hash(hash, self.shift, self.mask)
    }

    fn conn_bucket(&self, key: &ConnKey) -> usize {
        let hash = tuple_hash(
            key.protocol,
            &key.src_ip,
            key.src_port,
            &key.dest_ip,
            key.dest_port,
        );
        fold_hash(hash, self.shift, self.mask)
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| &e.conn)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut().map(|e| &mut e.conn)
    }

    pub fn cm(&self, id: MatchId) -> Option<&ConnectionMatch> {
        self.get(id.conn).map(|c| c.cm(id.dir))
    }

    fn cm_in_chain(&self, id: MatchId, bucket: usize) -> &ConnectionMatch {
        match self.cm(id) {
            Some(cm) => cm,
            None => panic!("stale match {id:?} in match hash bucket {bucket}"),
        }
    }

    /// Look up a match by key, as the packet path does.
    ///
    /// A hit at the head of the chain counts as a hash hit. A hit
    /// further down moves the entry to the head and counts as a
    /// reorder, so busy flows stay cheap to find.
    pub fn find_match(
        &self,
        key: &MatchKey,
        stats: &EngineStats,
    ) -> Option<MatchId> {
        let bucket = self.match_bucket(key);
        let mut chain = self.match_hash[bucket].lock();
        let pos = chain
            .iter()
            .position(|id| self.cm_in_chain(*id, bucket).key == *key)?;

        if pos == 0 {
            stats.connection_match_hash_hits.incr();
        } else {
            chain[..=pos].rotate_right(1);
            stats.connection_match_hash_reorders.incr();
        }

        Some(chain[0])
    }

    /// Look up a match without touching the chain order or counters.
    pub fn peek_match(&self, key: &MatchKey) -> Option<MatchId> {
        let bucket = self.match_bucket(key);
        let chain = self.match_hash[bucket].lock();
        chain
            .iter()
            .find(|id| self.cm_in_chain(**id, bucket).key == *key)
            .copied()
    }

    pub fn find_conn(&self, key: &ConnKey) -> Option<ConnId> {
        let bucket = self.conn_bucket(key);
        self.conn_hash[bucket].iter().copied().find(|id| match self.get(*id) {
            Some(c) => c.key() == *key,
            None => {
                panic!("stale connection {id} in conn hash bucket {bucket}")
            }
        })
    }

    /// Insert a new connection with both matches inactive.
    pub fn insert(&mut self, conn: Connection) -> Result<ConnId, InsertError> {
        let existing = self.find_conn(&conn.key()).or_else(|| {
            Direction::BOTH.iter().find_map(|dir| {
                self.peek_match(&conn.cm(*dir).key).map(|m| m.conn)
            })
        });

        if let Some(id) = existing {
            return Err(InsertError::Collision(id));
        }

        if self.num_connections >= self.limit {
            return Err(InsertError::Full);
        }

        let conn_bucket = self.conn_bucket(&conn.key());
        let match_buckets =
            Direction::BOTH.map(|dir| self.match_bucket(&conn.cm(dir).key));

        let entry = Entry { conn, prev: self.all_tail, next: None };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ConnId { index, generation: slot.generation }
            }

            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                ConnId { index, generation: 0 }
            }
        };

        match self.all_tail {
            Some(tail) => self.entry_mut(tail).next = Some(id.index),
            None => self.all_head = Some(id.index),
        }
        self.all_tail = Some(id.index);

        self.conn_hash[conn_bucket].insert(0, id);
        for (dir, bucket) in Direction::BOTH.into_iter().zip(match_buckets) {
            self.match_hash[bucket].lock().insert(0, id.cm(dir));
        }

        self.num_connections += 1;
        Ok(id)
    }

    fn entry_mut(&mut self, index: u32) -> &mut Entry {
        match self.slots[index as usize].entry.as_mut() {
            Some(e) => e,
            None => panic!("all-connections list references free slot {index}"),
        }
    }

    /// Unlink a connection from every index and list and hand it back.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.get(id)?;

        let key = self.get(id).map(|c| c.key())?;
        let conn_bucket = self.conn_bucket(&key);
        let chain = &mut self.conn_hash[conn_bucket];
        let before = chain.len();
        chain.retain(|c| *c != id);
        assert_eq!(
            before,
            chain.len() + 1,
            "connection {id} not in its conn hash bucket"
        );

        {
            let mut active = self.active.lock();
            for dir in Direction::BOTH {
                let mid = id.cm(dir);
                let bucket = self.match_bucket(&self.cm_in_chain(mid, 0).key);
                let mut chain = self.match_hash[bucket].lock();
                let before = chain.len();
                chain.retain(|m| *m != mid);
                assert_eq!(
                    before,
                    chain.len() + 1,
                    "match {mid:?} not in its match hash bucket"
                );
                active.remove(mid);
            }
        }

        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        match entry.prev {
            Some(p) => self.entry_mut(p).next = entry.next,
            None => self.all_head = entry.next,
        }

        match entry.next {
            Some(n) => self.entry_mut(n).prev = entry.prev,
            None => self.all_tail = entry.prev,
        }

        self.num_connections -= 1;

        for dir in Direction::BOTH {
            entry.conn.cm(dir).active.store(false, Ordering::Relaxed);
        }

        Some(entry.conn)
    }

    /// Put a match that just forwarded a packet on the active list.
    pub fn activate(&self, id: MatchId) {
        let Some(cm) = self.cm(id) else {
            return;
        };

        if cm.active.load(Ordering::Relaxed) {
            return;
        }

        let mut active = self.active.lock();
        if !cm.active.load(Ordering::Relaxed) {
            active.push_back(id);
            cm.active.store(true, Ordering::Relaxed);
        }
    }

    /// Empty the active list, returning each connection with at least
    /// one active match once, in activation order.
    pub fn take_active(&self) -> Vec<ConnId> {
        let mut active = self.active.lock();
        let mut out = Vec::with_capacity(active.len());

        while let Some(mid) = active.pop_front() {
            // The sibling is reported with this connection.
            active.remove(mid.counter());

            if let Some(conn) = self.get(mid.conn) {
                for dir in Direction::BOTH {
                    conn.cm(dir).active.store(false, Ordering::Relaxed);
                }
            }

            out.push(mid.conn);
        }

        out
    }

    pub fn active_snapshot(&self) -> Vec<MatchId> {
        self.active.lock().to_vec()
    }

    /// Iterate the connections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &Connection)> + '_ {
        let mut cur = self.all_head;
        core::iter::from_fn(move || {
            let index = cur?;
            let slot = &self.slots[index as usize];
            let entry = slot.entry.as_ref()?;
            cur = entry.next;
            Some((ConnId { index, generation: slot.generation }, &entry.conn))
        })
    }

    /// The handles of every connection for which `pred` holds.
    pub fn select<P>(&self, mut pred: P) -> Vec<ConnId>
    where
        P: FnMut(&Connection) -> bool,
    {
        self.iter().filter(|(_, c)| pred(c)).map(|(id, _)| id).collect()
    }

    /// Check the structural invariants of the table, panicking on the
    /// first violation.
    #[cfg(any(feature = "test-help", test))]
    pub fn validate(&self) {
        let listed: Vec<ConnId> = self.iter().map(|(id, _)| id).collect();
        assert_eq!(
            listed.len(),
            self.num_connections as usize,
            "all-connections list length != num_connections"
        );

        let live = self.slots.iter().filter(|s| s.entry.is_some()).count();
        assert_eq!(live, listed.len(), "live slots not all listed");

        let in_conn_hash: usize = self.conn_hash.iter().map(Vec::len).sum();
        assert_eq!(in_conn_hash, listed.len());

        let in_match_hash: usize =
            self.match_hash.iter().map(|c| c.lock().len()).sum();
        assert_eq!(in_match_hash, listed.len() * 2);

        for (id, conn) in self.iter() {
            assert_eq!(self.find_conn(&conn.key()), Some(id));
            for dir in Direction::BOTH {
                let found = self.peek_match(&conn.cm(dir).key);
                assert_eq!(found, Some(id.cm(dir)));
            }
        }

        let active = self.active.lock();
        for mid in active.to_vec() {
            let cm = self.cm(mid).expect("active list holds a stale match");
            assert!(cm.active.load(Ordering::Relaxed));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::sync::Arc;
    use sfe_api::ConnectionCreate;
    use sfe_api::CreateFlags;
    use sfe_api::LinkKind;
    use sfe_api::MacAddr;
    use sfe_api::NetDev;
    use sfe_api::TcpTrackInit;

    fn req(sport: u16) -> ConnectionCreate {
        let dev = |i, name| {
            Arc::new(NetDev::new(i, name, MacAddr::ZERO, LinkKind::Ethernet))
        };
        let (d1, d2) = (dev(1, "eth1"), dev(2, "eth2"));
        let src: Ipv6Addr = "fd00::1".parse().unwrap();
        let dst: Ipv6Addr = "fd00::2".parse().unwrap();
        ConnectionCreate {
            protocol: Protocol::UDP,
            src_dev: d1,
            dest_dev: d2,
            flags: CreateFlags::empty(),
            src_mtu: 1500,
            dest_mtu: 1500,
            src_ip: src,
            src_ip_xlate: src,
            dest_ip: dst,
            dest_ip_xlate: dst,
            src_port: sport,
            src_port_xlate: sport,
            dest_port: 53,
            dest_port_xlate: 53,
            src_mac: MacAddr::ZERO,
            dest_mac_xlate: MacAddr::ZERO,
            src_tcp: TcpTrackInit::default(),
            dest_tcp: TcpTrackInit::default(),
            src_priority: 0,
            dest_priority: 0,
            src_dscp: 0,
            dest_dscp: 0,
            mark: 0,
        }
    }

    fn small_cfg() -> Sfe6Config {
        // A single bucket puts every entry on the same chain.
        Sfe6Config { hash_shift: 0, max_connections: 4, ..Default::default() }
    }

    #[test]
    fn active_list_ops() {
        let a = ConnId::new(0, 0).cm(Direction::Original);
        let b = ConnId::new(3, 1).cm(Direction::Reply);
        let c = ConnId::new(3, 1).cm(Direction::Original);
        let mut l = ActiveList::default();
        assert!(l.push_back(a));
        assert!(l.push_back(b));
        assert!(!l.push_back(a));
        assert!(l.push_back(c));
        assert_eq!(l.to_vec(), vec![a, b, c]);
        assert!(l.remove(b));
        assert!(!l.remove(b));
        assert_eq!(l.to_vec(), vec![a, c]);
        assert_eq!(l.pop_front(), Some(a));
        assert_eq!(l.pop_front(), Some(c));
        assert_eq!(l.pop_front(), None);
        assert!(l.is_empty());
    }

    #[test]
    fn insert_find_remove() {
        let mut t = FlowTable::new(&Sfe6Config::default());
        let r = req(1000);
        let id = t.insert(Connection::from_create(&r, 0)).unwrap();
        t.validate();

        assert_eq!(t.find_conn(&r.key()), Some(id));
        let key = t.get(id).unwrap().cm(Direction::Reply).key;
        let stats = EngineStats::default();
        assert_eq!(t.find_match(&key, &stats), Some(id.cm(Direction::Reply)));
        assert_eq!(stats.connection_match_hash_hits.total(), 1);

        let conn = t.remove(id).unwrap();
        assert_eq!(conn.src_port, 1000);
        assert_eq!(t.num_connections(), 0);
        assert_eq!(t.find_conn(&r.key()), None);
        assert_eq!(t.find_match(&key, &stats), None);
        assert!(t.get(id).is_none());
        assert!(t.remove(id).is_none());
        t.validate();

        // The slot is reused with a new generation.
        let id2 = t.insert(Connection::from_create(&r, 0)).unwrap();
        assert_eq!(id2.index(), id.index());
        assert_ne!(id2, id);
        assert!(t.get(id).is_none());
    }

    #[test]
    fn collision_and_capacity() {
        let mut t = FlowTable::new(&small_cfg());
        let first = t.insert(Connection::from_create(&req(1), 0)).unwrap();
        assert_eq!(
            t.insert(Connection::from_create(&req(1), 0)),
            Err(InsertError::Collision(first))
        );

        for port in 2..=4 {
            t.insert(Connection::from_create(&req(port), 0)).unwrap();
        }
        assert_eq!(
            t.insert(Connection::from_create(&req(5), 0)),
            Err(InsertError::Full)
        );
        assert_eq!(t.num_connections(), 4);
        t.validate();
    }

    #[test]
    fn lookup_reorders_chain() {
        let mut t = FlowTable::new(&small_cfg());
        let a = t.insert(Connection::from_create(&req(1), 0)).unwrap();
        let _b = t.insert(Connection::from_create(&req(2), 0)).unwrap();
        let stats = EngineStats::default();

        let key_a = t.get(a).unwrap().cm(Direction::Original).key;
        // `a` was inserted first, so it sits behind `b` and both of
        // their reply matches.
        let a_orig = Some(a.cm(Direction::Original));
        assert_eq!(t.find_match(&key_a, &stats), a_orig);
        assert_eq!(stats.connection_match_hash_reorders.total(), 1);
        assert_eq!(stats.connection_match_hash_hits.total(), 0);

        assert_eq!(t.find_match(&key_a, &stats), a_orig);
        assert_eq!(stats.connection_match_hash_hits.total(), 1);
        t.validate();
    }

    #[test]
    fn activation_and_take() {
        let mut t = FlowTable::new(&Sfe6Config::default());
        let a = t.insert(Connection::from_create(&req(1), 0)).unwrap();
        let b = t.insert(Connection::from_create(&req(2), 0)).unwrap();

        t.activate(b.cm(Direction::Reply));
        t.activate(a.cm(Direction::Original));
        t.activate(b.cm(Direction::Original));
        t.activate(b.cm(Direction::Reply));
        assert_eq!(
            t.active_snapshot(),
            vec![
                b.cm(Direction::Reply),
                a.cm(Direction::Original),
                b.cm(Direction::Original)
            ]
        );
        t.validate();

        assert_eq!(t.take_active(), vec![b, a]);
        assert!(t.active_snapshot().is_empty());
        assert!(!t.get(b).unwrap().cm(Direction::Original).is_active());

        // Removing an active connection takes it off the list.
        t.activate(a.cm(Direction::Reply));
        t.remove(a).unwrap();
        assert!(t.active_snapshot().is_empty());
        t.validate();
    }

    #[test]
    fn iteration_is_insertion_order() {
        let mut t = FlowTable::new(&Sfe6Config::default());
        let ids: Vec<_> = (1..=5)
            .map(|p| t.insert(Connection::from_create(&req(p), 0)).unwrap())
            .collect();
        t.remove(ids[2]).unwrap();
        let ports: Vec<u16> = t.iter().map(|(_, c)| c.src_port).collect();
        assert_eq!(ports, vec![1, 2, 4, 5]);
        assert_eq!(t.select(|c| c.src_port % 2 == 0).len(), 2);
    }
}
