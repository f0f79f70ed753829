//! Pool registry: the keep-alive cache and its intrusive lists.
//!
//! Live connections sit in a slab arena. Each entry carries two link
//! pairs threading it onto doubly linked lists by index: one pair for
//! the global idle-or-busy list (membership is mutually exclusive, so
//! a single pair serves both), one pair for the per-address queue an
//! idle entry additionally belongs to. That gives O(1) transfer
//! between lists and O(1) removal with no allocation per transition.
//!
//! Both global lists are insertion-ordered, oldest at the head, so the
//! sweeper's expiry scans stop at the first survivor.

use slab::Slab;
use std::cell::Cell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::connection::ConnectionHandle;

/// Arena key of a live connection.
pub(crate) type ConnId = usize;

/// Pool membership of a live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PoolState {
    /// Serving a request; member of the global busy list.
    Busy,
    /// Parked for reuse; member of the global idle list and of its
    /// peer's queue.
    Idle,
}

#[derive(Clone, Copy, Debug, Default)]
struct Links {
    prev: Option<ConnId>,
    next: Option<ConnId>,
}

/// Head/tail/len of one index-linked list.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ListHead {
    head: Option<ConnId>,
    tail: Option<ConnId>,
    len: usize,
}

impl ListHead {
    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Which link pair of an entry a list operation threads through.
#[derive(Clone, Copy)]
enum LinkSet {
    Global,
    Addr,
}

pub(crate) struct PoolEntry {
    pub(crate) peer: SocketAddr,
    pub(crate) state: PoolState,
    pub(crate) last_activity: Cell<Duration>,
    pub(crate) handle: ConnectionHandle,
    global: Links,
    addr: Links,
}

/// The registry of all pooled connections.
pub(crate) struct PoolRegistry {
    entries: Slab<PoolEntry>,
    idle_list: ListHead,
    busy_list: ListHead,
    address_map: HashMap<SocketAddr, ListHead>,
    idle_expired: u64,
    busy_expired: u64,
}

impl PoolRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            idle_list: ListHead::default(),
            busy_list: ListHead::default(),
            address_map: HashMap::new(),
            idle_expired: 0,
            busy_expired: 0,
        }
    }

    fn links(entry: &PoolEntry, set: LinkSet) -> Links {
        match set {
            LinkSet::Global => entry.global,
            LinkSet::Addr => entry.addr,
        }
    }

    fn links_mut(entry: &mut PoolEntry, set: LinkSet) -> &mut Links {
        match set {
            LinkSet::Global => &mut entry.global,
            LinkSet::Addr => &mut entry.addr,
        }
    }

    fn push_tail(entries: &mut Slab<PoolEntry>, list: &mut ListHead, set: LinkSet, id: ConnId) {
        let tail = list.tail;
        {
            let links = Self::links_mut(&mut entries[id], set);
            links.prev = tail;
            links.next = None;
        }
        match tail {
            Some(tail) => Self::links_mut(&mut entries[tail], set).next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);
        list.len += 1;
    }

    fn unlink(entries: &mut Slab<PoolEntry>, list: &mut ListHead, set: LinkSet, id: ConnId) {
        let Links { prev, next } = Self::links(&entries[id], set);
        match prev {
            Some(prev) => Self::links_mut(&mut entries[prev], set).next = next,
            None => list.head = next,
        }
        match next {
            Some(next) => Self::links_mut(&mut entries[next], set).prev = prev,
            None => list.tail = prev,
        }
        *Self::links_mut(&mut entries[id], set) = Links::default();
        list.len -= 1;
    }

    /// Register a freshly dialed connection in the busy list.
    pub(crate) fn insert_busy(
        &mut self,
        peer: SocketAddr,
        now: Duration,
        handle: ConnectionHandle,
    ) -> ConnId {
        let id = self.entries.insert(PoolEntry {
            peer,
            state: PoolState::Busy,
            last_activity: Cell::new(now),
            handle,
            global: Links::default(),
            addr: Links::default(),
        });
        Self::push_tail(&mut self.entries, &mut self.busy_list, LinkSet::Global, id);
        id
    }

    /// Lease an idle connection to `peer`, if one is pooled.
    ///
    /// Takes from the tail of the per-address queue, so the hottest
    /// connection is reused and cold ones age into expiry.
    pub(crate) fn try_take_idle(
        &mut self,
        peer: SocketAddr,
        now: Duration,
    ) -> Option<ConnectionHandle> {
        let queue = self.address_map.get_mut(&peer)?;
        let id = queue.tail?;
        Self::unlink(&mut self.entries, queue, LinkSet::Addr, id);
        if queue.is_empty() {
            self.address_map.remove(&peer);
        }
        Self::unlink(&mut self.entries, &mut self.idle_list, LinkSet::Global, id);
        Self::push_tail(&mut self.entries, &mut self.busy_list, LinkSet::Global, id);

        let entry = &mut self.entries[id];
        debug_assert_eq!(entry.state, PoolState::Idle);
        debug_assert_eq!(entry.peer, peer);
        entry.state = PoolState::Busy;
        entry.last_activity.set(now);
        Some(entry.handle.clone())
    }

    /// Park a busy connection back in the keep-alive cache.
    pub(crate) fn return_to_idle(&mut self, id: ConnId, now: Duration) {
        debug_assert_eq!(self.entries[id].state, PoolState::Busy);
        Self::unlink(&mut self.entries, &mut self.busy_list, LinkSet::Global, id);
        Self::push_tail(&mut self.entries, &mut self.idle_list, LinkSet::Global, id);
        let peer = self.entries[id].peer;
        let queue = self.address_map.entry(peer).or_default();
        Self::push_tail(&mut self.entries, queue, LinkSet::Addr, id);

        let entry = &mut self.entries[id];
        entry.state = PoolState::Idle;
        entry.last_activity.set(now);
    }

    /// Remove a connection from whatever lists hold it.
    ///
    /// No-op (returns `None`) if the entry is already gone; closing is
    /// idempotent.
    pub(crate) fn evict(&mut self, id: ConnId) -> Option<PoolEntry> {
        if !self.entries.contains(id) {
            return None;
        }
        match self.entries[id].state {
            PoolState::Busy => {
                Self::unlink(&mut self.entries, &mut self.busy_list, LinkSet::Global, id);
            }
            PoolState::Idle => {
                Self::unlink(&mut self.entries, &mut self.idle_list, LinkSet::Global, id);
                let peer = self.entries[id].peer;
                if let Some(queue) = self.address_map.get_mut(&peer) {
                    Self::unlink(&mut self.entries, queue, LinkSet::Addr, id);
                    if queue.is_empty() {
                        self.address_map.remove(&peer);
                    }
                }
            }
        }
        Some(self.entries.remove(id))
    }

    /// Evict every idle entry whose keep-alive deadline has passed.
    ///
    /// The idle list is insertion-ordered, so the scan stops at the
    /// first survivor.
    pub(crate) fn close_expired_idle(
        &mut self,
        now: Duration,
        timeout: Duration,
    ) -> Vec<PoolEntry> {
        Self::close_expired(
            &mut self.entries,
            &mut self.idle_list,
            &mut self.address_map,
            &mut self.idle_expired,
            now,
            timeout,
        )
    }

    /// Evict every busy entry whose active deadline has passed.
    pub(crate) fn close_expired_busy(
        &mut self,
        now: Duration,
        deadline: Duration,
    ) -> Vec<PoolEntry> {
        Self::close_expired(
            &mut self.entries,
            &mut self.busy_list,
            &mut self.address_map,
            &mut self.busy_expired,
            now,
            deadline,
        )
    }

    fn close_expired(
        entries: &mut Slab<PoolEntry>,
        list: &mut ListHead,
        address_map: &mut HashMap<SocketAddr, ListHead>,
        counter: &mut u64,
        now: Duration,
        timeout: Duration,
    ) -> Vec<PoolEntry> {
        let mut expired = Vec::new();
        let Some(cutoff) = now.checked_sub(timeout) else {
            return expired;
        };
        while let Some(head) = list.head {
            if entries[head].last_activity.get() > cutoff {
                break;
            }
            Self::unlink(entries, list, LinkSet::Global, head);
            if entries[head].state == PoolState::Idle {
                let peer = entries[head].peer;
                if let Some(queue) = address_map.get_mut(&peer) {
                    Self::unlink(entries, queue, LinkSet::Addr, head);
                    if queue.is_empty() {
                        address_map.remove(&peer);
                    }
                }
            }
            expired.push(entries.remove(head));
        }
        *counter += expired.len() as u64;
        expired
    }

    /// Evict every idle entry, regardless of age. Used by shutdown.
    pub(crate) fn drain_idle(&mut self) -> Vec<PoolEntry> {
        let mut drained = Vec::new();
        while let Some(head) = self.idle_list.head {
            if let Some(entry) = self.evict(head) {
                drained.push(entry);
            }
        }
        drained
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle_list.len
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.busy_list.len
    }

    pub(crate) fn total_count(&self) -> usize {
        self.idle_list.len + self.busy_list.len
    }

    pub(crate) fn idle_expired_total(&self) -> u64 {
        self.idle_expired
    }

    pub(crate) fn busy_expired_total(&self) -> u64 {
        self.busy_expired
    }

    /// Idle connection count per peer address.
    pub(crate) fn address_connections(&self) -> Vec<(SocketAddr, usize)> {
        self.address_map
            .iter()
            .map(|(addr, queue)| (*addr, queue.len))
            .collect()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let queue_total: usize = self.address_map.values().map(|q| q.len).sum();
        assert_eq!(self.idle_list.len, queue_total);
        assert!(self.address_map.values().all(|q| q.len >= 1));
        assert_eq!(self.entries.len(), self.idle_list.len + self.busy_list.len);
    }
}
