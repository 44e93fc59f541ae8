//! Correlation tables.
//!
//! Every table is a sharded [`DashMap`] used for point operations only: get,
//! insert and remove by exact key. Values are `Copy` snapshots; a mutation is
//! always read-compute-write under the key's shard lock, never an alias into
//! the map. Capacity is bounded like the kernel maps these tables mirror.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sockbypass_common::{proxy_flag, ProxyValue, MAP_SIZE};

use crate::error::TableError;
use crate::tuple::{ConnectionTuple, Endpoint};

/// Default capacity of each table, the size of the kernel maps.
pub const DEFAULT_CAPACITY: usize = MAP_SIZE as usize;

/// Fixed-capacity concurrent map with the two insert disciplines the
/// tracker needs.
pub(crate) struct BoundedMap<K, V> {
    name: &'static str,
    capacity: usize,
    len: AtomicUsize,
    inner: DashMap<K, V, RandomState>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            len: AtomicUsize::new(0),
            inner: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    /// Inserts only when `key` is vacant. Returns `Ok(false)` when an entry
    /// was already present and has been left untouched.
    pub(crate) fn insert_if_absent(&self, key: K, value: V) -> Result<bool, TableError> {
        match self.inner.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                self.reserve()?;
                slot.insert(value);
                Ok(true)
            }
        }
    }

    /// Inserts or replaces.
    pub(crate) fn upsert(&self, key: K, value: V) -> Result<(), TableError> {
        match self.inner.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(value);
            }
            Entry::Vacant(slot) => {
                self.reserve()?;
                slot.insert(value);
            }
        }
        Ok(())
    }

    /// Atomically replaces the value under `key` with `f(current)` when `f`
    /// returns `Some`. Returns the value observed before the update.
    pub(crate) fn update<F>(&self, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(&V) -> Option<V>,
    {
        let mut slot = self.inner.get_mut(key)?;
        let before = slot.value().clone();
        if let Some(next) = f(&before) {
            *slot.value_mut() = next;
        }
        Some(before)
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        let (_, v) = self.inner.remove(key)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(v)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    // Called with the key's shard locked, so a successful reservation is
    // always followed by exactly one insert.
    fn reserve(&self) -> Result<(), TableError> {
        let prev = self.len.fetch_add(1, Ordering::AcqRel);
        if prev >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(TableError::Full {
                table: self.name,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Initiator endpoint of a proxy's outbound leg → the destination that leg
/// was opened towards. Lives from active establish until the accepting side
/// consumes it, or until the initiating socket closes.
pub struct PendingOriginTable {
    map: BoundedMap<Endpoint, Endpoint>,
}

impl PendingOriginTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BoundedMap::new("pending-origin", capacity),
        }
    }

    /// Records `origin` for `initiator` unless an unconsumed entry exists.
    pub fn record(&self, initiator: Endpoint, origin: Endpoint) -> Result<bool, TableError> {
        self.map.insert_if_absent(initiator, origin)
    }

    pub fn get(&self, initiator: &Endpoint) -> Option<Endpoint> {
        self.map.get(initiator)
    }

    pub fn remove(&self, initiator: &Endpoint) -> Option<Endpoint> {
        self.map.remove(initiator)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Redirection lifecycle of one proxy table row.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ProxyState {
    /// Pair created, no data seen yet.
    Init,
    /// First data unit passed; later units are spliced.
    Enabled,
    /// Forced back onto the proxy path until the socket closes.
    Disabled,
}

impl ProxyState {
    pub const fn as_flag(self) -> u32 {
        match self {
            ProxyState::Disabled => proxy_flag::DISABLED,
            ProxyState::Init => proxy_flag::INIT,
            ProxyState::Enabled => proxy_flag::ENABLED,
        }
    }

    /// Unknown flag values read as `Disabled`, the safe default.
    pub const fn from_flag(flag: u32) -> Self {
        match flag {
            proxy_flag::INIT => ProxyState::Init,
            proxy_flag::ENABLED => ProxyState::Enabled,
            _ => ProxyState::Disabled,
        }
    }
}

/// Value of a proxy table row.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProxyEntry {
    /// The partner socket's tuple, as registered in the redirect table.
    pub redirect: ConnectionTuple,
    pub state: ProxyState,
}

impl ProxyEntry {
    pub const fn init(redirect: ConnectionTuple) -> Self {
        Self {
            redirect,
            state: ProxyState::Init,
        }
    }
}

impl From<ProxyValue> for ProxyEntry {
    fn from(raw: ProxyValue) -> Self {
        Self {
            redirect: raw.tuple.into(),
            state: ProxyState::from_flag(raw.flag),
        }
    }
}

impl From<ProxyEntry> for ProxyValue {
    fn from(entry: ProxyEntry) -> Self {
        Self {
            tuple: entry.redirect.into(),
            flag: entry.state.as_flag(),
        }
    }
}

/// Socket tuple → partner tuple and lifecycle state. Rows come in pairs,
/// each keyed by its own socket's tuple.
pub struct ProxyTable {
    map: BoundedMap<ConnectionTuple, ProxyEntry>,
}

impl ProxyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BoundedMap::new("proxy", capacity),
        }
    }

    pub fn get(&self, tuple: &ConnectionTuple) -> Option<ProxyEntry> {
        self.map.get(tuple)
    }

    /// Writes both rows of a pair in state `Init`, superseding any earlier
    /// rows. The two writes are independent; a reader may observe one row
    /// before the other. If the second write is refused the first is
    /// removed again, so no half pair outlives the call.
    pub fn insert_pair(&self, a: ConnectionTuple, b: ConnectionTuple) -> Result<(), TableError> {
        self.map.upsert(a, ProxyEntry::init(b))?;
        if let Err(err) = self.map.upsert(b, ProxyEntry::init(a)) {
            self.map.remove(&a);
            return Err(err);
        }
        Ok(())
    }

    /// `Init` → `Enabled`. Returns the state observed before the attempt.
    pub fn enable(&self, tuple: &ConnectionTuple) -> Option<ProxyState> {
        self.transition(tuple, |state| state == ProxyState::Init, ProxyState::Enabled)
    }

    /// Any state → `Disabled`. Returns the state observed before the attempt.
    pub fn disable(&self, tuple: &ConnectionTuple) -> Option<ProxyState> {
        self.transition(tuple, |state| state != ProxyState::Disabled, ProxyState::Disabled)
    }

    pub fn remove(&self, tuple: &ConnectionTuple) -> Option<ProxyEntry> {
        self.map.remove(tuple)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    fn transition<P>(&self, tuple: &ConnectionTuple, allowed: P, to: ProxyState) -> Option<ProxyState>
    where
        P: FnOnce(ProxyState) -> bool,
    {
        self.map
            .update(tuple, |entry| {
                allowed(entry.state).then_some(ProxyEntry { state: to, ..*entry })
            })
            .map(|before| before.state)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, last), port)
    }

    #[test]
    fn insert_if_absent_keeps_first_value() -> Result<(), TableError> {
        let table = PendingOriginTable::new(4);
        assert!(table.record(ep(5, 50001), ep(9, 8080))?);
        assert!(!table.record(ep(5, 50001), ep(9, 9090))?);
        assert_eq!(table.get(&ep(5, 50001)), Some(ep(9, 8080)));
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[test]
    fn full_table_rejects_new_keys_only() -> Result<(), TableError> {
        let map: BoundedMap<u32, u32> = BoundedMap::new("test", 2);
        map.upsert(1, 1)?;
        map.upsert(2, 2)?;
        assert_eq!(
            map.upsert(3, 3),
            Err(TableError::Full {
                table: "test",
                capacity: 2
            })
        );
        // Overwriting an existing key needs no room.
        map.upsert(2, 20)?;
        assert_eq!(map.get(&2), Some(20));
        assert_eq!(map.len(), 2);

        map.remove(&1);
        map.upsert(3, 3)?;
        assert_eq!(map.len(), 2);
        Ok(())
    }

    #[test]
    fn disabled_is_terminal() -> Result<(), TableError> {
        let table = ProxyTable::new(8);
        let a = ConnectionTuple::new(ep(5, 50001), ep(9, 8080));
        let b = a.reversed();
        table.insert_pair(a, b)?;

        assert_eq!(table.disable(&a), Some(ProxyState::Init));
        assert_eq!(table.enable(&a), Some(ProxyState::Disabled));
        assert_eq!(table.get(&a).map(|e| e.state), Some(ProxyState::Disabled));
        // The partner row is independent.
        assert_eq!(table.get(&b).map(|e| e.state), Some(ProxyState::Init));
        Ok(())
    }

    #[test]
    fn unknown_flag_reads_as_disabled() {
        assert_eq!(ProxyState::from_flag(7), ProxyState::Disabled);
        for state in [ProxyState::Init, ProxyState::Enabled, ProxyState::Disabled] {
            assert_eq!(ProxyState::from_flag(state.as_flag()), state);
        }
    }
}
