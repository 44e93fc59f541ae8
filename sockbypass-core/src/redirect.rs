use crate::error::TableError;
use crate::table::BoundedMap;
use crate::tuple::ConnectionTuple;

/// Socket multiplexer: each established socket's own tuple → a handle to
/// the live socket. Splicing a data unit means handing it to the socket
/// found here.
///
/// `S` is whatever identifies a live socket to the caller (a socket cookie,
/// an fd, a channel to a stream task).
pub struct RedirectTable<S> {
    map: BoundedMap<ConnectionTuple, S>,
}

impl<S: Clone> RedirectTable<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BoundedMap::new("redirect", capacity),
        }
    }

    /// Registers (or re-registers) the socket owning `tuple`.
    pub fn register(&self, tuple: ConnectionTuple, socket: S) -> Result<(), TableError> {
        self.map.upsert(tuple, socket)
    }

    pub fn lookup(&self, tuple: &ConnectionTuple) -> Option<S> {
        self.map.get(tuple)
    }

    pub fn unregister(&self, tuple: &ConnectionTuple) -> Option<S> {
        self.map.remove(tuple)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
