use std::net::Ipv4Addr;
use std::sync::Arc;

use sockbypass_common::INBOUND_SIDECAR_OCTETS;

use crate::debug::DebugTable;
use crate::disable::{DisablePath, Egress};
use crate::engine::{RedirectionEngine, Verdict};
use crate::redirect::RedirectTable;
use crate::table::{PendingOriginTable, ProxyTable, DEFAULT_CAPACITY};
use crate::tracker::{ConnectionTracker, SockOps, TcpState, Tracked};
use crate::tuple::ConnectionTuple;

/// Sidecar inbound listener address. Traffic touching it is always spliced.
pub const SIDECAR_INBOUND_ADDR: Ipv4Addr = Ipv4Addr::new(
    INBOUND_SIDECAR_OCTETS[0],
    INBOUND_SIDECAR_OCTETS[1],
    INBOUND_SIDECAR_OCTETS[2],
    INBOUND_SIDECAR_OCTETS[3],
);

/// The shared correlation tables.
pub struct Tables<S> {
    pub pending: PendingOriginTable,
    pub proxy: ProxyTable,
    pub redirect: RedirectTable<S>,
    pub debug: DebugTable,
}

impl<S: Clone> Tables<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: PendingOriginTable::new(capacity),
            proxy: ProxyTable::new(capacity),
            redirect: RedirectTable::new(capacity),
            debug: DebugTable::new(),
        }
    }
}

/// All four handlers wired to one set of tables.
///
/// Every method is a short synchronous handler safe to call from any
/// number of threads at once; share the value behind an `Arc`.
pub struct Bypass<S> {
    tables: Arc<Tables<S>>,
    tracker: ConnectionTracker<S>,
    engine: RedirectionEngine<S>,
    disable: DisablePath<S>,
}

impl<S: Clone> Bypass<S> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Bounds every table to `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let tables = Arc::new(Tables::new(capacity));
        Self {
            tracker: ConnectionTracker::new(Arc::clone(&tables), SIDECAR_INBOUND_ADDR),
            engine: RedirectionEngine::new(Arc::clone(&tables), SIDECAR_INBOUND_ADDR),
            disable: DisablePath::new(Arc::clone(&tables)),
            tables,
        }
    }

    pub fn tables(&self) -> &Tables<S> {
        &self.tables
    }

    pub fn active_established(&self, ops: &SockOps<S>) -> Tracked {
        self.tracker.active_established(ops)
    }

    pub fn passive_established(&self, ops: &SockOps<S>) -> Tracked {
        self.tracker.passive_established(ops)
    }

    pub fn state_changed(&self, ops: &SockOps<S>, new_state: TcpState) -> Tracked {
        self.tracker.state_changed(ops, new_state)
    }

    pub fn on_message(&self, own: &ConnectionTuple) -> Verdict<S> {
        self.engine.on_message(own)
    }

    pub fn on_egress(&self, frame: &[u8]) -> Egress {
        self.disable.on_egress(frame)
    }
}

impl<S: Clone> Default for Bypass<S> {
    fn default() -> Self {
        Self::new()
    }
}
