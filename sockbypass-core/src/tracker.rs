//! Connection lifecycle handling.
//!
//! The tracker sees three events per socket: active establish (this side
//! connected), passive establish (this side accepted) and state changes.
//! It correlates a proxy's outbound leg with the accepted connection on the
//! far end of that leg and keeps every table in step with socket lifetime.
//!
//! Handlers never block and never retry. A refused insert only costs the
//! flow its bypass; the connection itself is unaffected.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bypass::Tables;
use crate::error::TableError;
use crate::tuple::ConnectionTuple;

/// Socket address family as reported by the lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    /// Dual-stack socket; carries IPv4 fields only for v4-mapped peers.
    Inet6,
}

/// TCP states a state-change event can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
}

/// A socket as seen by a lifecycle hook.
#[derive(Debug, Clone)]
pub struct SockOps<S> {
    pub family: AddressFamily,
    /// The socket's own view of its connection.
    pub tuple: ConnectionTuple,
    /// Live handle registered in the redirect table on establish.
    pub socket: S,
}

impl<S> SockOps<S> {
    pub fn inet(tuple: ConnectionTuple, socket: S) -> Self {
        Self {
            family: AddressFamily::Inet,
            tuple,
            socket,
        }
    }

    // IPv6 sockets only qualify when they carry an IPv4 peer.
    fn is_ipv4(&self) -> bool {
        self.family == AddressFamily::Inet || !self.tuple.remote.addr.is_unspecified()
    }
}

/// What a lifecycle event did to the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// Event not relevant: non-IPv4, loopback self-connect, or a state change
    /// other than close.
    Ignored,
    /// Socket registered for redirection; no pair created.
    Registered,
    /// Accepted connection has no pending origin and was left alone.
    Uncorrelated,
    /// A proxy pair was created between these two socket tuples.
    Correlated {
        initiator: ConnectionTuple,
        acceptor: ConnectionTuple,
    },
    /// Close handled; all rows for the socket are gone.
    Closed,
    /// A bounded table refused an insert. The event was otherwise handled.
    Degraded(TableError),
}

pub struct ConnectionTracker<S> {
    tables: Arc<Tables<S>>,
    sidecar: Ipv4Addr,
}

impl<S: Clone> ConnectionTracker<S> {
    pub fn new(tables: Arc<Tables<S>>, sidecar: Ipv4Addr) -> Self {
        Self { tables, sidecar }
    }

    /// This side initiated the connection.
    pub fn active_established(&self, ops: &SockOps<S>) -> Tracked {
        if !ops.is_ipv4() {
            return Tracked::Ignored;
        }
        let tuple = ops.tuple;

        if tuple.local.addr == self.sidecar {
            return self.register(ops);
        }
        if tuple.local.addr == tuple.remote.addr {
            trace!(%tuple, "self-connect, not tracked");
            return Tracked::Ignored;
        }

        // The accepting side will see our local endpoint as its remote.
        let pending = self.tables.pending.record(tuple.local, tuple.remote);
        let registered = self.register(ops);
        match pending {
            Ok(recorded) => {
                trace!(%tuple, recorded, "outbound leg established");
                registered
            }
            Err(err) => {
                warn!(%tuple, %err, "pending origin not recorded; flow stays on proxy path");
                Tracked::Degraded(err)
            }
        }
    }

    /// This side accepted the connection.
    pub fn passive_established(&self, ops: &SockOps<S>) -> Tracked {
        if !ops.is_ipv4() {
            return Tracked::Ignored;
        }
        let tuple = ops.tuple;

        let mut outcome = Tracked::Uncorrelated;
        if tuple.remote.addr == self.sidecar {
            outcome = self.register(ops);
        }

        // Consumed here, so two racing accepts cannot both claim one origin.
        let Some(original_dst) = self.tables.pending.remove(&tuple.remote) else {
            return outcome;
        };

        // The initiating socket's own tuple, rebuilt from what it recorded.
        let initiator = ConnectionTuple::new(tuple.remote, original_dst);
        let acceptor = tuple;
        let paired = self.tables.proxy.insert_pair(initiator, acceptor);
        let registered = self.register(ops);

        match (paired, registered) {
            (Err(err), _) => {
                warn!(%initiator, %acceptor, %err, "proxy pair not created; flow stays on proxy path");
                Tracked::Degraded(err)
            }
            (Ok(()), Tracked::Degraded(err)) => Tracked::Degraded(err),
            (Ok(()), _) => {
                debug!(%initiator, %acceptor, "proxy pair correlated");
                Tracked::Correlated {
                    initiator,
                    acceptor,
                }
            }
        }
    }

    /// Only a transition to [`TcpState::Close`] does anything.
    pub fn state_changed(&self, ops: &SockOps<S>, new_state: TcpState) -> Tracked {
        if !ops.is_ipv4() || new_state != TcpState::Close {
            return Tracked::Ignored;
        }
        let tuple = ops.tuple;

        let proxy = self.tables.proxy.remove(&tuple);
        let pending = self.tables.pending.remove(&tuple.local);
        self.tables.redirect.unregister(&tuple);
        trace!(
            %tuple,
            had_proxy = proxy.is_some(),
            had_pending = pending.is_some(),
            "socket closed"
        );
        Tracked::Closed
    }

    fn register(&self, ops: &SockOps<S>) -> Tracked {
        match self.tables.redirect.register(ops.tuple, ops.socket.clone()) {
            Ok(()) => Tracked::Registered,
            Err(err) => {
                warn!(tuple = %ops.tuple, %err, "socket not registered for redirection");
                Tracked::Degraded(err)
            }
        }
    }
}
