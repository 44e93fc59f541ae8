//! Per data unit redirect-or-pass decision.
//!
//! Every lookup is a point read on a sharded map; the only write is the
//! one-time `Init` → `Enabled` transition. Data is never dropped: the
//! verdict either forwards to the target socket's ingress or lets the unit
//! continue on its normal path.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::debug;

use crate::bypass::Tables;
use crate::table::ProxyState;
use crate::tuple::ConnectionTuple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<S> {
    /// Continue on the normal (proxy) path, unmodified.
    Pass,
    /// Deliver directly into `socket`, the socket owning `target`.
    Redirect { target: ConnectionTuple, socket: S },
}

impl<S> Verdict<S> {
    pub fn is_redirect(&self) -> bool {
        matches!(self, Verdict::Redirect { .. })
    }
}

pub struct RedirectionEngine<S> {
    tables: Arc<Tables<S>>,
    sidecar: Ipv4Addr,
}

impl<S: Clone> RedirectionEngine<S> {
    pub fn new(tables: Arc<Tables<S>>, sidecar: Ipv4Addr) -> Self {
        Self { tables, sidecar }
    }

    /// Decides for one outbound data unit sent on the socket owning `own`.
    pub fn on_message(&self, own: &ConnectionTuple) -> Verdict<S> {
        let target = if own.touches(self.sidecar) {
            // Sidecar traffic goes straight to the peer socket on this host.
            own.reversed()
        } else {
            let Some(entry) = self.tables.proxy.get(own) else {
                return Verdict::Pass;
            };
            match entry.state {
                ProxyState::Disabled => return Verdict::Pass,
                ProxyState::Init => {
                    // First unit after correlation takes the slow path.
                    self.tables.proxy.enable(own);
                    return Verdict::Pass;
                }
                ProxyState::Enabled => entry.redirect,
            }
        };

        match self.tables.redirect.lookup(&target) {
            Some(socket) => {
                self.trace_redirect(own);
                Verdict::Redirect { target, socket }
            }
            None => Verdict::Pass,
        }
    }

    fn trace_redirect(&self, own: &ConnectionTuple) {
        let debug_table = &self.tables.debug;
        if debug_table.is_enabled() {
            debug!(local = %own.local, remote = %own.remote, "data redirection succeeded");
            debug_table.count_packet();
        }
    }
}
