use std::sync::Arc;

use tracing::{debug, trace};

use crate::bypass::Tables;
use crate::error::DecodeError;
use crate::packet::egress_tuple;
use crate::table::ProxyState;
use crate::tuple::ConnectionTuple;

/// Effect of one egress frame on the proxy table. The frame itself is
/// always passed on unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Egress {
    /// Not a decodable IPv4/TCP frame.
    Skipped(DecodeError),
    /// No proxy row for the frame's tuple.
    Untracked,
    AlreadyDisabled,
    /// Row moved to `Disabled` from the given state.
    Disabled {
        tuple: ConnectionTuple,
        from: ProxyState,
    },
}

/// Packet-level observer forcing flows back onto the proxy path. Keyed by
/// the frame's own source/destination, the same orientation the sending
/// socket's proxy row uses.
pub struct DisablePath<S> {
    tables: Arc<Tables<S>>,
}

impl<S> DisablePath<S> {
    pub fn new(tables: Arc<Tables<S>>) -> Self {
        Self { tables }
    }

    pub fn on_egress(&self, frame: &[u8]) -> Egress {
        let tuple = match egress_tuple(frame) {
            Ok(tuple) => tuple,
            Err(err) => {
                trace!(%err, "egress frame skipped");
                return Egress::Skipped(err);
            }
        };

        match self.tables.proxy.disable(&tuple) {
            None => Egress::Untracked,
            Some(ProxyState::Disabled) => Egress::AlreadyDisabled,
            Some(from) => {
                debug!(%tuple, ?from, "proxy redirection disabled");
                Egress::Disabled { tuple, from }
            }
        }
    }
}
