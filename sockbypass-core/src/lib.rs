#![forbid(unsafe_code)]

//! Connection correlation and redirection state machine for splicing
//! sidecar-proxied TCP connections between local sockets.
//!
//! [`Bypass`] bundles the handlers:
//! - [`ConnectionTracker`]: socket establish/close events maintain the tables
//! - [`RedirectionEngine`]: per data unit redirect-or-pass verdict
//! - [`DisablePath`]: egress frames force flows back onto the proxy path

pub mod bypass;
pub mod debug;
pub mod disable;
pub mod engine;
pub mod error;
pub mod packet;
pub mod redirect;
pub mod table;
pub mod tracker;
pub mod tuple;

pub use bypass::{Bypass, Tables, SIDECAR_INBOUND_ADDR};
pub use debug::DebugTable;
pub use disable::{DisablePath, Egress};
pub use engine::{RedirectionEngine, Verdict};
pub use error::{DecodeError, TableError};
pub use redirect::RedirectTable;
pub use table::{PendingOriginTable, ProxyEntry, ProxyState, ProxyTable, DEFAULT_CAPACITY};
pub use tracker::{AddressFamily, ConnectionTracker, SockOps, TcpState, Tracked};
pub use tuple::{ConnectionTuple, Endpoint};
