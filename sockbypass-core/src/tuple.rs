use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use sockbypass_common::{Addr2Tuple, Socket4Tuple};

/// IPv4 address plus port, both in host representation.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(sa: SocketAddrV4) -> Self {
        Self::new(*sa.ip(), sa.port())
    }
}

impl From<Endpoint> for SocketAddrV4 {
    fn from(ep: Endpoint) -> Self {
        SocketAddrV4::new(ep.addr, ep.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// One socket's view of a TCP connection. `local` is always the socket
/// holding the tuple, so the two sockets of a connection hold reversed tuples.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ConnectionTuple {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl ConnectionTuple {
    pub const fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    /// The tuple the other socket of this connection holds.
    #[inline]
    pub const fn reversed(&self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }

    /// True when either side sits on `addr`.
    #[inline]
    pub fn touches(&self, addr: Ipv4Addr) -> bool {
        self.local.addr == addr || self.remote.addr == addr
    }
}

impl fmt::Display for ConnectionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

// Kernel map layout: `ip4` is network order read as a native integer,
// `port` is host order widened to u32.

impl From<Addr2Tuple> for Endpoint {
    fn from(raw: Addr2Tuple) -> Self {
        Self {
            addr: Ipv4Addr::from(raw.ip4.to_ne_bytes()),
            port: raw.port as u16,
        }
    }
}

impl From<Endpoint> for Addr2Tuple {
    fn from(ep: Endpoint) -> Self {
        Self {
            ip4: u32::from_ne_bytes(ep.addr.octets()),
            port: u32::from(ep.port),
        }
    }
}

impl From<Socket4Tuple> for ConnectionTuple {
    fn from(raw: Socket4Tuple) -> Self {
        Self::new(raw.local.into(), raw.remote.into())
    }
}

impl From<ConnectionTuple> for Socket4Tuple {
    fn from(t: ConnectionTuple) -> Self {
        Self {
            local: t.local.into(),
            remote: t.remote.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_address_keeps_network_order() {
        let ep = Endpoint::new(Ipv4Addr::new(127, 0, 0, 6), 15006);
        let raw = Addr2Tuple::from(ep);
        assert_eq!(raw.ip4.to_ne_bytes(), [127, 0, 0, 6]);
        assert_eq!(raw.port, 15006);
        assert_eq!(Endpoint::from(raw), ep);
    }

    #[test]
    fn display_is_readable() {
        let t = ConnectionTuple::new(
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 5), 40000),
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 9), 8080),
        );
        assert_eq!(t.to_string(), "10.0.0.5:40000 -> 10.0.0.9:8080");
    }
}
