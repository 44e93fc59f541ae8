use thiserror::Error;

/// A bounded table refused an insert.
///
/// Never fatal: the flow simply keeps taking the proxy path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("{table} table is full ({capacity} entries)")]
    Full {
        table: &'static str,
        capacity: usize,
    },
}

/// Why an egress frame could not be reduced to a TCP 4-tuple.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{layer} header truncated: need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("not an IPv4 frame (ethertype {ether_type:#06x})")]
    NotIpv4 { ether_type: u16 },

    #[error("IP version {version} in an IPv4 frame")]
    BadIpVersion { version: u8 },

    #[error("invalid IPv4 header length {ihl}")]
    BadIpHeaderLength { ihl: u8 },

    #[error("non-first IPv4 fragment carries no TCP header")]
    Fragment,

    #[error("not TCP (IP protocol {protocol})")]
    NotTcp { protocol: u8 },

    #[error("invalid TCP data offset {doff}")]
    BadTcpDataOffset { doff: u8 },
}
