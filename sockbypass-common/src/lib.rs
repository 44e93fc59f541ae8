//! Types shared between the kernel programs and the userspace side.
//!
//! This crate is `no_std` so it can be compiled for both targets:
//! - `bpfel-unknown-none` (sockops, sk_msg and TC egress programs)
//! - the host target (`sockbypass-core` conversions, `sockbypass-ebpf` loader)
//!
//! Enable the `aya-pod` feature in the userspace crate to get the
//! `aya::Pod` impls required for reading values out of BPF maps.
//!
//! Byte order: `ip4` fields hold the address exactly as the kernel exposes it
//! (network order, read as a native integer). `port` fields hold host-order
//! ports: the sockops/sk_msg contexts give `local_port` in host order and the
//! programs convert `remote_port` before building a key.
#![cfg_attr(not(test), no_std)]

/// Sidecar inbound listener address, 127.0.0.6, as a network-order `u32`
/// read on a little-endian host.
pub const INBOUND_SIDECAR_IP: u32 = 0x0600_007f;

/// Same address as octets, for hosts of either endianness.
pub const INBOUND_SIDECAR_OCTETS: [u8; 4] = [127, 0, 0, 6];

/// Maximum entries of every correlation map.
pub const MAP_SIZE: u32 = 65535;

/// `ProxyValue::flag` values. Numeric values are part of the map ABI.
pub mod proxy_flag {
    pub const DISABLED: u32 = 0;
    pub const INIT: u32 = 1;
    pub const ENABLED: u32 = 2;
}

/// Slots of the `DEBUG_MAP` array.
pub mod debug_slot {
    /// 1 turns on redirect tracing and packet counting.
    pub const ENABLED: u32 = 0;
    /// Number of data units redirected while debugging was on.
    pub const PACKETS: u32 = 1;
    /// Array length.
    pub const COUNT: u32 = 2;
}

/// Map and program names as they appear in the compiled object.
pub mod names {
    pub const MAP_ACTIVE_ESTAB: &str = "MAP_ACTIVE_ESTAB";
    pub const MAP_PROXY: &str = "MAP_PROXY";
    pub const MAP_REDIR: &str = "MAP_REDIR";
    pub const DEBUG_MAP: &str = "DEBUG_MAP";

    pub const PROG_SOCKOPS: &str = "bypass_sockops";
    pub const PROG_REDIR: &str = "bypass_redir";
    pub const PROG_DISABLE: &str = "bypass_disable";
}

/// One endpoint of a connection.
///
/// ```text
/// offset 0: ip4   u32  (network byte order)
/// offset 4: port  u32  (host byte order, upper 16 bits zero)
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Addr2Tuple {
    pub ip4: u32,
    pub port: u32,
}

/// A directed view of a TCP connection: `local` is the socket holding the key.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Socket4Tuple {
    pub local: Addr2Tuple,
    pub remote: Addr2Tuple,
}

impl Socket4Tuple {
    /// The same connection as seen from the other socket.
    #[inline(always)]
    pub const fn reversed(&self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

/// `MAP_PROXY` value: partner tuple plus a `proxy_flag` value.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyValue {
    pub tuple: Socket4Tuple,
    pub flag: u32,
}

const _: () = {
    use core::mem::{offset_of, size_of};
    assert!(size_of::<Addr2Tuple>() == 8);
    assert!(size_of::<Socket4Tuple>() == 16);
    assert!(offset_of!(Socket4Tuple, remote) == 8);
    assert!(size_of::<ProxyValue>() == 20);
    assert!(offset_of!(ProxyValue, flag) == 16);
};

// SAFETY: all types are `#[repr(C)]`, `Copy`, built from `u32` fields only
// and have no implicit padding (checked by the assertions above).
#[cfg(feature = "aya-pod")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for Addr2Tuple {}

#[cfg(feature = "aya-pod")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for Socket4Tuple {}

#[cfg(feature = "aya-pod")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for ProxyValue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_constant_matches_octets() {
        assert_eq!(u32::from_le_bytes(INBOUND_SIDECAR_OCTETS), INBOUND_SIDECAR_IP);
    }

    #[test]
    fn reversed_swaps_sides() {
        let t = Socket4Tuple {
            local: Addr2Tuple { ip4: 1, port: 10 },
            remote: Addr2Tuple { ip4: 2, port: 20 },
        };
        assert_eq!(t.reversed().local, t.remote);
        assert_eq!(t.reversed().reversed(), t);
    }
}
