//! Egress frame decoding down to the TCP ports.
//!
//! Each header is decoded from a bounds-checked slice into a small value
//! type; anything that is not a complete Ethernet / IPv4 / TCP stack comes
//! back as a [`DecodeError`]. Payload bytes are never looked at.

use std::net::Ipv4Addr;

use crate::error::DecodeError;
use crate::tuple::{ConnectionTuple, Endpoint};

pub const ETH_HLEN: usize = 14;
pub const VLAN_HLEN: usize = 4;
pub const IPV4_MIN_HLEN: usize = 20;
pub const TCP_MIN_HLEN: usize = 20;

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;
pub const IPPROTO_TCP: u8 = 6;

const IP_OFFSET_MASK: u16 = 0x1FFF;

/// Up to two stacked tags (802.1ad outer, 802.1Q inner).
const MAX_VLAN_TAGS: usize = 2;

fn take<'a>(buf: &'a [u8], len: usize, layer: &'static str) -> Result<&'a [u8], DecodeError> {
    buf.get(..len).ok_or(DecodeError::Truncated {
        layer,
        needed: len,
        available: buf.len(),
    })
}

fn be16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Ethertype after any VLAN tags.
    pub ether_type: u16,
    pub vlan_tags: u8,
    /// Offset of the network header within the frame.
    pub header_len: usize,
}

impl EthernetHeader {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let eth = take(frame, ETH_HLEN, "ethernet")?;
        let mut ether_type = be16(eth, 12);
        let mut offset = ETH_HLEN;
        let mut vlan_tags = 0u8;

        for _ in 0..MAX_VLAN_TAGS {
            if ether_type != ETH_P_8021Q && ether_type != ETH_P_8021AD {
                break;
            }
            let rest = frame.get(offset..).unwrap_or_default();
            let tag = take(rest, VLAN_HLEN, "vlan")?;
            ether_type = be16(tag, 2);
            offset += VLAN_HLEN;
            vlan_tags += 1;
        }

        Ok(Self {
            ether_type,
            vlan_tags,
            header_len: offset,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub fragment_offset: u16,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn decode(packet: &[u8]) -> Result<Self, DecodeError> {
        let fixed = take(packet, IPV4_MIN_HLEN, "ipv4")?;
        let version = fixed[0] >> 4;
        if version != 4 {
            return Err(DecodeError::BadIpVersion { version });
        }
        let ihl = fixed[0] & 0x0F;
        let header_len = usize::from(ihl) * 4;
        if header_len < IPV4_MIN_HLEN {
            return Err(DecodeError::BadIpHeaderLength { ihl });
        }
        take(packet, header_len, "ipv4")?;

        Ok(Self {
            header_len,
            fragment_offset: be16(fixed, 6) & IP_OFFSET_MASK,
            protocol: fixed[9],
            src: Ipv4Addr::new(fixed[12], fixed[13], fixed[14], fixed[15]),
            dst: Ipv4Addr::new(fixed[16], fixed[17], fixed[18], fixed[19]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub header_len: usize,
}

impl TcpHeader {
    pub fn decode(segment: &[u8]) -> Result<Self, DecodeError> {
        let fixed = take(segment, TCP_MIN_HLEN, "tcp")?;
        let doff = fixed[12] >> 4;
        let header_len = usize::from(doff) * 4;
        if header_len < TCP_MIN_HLEN {
            return Err(DecodeError::BadTcpDataOffset { doff });
        }
        Ok(Self {
            src_port: be16(fixed, 0),
            dst_port: be16(fixed, 2),
            header_len,
        })
    }
}

/// Decodes an egress Ethernet frame into the sending socket's own tuple:
/// source as `local`, destination as `remote`.
pub fn egress_tuple(frame: &[u8]) -> Result<ConnectionTuple, DecodeError> {
    let eth = EthernetHeader::decode(frame)?;
    if eth.ether_type != ETH_P_IP {
        return Err(DecodeError::NotIpv4 {
            ether_type: eth.ether_type,
        });
    }

    let packet = &frame[eth.header_len..];
    let ip = Ipv4Header::decode(packet)?;
    if ip.fragment_offset != 0 {
        return Err(DecodeError::Fragment);
    }
    if ip.protocol != IPPROTO_TCP {
        return Err(DecodeError::NotTcp {
            protocol: ip.protocol,
        });
    }

    let tcp = TcpHeader::decode(&packet[ip.header_len..])?;
    Ok(ConnectionTuple::new(
        Endpoint::new(ip.src, tcp.src_port),
        Endpoint::new(ip.dst, tcp.dst_port),
    ))
}
