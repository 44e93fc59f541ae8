//! Shared builders for the integration tests
#![allow(dead_code)]

use std::net::Ipv4Addr;

use sockbypass_core::packet::{ETH_P_8021Q, ETH_P_IP, IPPROTO_TCP};
use sockbypass_core::{Bypass, ConnectionTuple, Endpoint, SockOps, Tracked};

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn ep(last: u8, port: u16) -> Endpoint {
    Endpoint::new(Ipv4Addr::new(10, 0, 0, last), port)
}

pub fn sidecar(port: u16) -> Endpoint {
    Endpoint::new(sockbypass_core::SIDECAR_INBOUND_ADDR, port)
}

pub fn tuple(local: Endpoint, remote: Endpoint) -> ConnectionTuple {
    ConnectionTuple::new(local, remote)
}

/// App socket 10.0.0.5:40000 dialing 10.0.0.9:8080.
pub fn app_leg() -> ConnectionTuple {
    tuple(ep(5, 40000), ep(9, 8080))
}

/// Sidecar listener socket that accepted the redirected app connection.
pub fn proxy_leg() -> ConnectionTuple {
    tuple(ep(5, 15001), ep(5, 40000))
}

pub const APP_SOCKET: u64 = 1;
pub const PROXY_SOCKET: u64 = 2;

/// Runs both establish events and returns the correlated pair
/// `(app_leg, proxy_leg)`.
pub fn correlate(bypass: &Bypass<u64>) -> Result<(ConnectionTuple, ConnectionTuple), String> {
    let app = app_leg();
    let proxy = proxy_leg();

    let active = bypass.active_established(&SockOps::inet(app, APP_SOCKET));
    if active != Tracked::Registered {
        return Err(format!("active establish returned {active:?}"));
    }
    match bypass.passive_established(&SockOps::inet(proxy, PROXY_SOCKET)) {
        Tracked::Correlated {
            initiator,
            acceptor,
        } if initiator == app && acceptor == proxy => Ok((app, proxy)),
        other => Err(format!("passive establish returned {other:?}")),
    }
}

/// Ethernet + IPv4 + TCP headers, no payload.
pub fn tcp_frame(src: Endpoint, dst: Endpoint) -> Vec<u8> {
    let mut frame = Vec::with_capacity(54);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]); // dst mac
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]); // src mac
    frame.extend_from_slice(&ETH_P_IP.to_be_bytes());
    push_ip_tcp(&mut frame, src, dst, IPPROTO_TCP);
    frame
}

/// Same as [`tcp_frame`] with one 802.1Q tag.
pub fn vlan_tcp_frame(src: Endpoint, dst: Endpoint) -> Vec<u8> {
    let mut frame = Vec::with_capacity(58);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame.extend_from_slice(&ETH_P_8021Q.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x64]); // vid 100
    frame.extend_from_slice(&ETH_P_IP.to_be_bytes());
    push_ip_tcp(&mut frame, src, dst, IPPROTO_TCP);
    frame
}

pub fn udp_frame(src: Endpoint, dst: Endpoint) -> Vec<u8> {
    let mut frame = tcp_frame(src, dst);
    frame[14 + 9] = 17;
    frame
}

fn push_ip_tcp(frame: &mut Vec<u8>, src: Endpoint, dst: Endpoint, protocol: u8) {
    frame.extend_from_slice(&[0x45, 0x00, 0x00, 40]); // v4 ihl5, total 40
    frame.extend_from_slice(&[0x12, 0x34, 0x40, 0x00]); // id, DF
    frame.extend_from_slice(&[64, protocol, 0x00, 0x00]); // ttl, proto, csum
    frame.extend_from_slice(&src.addr.octets());
    frame.extend_from_slice(&dst.addr.octets());

    frame.extend_from_slice(&src.port.to_be_bytes());
    frame.extend_from_slice(&dst.port.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 1]); // seq
    frame.extend_from_slice(&[0, 0, 0, 1]); // ack
    frame.extend_from_slice(&[0x50, 0x18]); // doff 5, PSH|ACK
    frame.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]); // window, csum, urg
}
