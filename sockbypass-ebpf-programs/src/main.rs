//! Kernel half of the sidecar bypass.
//!
//! - `bypass_sockops` (sockops): records pending origins, pairs the
//!   application and proxy sockets in `MAP_PROXY`, registers every
//!   tracked socket in `MAP_REDIR` and cleans up on close.
//! - `bypass_redir` (sk_msg): short-circuits data between paired sockets.
//! - `bypass_disable` (tc egress): a tracked connection that still puts a
//!   frame on the wire is marked disabled.
//!
//! Map layouts come from `sockbypass-common`; the userspace model of the
//! same logic lives in `sockbypass-core`.
#![no_std]
#![no_main]

use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

use aya_ebpf::{
    bindings::{
        sk_action::SK_PASS, BPF_ANY, BPF_F_INGRESS, BPF_NOEXIST, BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB,
        BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB, BPF_SOCK_OPS_STATE_CB, BPF_SOCK_OPS_STATE_CB_FLAG,
        BPF_TCP_CLOSE, TC_ACT_OK,
    },
    bpf_printk,
    macros::{classifier, map, sk_msg, sock_ops},
    maps::{Array, HashMap, SockHash},
    programs::{SkMsgContext, SockOpsContext, TcContext},
};
use sockbypass_common::{
    debug_slot, proxy_flag, Addr2Tuple, ProxyValue, Socket4Tuple, INBOUND_SIDECAR_IP, MAP_SIZE,
};

const AF_INET: u32 = 2;

// ── BPF maps ─────────────────────────────────────────────────────────────────

/// Pending origins: initiator local endpoint -> original destination.
#[map]
static MAP_ACTIVE_ESTAB: HashMap<Addr2Tuple, Addr2Tuple> = HashMap::pinned(MAP_SIZE, 0);

/// Socket tuple -> partner tuple plus proxy state.
#[map]
static MAP_PROXY: HashMap<Socket4Tuple, ProxyValue> = HashMap::pinned(MAP_SIZE, 0);

/// Socket tuple -> live socket, the redirect target set.
#[map]
static MAP_REDIR: SockHash<Socket4Tuple> = SockHash::pinned(MAP_SIZE, 0);

#[map]
static DEBUG_MAP: Array<u32> = Array::pinned(debug_slot::COUNT, 0);

// ── sockops ──────────────────────────────────────────────────────────────────

#[inline(always)]
fn sockops_tuple(ctx: &SockOpsContext) -> Socket4Tuple {
    Socket4Tuple {
        local: Addr2Tuple { ip4: ctx.local_ip4(), port: ctx.local_port() },
        remote: Addr2Tuple { ip4: ctx.remote_ip4(), port: u32::from_be(ctx.remote_port()) },
    }
}

#[sock_ops]
pub fn bypass_sockops(ctx: SockOpsContext) -> u32 {
    // IPv4 and v4-mapped dual-stack sockets only.
    if !(ctx.family() == AF_INET || ctx.remote_ip4() != 0) {
        return 0;
    }
    let _ = ctx.set_cb_flags(BPF_SOCK_OPS_STATE_CB_FLAG as i32);

    match ctx.op() {
        BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB => active_established(&ctx),
        BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB => passive_established(&ctx),
        BPF_SOCK_OPS_STATE_CB => {
            if ctx.arg(1) == BPF_TCP_CLOSE {
                closed(&ctx);
            }
        }
        _ => {}
    }
    0
}

#[inline(always)]
fn register(ctx: &SockOpsContext, key: &mut Socket4Tuple) {
    let _ = MAP_REDIR.update(key, unsafe { &mut *ctx.ops }, BPF_ANY as u64);
}

#[inline(always)]
fn active_established(ctx: &SockOpsContext) {
    let mut key = sockops_tuple(ctx);
    if key.local.ip4 == INBOUND_SIDECAR_IP {
        register(ctx, &mut key);
        return;
    }
    if key.local.ip4 == key.remote.ip4 {
        return;
    }

    let _ = MAP_ACTIVE_ESTAB.insert(&key.local, &key.remote, BPF_NOEXIST as u64);
    register(ctx, &mut key);
}

#[inline(always)]
fn passive_established(ctx: &SockOpsContext) {
    let mut key = sockops_tuple(ctx);
    if key.remote.ip4 == INBOUND_SIDECAR_IP {
        register(ctx, &mut key);
    }

    let Some(origin) = (unsafe { MAP_ACTIVE_ESTAB.get(&key.remote) }).copied() else {
        return;
    };

    let initiator = Socket4Tuple { local: key.remote, remote: origin };
    let acceptor = key;
    let _ = MAP_PROXY.insert(
        &initiator,
        &ProxyValue { tuple: acceptor, flag: proxy_flag::INIT },
        BPF_ANY as u64,
    );
    let _ = MAP_PROXY.insert(
        &acceptor,
        &ProxyValue { tuple: initiator, flag: proxy_flag::INIT },
        BPF_ANY as u64,
    );

    register(ctx, &mut key);
    let _ = MAP_ACTIVE_ESTAB.remove(&key.remote);
}

#[inline(always)]
fn closed(ctx: &SockOpsContext) {
    let key = sockops_tuple(ctx);
    let _ = MAP_PROXY.remove(&key);
    let _ = MAP_ACTIVE_ESTAB.remove(&key.local);
}

// ── sk_msg ───────────────────────────────────────────────────────────────────

#[sk_msg]
pub fn bypass_redir(ctx: SkMsgContext) -> u32 {
    let md = unsafe { &*ctx.msg };
    let own = Socket4Tuple {
        local: Addr2Tuple { ip4: md.local_ip4, port: md.local_port },
        remote: Addr2Tuple { ip4: md.remote_ip4, port: u32::from_be(md.remote_port) },
    };

    let mut target = if own.local.ip4 == INBOUND_SIDECAR_IP || own.remote.ip4 == INBOUND_SIDECAR_IP {
        own.reversed()
    } else {
        let Some(entry) = MAP_PROXY.get_ptr_mut(&own) else {
            return SK_PASS;
        };
        let entry = unsafe { &mut *entry };
        match entry.flag {
            proxy_flag::ENABLED => entry.tuple,
            proxy_flag::INIT => {
                // First data unit only arms the pair.
                entry.flag = proxy_flag::ENABLED;
                return SK_PASS;
            }
            _ => return SK_PASS,
        }
    };

    let rc = MAP_REDIR.redirect_msg(&ctx, &mut target, BPF_F_INGRESS as u64);
    if rc == SK_PASS as i64 && debug_enabled() {
        unsafe {
            bpf_printk!(b"data redirection succeed: [%x]->[%x]", own.local.ip4, own.remote.ip4);
        }
        if let Some(packets) = DEBUG_MAP.get_ptr_mut(debug_slot::PACKETS) {
            unsafe { AtomicU32::from_ptr(packets) }.fetch_add(1, Ordering::Relaxed);
        }
    }
    SK_PASS
}

#[inline(always)]
fn debug_enabled() -> bool {
    matches!(DEBUG_MAP.get(debug_slot::ENABLED), Some(&1))
}

// ── tc egress ────────────────────────────────────────────────────────────────

const ETH_HLEN: usize = 14;
const VLAN_HLEN: usize = 4;
const ETH_P_IP: u16 = 0x0800_u16.swap_bytes();
const ETH_P_8021Q: u16 = 0x8100_u16.swap_bytes();
const ETH_P_8021AD: u16 = 0x88A8_u16.swap_bytes();
const IP_OFFSET: u16 = 0x1FFF_u16.swap_bytes();
const IPPROTO_TCP: u8 = 6;

/// IPv4 header without options; only the fields the classifier reads.
#[repr(C)]
#[derive(Clone, Copy)]
struct IpHdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32,
    daddr: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct TcpPorts {
    source: u16,
    dest: u16,
}

#[classifier]
pub fn bypass_disable(ctx: TcContext) -> i32 {
    let _ = try_disable(&ctx);
    TC_ACT_OK as i32
}

#[inline(always)]
fn try_disable(ctx: &TcContext) -> Result<(), i64> {
    let mut offset = ETH_HLEN;
    let mut proto: u16 = ctx.load(12)?;

    // Up to two VLAN tags (QinQ / 802.1ad)
    if proto == ETH_P_8021Q || proto == ETH_P_8021AD {
        proto = ctx.load(offset + 2)?;
        offset += VLAN_HLEN;
    }
    if proto == ETH_P_8021Q || proto == ETH_P_8021AD {
        proto = ctx.load(offset + 2)?;
        offset += VLAN_HLEN;
    }
    if proto != ETH_P_IP {
        return Ok(());
    }

    let ip: IpHdr = ctx.load(offset)?;
    // Non-first fragments carry no TCP header.
    if ip.protocol != IPPROTO_TCP || ip.frag_off & IP_OFFSET != 0 {
        return Ok(());
    }
    let ihl = usize::from(ip.version_ihl & 0x0F) * 4;
    if ihl < mem::size_of::<IpHdr>() {
        return Ok(());
    }
    let ports: TcpPorts = ctx.load(offset + ihl)?;

    let key = Socket4Tuple {
        local: Addr2Tuple { ip4: ip.saddr, port: u32::from(u16::from_be(ports.source)) },
        remote: Addr2Tuple { ip4: ip.daddr, port: u32::from(u16::from_be(ports.dest)) },
    };
    if let Some(entry) = MAP_PROXY.get_ptr_mut(&key) {
        let entry = unsafe { &mut *entry };
        if entry.flag != proxy_flag::DISABLED {
            entry.flag = proxy_flag::DISABLED;
        }
    }
    Ok(())
}

// ── Required for no_std + no_main ────────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
