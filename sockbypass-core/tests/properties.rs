mod helpers;

use std::net::Ipv4Addr;

use helpers::*;
use proptest::prelude::*;
use sockbypass_core::packet::egress_tuple;
use sockbypass_core::{Bypass, ConnectionTuple, Endpoint, ProxyState, SockOps, TcpState, Verdict};

fn endpoint() -> impl Strategy<Value = Endpoint> {
    (1u8..=4, 1000u16..1010).prop_map(|(last, port)| Endpoint::new(Ipv4Addr::new(10, 1, 0, last), port))
}

#[derive(Debug, Clone)]
enum Op {
    Active(Endpoint, Endpoint),
    Passive(Endpoint, Endpoint),
    Close(Endpoint, Endpoint),
    Message(Endpoint, Endpoint),
    Disable(Endpoint, Endpoint),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (endpoint(), endpoint()).prop_map(|(l, r)| Op::Active(l, r)),
        (endpoint(), endpoint()).prop_map(|(l, r)| Op::Passive(l, r)),
        (endpoint(), endpoint()).prop_map(|(l, r)| Op::Close(l, r)),
        (endpoint(), endpoint()).prop_map(|(l, r)| Op::Message(l, r)),
        (endpoint(), endpoint()).prop_map(|(l, r)| Op::Disable(l, r)),
    ]
}

proptest! {
    #[test]
    fn decoder_never_panics(frame in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = egress_tuple(&frame);
        let bypass = Bypass::<u64>::new();
        let _ = bypass.on_egress(&frame);
    }

    #[test]
    fn decoder_reads_back_any_tuple(src in endpoint(), dst in endpoint()) {
        prop_assert_eq!(egress_tuple(&tcp_frame(src, dst)), Ok(ConnectionTuple::new(src, dst)));
    }

    /// Arbitrary event interleavings: no redirect without an Enabled row or
    /// a registered target, and every redirect goes to the row's partner.
    #[test]
    fn redirects_follow_the_table(ops in prop::collection::vec(op(), 0..64)) {
        let bypass = Bypass::<u64>::new();
        let mut next_socket = 0u64;

        for op in ops {
            match op {
                Op::Active(l, r) => {
                    next_socket += 1;
                    bypass.active_established(&SockOps::inet(ConnectionTuple::new(l, r), next_socket));
                }
                Op::Passive(l, r) => {
                    next_socket += 1;
                    bypass.passive_established(&SockOps::inet(ConnectionTuple::new(l, r), next_socket));
                }
                Op::Close(l, r) => {
                    let t = ConnectionTuple::new(l, r);
                    bypass.state_changed(&SockOps::inet(t, 0), TcpState::Close);
                    prop_assert!(bypass.tables().proxy.get(&t).is_none());
                    prop_assert!(bypass.tables().pending.get(&l).is_none());
                }
                Op::Message(l, r) => {
                    let t = ConnectionTuple::new(l, r);
                    let before = bypass.tables().proxy.get(&t);
                    match bypass.on_message(&t) {
                        Verdict::Pass => {}
                        Verdict::Redirect { target, socket } => {
                            let entry = before.ok_or_else(|| TestCaseError::fail("redirect without row"))?;
                            prop_assert_eq!(entry.state, ProxyState::Enabled);
                            prop_assert_eq!(target, entry.redirect);
                            prop_assert_eq!(bypass.tables().redirect.lookup(&target), Some(socket));
                        }
                    }
                }
                Op::Disable(l, r) => {
                    let t = ConnectionTuple::new(l, r);
                    bypass.on_egress(&tcp_frame(l, r));
                    if let Some(entry) = bypass.tables().proxy.get(&t) {
                        prop_assert_eq!(entry.state, ProxyState::Disabled);
                    }
                }
            }
        }
    }
}
