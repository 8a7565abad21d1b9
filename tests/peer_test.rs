//! Session-level integration tests: handshake, channels, loss recovery,
//! and teardown, driven over in-memory wires with a virtual clock.

mod common;

use bytes::Bytes;
use common::{decode_datagram, Dir, Pair};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relink::{Channel, Command, ErrorKind, PeerState, SessionConfig};

fn message(i: usize, len: usize) -> Bytes {
    Bytes::from(vec![(i % 256) as u8; len])
}

#[test]
fn handshake_establishes_both_sides() {
    common::init_tracing();
    let mut pair = Pair::new(SessionConfig::default());
    pair.establish();

    assert_eq!(pair.a_events.0.borrow().authenticated, 1);
    assert_eq!(pair.b_events.0.borrow().authenticated, 1);
    assert_ne!(pair.a.conv(), 0);
    assert_eq!(pair.a.conv(), pair.b.conv());
}

#[test]
fn duplicated_handshakes_authenticate_once() {
    let mut pair = Pair::new(SessionConfig::default());

    for _ in 0..6 {
        pair.step_with(10, |_, datagrams| {
            let mut doubled = datagrams.clone();
            doubled.extend(datagrams);
            doubled
        });
    }

    assert!(pair.a.is_authenticated());
    assert!(pair.b.is_authenticated());
    assert_eq!(pair.a_events.0.borrow().authenticated, 1);
    assert_eq!(pair.b_events.0.borrow().authenticated, 1);
}

#[test]
fn reordered_delivery_stays_in_order() {
    let mut pair = Pair::new(SessionConfig::new().fast_mode());
    pair.establish();

    let sent: Vec<Bytes> = (0..12).map(|i| message(i, 64)).collect();
    for msg in &sent {
        pair.a.send(msg.clone(), Channel::Reliable).unwrap();
    }

    for _ in 0..200 {
        pair.step_with(10, |_, mut datagrams| {
            datagrams.reverse();
            datagrams
        });
    }

    assert_eq!(pair.b_events.0.borrow().reliable, sent);
}

#[test]
fn duplicated_delivery_is_exactly_once() {
    let mut pair = Pair::new(SessionConfig::new().fast_mode());
    pair.establish();

    let sent: Vec<Bytes> = (0..10).map(|i| message(i, 100)).collect();
    for msg in &sent {
        pair.a.send(msg.clone(), Channel::Reliable).unwrap();
    }

    for _ in 0..150 {
        pair.step_with(10, |_, datagrams| {
            let mut doubled = datagrams.clone();
            doubled.extend(datagrams);
            doubled
        });
    }

    assert_eq!(pair.b_events.0.borrow().reliable, sent);
}

#[test]
fn loss_recovered_in_order() {
    let mut pair = Pair::new(SessionConfig::new().fast_mode());
    pair.establish();

    let sent: Vec<Bytes> = (0..30).map(|i| message(i, 200)).collect();
    for msg in &sent {
        pair.a.send(msg.clone(), Channel::Reliable).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..800 {
        pair.step_with(10, |_, datagrams| {
            datagrams
                .into_iter()
                .filter(|_| rng.gen::<f32>() >= 0.25)
                .collect()
        });
    }

    assert_eq!(pair.b_events.0.borrow().reliable, sent);
}

#[test]
fn lost_fragment_retransmitted_once() {
    let config = SessionConfig::new()
        .mtu(1126)
        .interval(10)
        .congestion_control(false);
    let mut pair = Pair::new(config);
    pair.establish();

    // 5000 bytes over an 1100-byte payload budget: five fragments.
    let payload: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();
    let msg = Bytes::from(payload);
    pair.a.send(msg.clone(), Channel::Reliable).unwrap();

    let mut dropped = false;
    for _ in 0..80 {
        pair.step_with(10, |dir, mut datagrams| {
            if dir == Dir::AToB && !dropped {
                let pos = datagrams.iter().position(|d| {
                    decode_datagram(d).first().is_some_and(|seg| {
                        seg.header.cmd == Command::Data && seg.header.frg_index == 2
                    })
                });
                if let Some(pos) = pos {
                    datagrams.remove(pos);
                    dropped = true;
                }
            }
            datagrams
        });
    }

    assert!(dropped, "the targeted fragment never went out");
    assert_eq!(pair.a.stats().retransmissions, 1);
    assert_eq!(pair.a.stats().fast_retransmissions, 0);
    assert_eq!(pair.b_events.0.borrow().reliable, vec![msg]);
}

#[test]
fn send_window_bounds_inflight() {
    let config = SessionConfig::new()
        .window_size(4, 128)
        .interval(10)
        .congestion_control(false);
    let mut pair = Pair::new(config);
    pair.establish();

    let sent: Vec<Bytes> = (0..20).map(|i| message(i, 64)).collect();
    for msg in &sent {
        pair.a.send(msg.clone(), Channel::Reliable).unwrap();
    }

    for _ in 0..300 {
        pair.step(10);
        assert!(pair.a.stats().snd_buf_size <= 4);
    }

    assert_eq!(pair.b_events.0.borrow().reliable, sent);
}

#[test]
fn unreliable_channel_delivers() {
    let mut pair = Pair::new(SessionConfig::default());
    pair.establish();

    let msg = Bytes::from(vec![0x55u8; 256]);
    pair.a.send(msg.clone(), Channel::Unreliable).unwrap();
    pair.run(2, 10);

    assert_eq!(pair.b_events.0.borrow().unreliable, vec![msg]);
    assert!(pair.b_events.0.borrow().reliable.is_empty());
}

#[test]
fn oversized_unreliable_rejected_without_teardown() {
    let mut pair = Pair::new(SessionConfig::default());
    pair.establish();

    // One past the per-datagram payload budget.
    let too_big = Bytes::from(vec![0u8; 1375]);
    let err = pair.a.send(too_big, Channel::Unreliable);
    assert!(err.is_err());
    assert_eq!(
        pair.a_events.0.borrow().errors,
        vec![ErrorKind::OversizedMessage]
    );
    assert_eq!(pair.a.state(), PeerState::Authenticated);
}

#[test]
fn inactivity_timeout_tears_down() {
    let mut pair = Pair::new(SessionConfig::new().timeout(500));
    pair.establish();

    // Cut the link in both directions.
    for _ in 0..60 {
        pair.step_with(10, |_, _| Vec::new());
    }

    assert_eq!(pair.a.state(), PeerState::Closed);
    assert_eq!(pair.b.state(), PeerState::Closed);
    let a = pair.a_events.0.borrow();
    assert!(a.errors.contains(&ErrorKind::Timeout));
    assert_eq!(a.disconnected, 1);
    let b = pair.b_events.0.borrow();
    assert!(b.errors.contains(&ErrorKind::Timeout));
    assert_eq!(b.disconnected, 1);
}

#[test]
fn dead_link_tears_down_sender() {
    let config_a = SessionConfig::new().interval(10).max_retransmits(3);
    let config_b = SessionConfig::new().interval(10);
    let mut pair = Pair::asymmetric(config_a, config_b);
    pair.establish();

    pair.a.send(message(0, 512), Channel::Reliable).unwrap();

    // Forward path dead, return path alive: probes keep the sender from
    // hitting its inactivity timeout first.
    for _ in 0..150 {
        pair.step_with(10, |dir, datagrams| match dir {
            Dir::AToB => Vec::new(),
            Dir::BToA => datagrams,
        });
    }

    assert_eq!(pair.a.state(), PeerState::Closed);
    let a = pair.a_events.0.borrow();
    assert!(a.errors.contains(&ErrorKind::DeadLink));
    assert_eq!(a.disconnected, 1);
    assert_eq!(pair.b.state(), PeerState::Authenticated);
}

#[test]
fn closed_session_rejects_traffic() {
    let mut pair = Pair::new(SessionConfig::default());
    pair.establish();

    pair.a.disconnect();
    assert_eq!(pair.a.state(), PeerState::Closed);
    assert_eq!(pair.a_events.0.borrow().disconnected, 1);

    let err = pair.a.send(message(0, 8), Channel::Reliable);
    assert!(err.is_err());

    // Further input and ticks are inert.
    pair.run(5, 10);
    assert_eq!(pair.a_events.0.borrow().disconnected, 1);
}
