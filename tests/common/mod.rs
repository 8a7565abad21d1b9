//! Shared harness for session-level integration tests: in-memory wires,
//! recorded callbacks, and a virtual-clock step driver.

use bytes::Bytes;
use relink::{Callbacks, Channel, ErrorKind, OutputFn, Peer, Segment, SessionConfig};
use std::cell::RefCell;
use std::rc::Rc;

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything a peer reported through its callbacks.
#[derive(Default)]
pub struct Events {
    pub authenticated: usize,
    pub disconnected: usize,
    pub errors: Vec<ErrorKind>,
    pub reliable: Vec<Bytes>,
    pub unreliable: Vec<Bytes>,
}

/// Callback implementation that records every event for later assertions.
#[derive(Clone, Default)]
pub struct Recorder(pub Rc<RefCell<Events>>);

impl Callbacks for Recorder {
    fn on_authenticated(&mut self) {
        self.0.borrow_mut().authenticated += 1;
    }

    fn on_data(&mut self, data: Bytes, channel: Channel) {
        match channel {
            Channel::Reliable => self.0.borrow_mut().reliable.push(data),
            Channel::Unreliable => self.0.borrow_mut().unreliable.push(data),
        }
    }

    fn on_disconnected(&mut self) {
        self.0.borrow_mut().disconnected += 1;
    }

    fn on_error(&mut self, kind: ErrorKind, _reason: &str) {
        self.0.borrow_mut().errors.push(kind);
    }
}

/// Datagrams in transit toward one peer.
pub type Wire = Rc<RefCell<Vec<Vec<u8>>>>;

fn wire_output(wire: &Wire) -> OutputFn {
    let wire = wire.clone();
    Box::new(move |datagram| {
        wire.borrow_mut().push(datagram.to_vec());
        Ok(())
    })
}

/// Decode every segment of one datagram.
pub fn decode_datagram(datagram: &[u8]) -> Vec<Segment> {
    let mut buf = Bytes::copy_from_slice(datagram);
    let mut segments = Vec::new();
    while !buf.is_empty() {
        match Segment::decode(&mut buf) {
            Some(segment) => segments.push(segment),
            None => break,
        }
    }
    segments
}

/// Direction of travel, passed to the shaping closure of
/// [`Pair::step_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    AToB,
    BToA,
}

/// Two peers joined by in-memory wires with one step of latency each way.
///
/// `a` initiates, `b` accepts. Each step advances the virtual clock,
/// delivers whatever the previous step put on the wires, then runs both
/// tick entry points on both peers.
pub struct Pair {
    pub a: Peer<Recorder>,
    pub b: Peer<Recorder>,
    pub a_events: Recorder,
    pub b_events: Recorder,
    a_to_b: Wire,
    b_to_a: Wire,
    pub now: u32,
}

impl Pair {
    pub fn new(config: SessionConfig) -> Self {
        Self::asymmetric(config.clone(), config)
    }

    pub fn asymmetric(config_a: SessionConfig, config_b: SessionConfig) -> Self {
        let a_to_b: Wire = Rc::new(RefCell::new(Vec::new()));
        let b_to_a: Wire = Rc::new(RefCell::new(Vec::new()));
        let a_events = Recorder::default();
        let b_events = Recorder::default();

        let a = Peer::connect(config_a, wire_output(&a_to_b), a_events.clone(), 0)
            .expect("connect");
        let b = Peer::accept(config_b, wire_output(&b_to_a), b_events.clone(), 0)
            .expect("accept");

        Self {
            a,
            b,
            a_events,
            b_events,
            a_to_b,
            b_to_a,
            now: 0,
        }
    }

    /// Advance time, deliver in-transit datagrams, tick both peers.
    pub fn step(&mut self, ms: u32) {
        self.step_with(ms, |_, datagrams| datagrams);
    }

    /// Like [`step`](Pair::step), but the closure can drop, duplicate, or
    /// reorder the datagrams in transit for each direction.
    pub fn step_with<F>(&mut self, ms: u32, mut shape: F)
    where
        F: FnMut(Dir, Vec<Vec<u8>>) -> Vec<Vec<u8>>,
    {
        self.now += ms;
        let to_b = shape(Dir::AToB, self.a_to_b.borrow_mut().drain(..).collect());
        let to_a = shape(Dir::BToA, self.b_to_a.borrow_mut().drain(..).collect());

        for datagram in to_a {
            self.a.raw_input(&datagram, self.now);
        }
        for datagram in to_b {
            self.b.raw_input(&datagram, self.now);
        }

        self.a.tick_incoming(self.now);
        self.b.tick_incoming(self.now);
        self.a.tick_outgoing(self.now);
        self.b.tick_outgoing(self.now);
    }

    pub fn run(&mut self, steps: usize, ms: u32) {
        for _ in 0..steps {
            self.step(ms);
        }
    }

    /// Drive the handshake to completion on both sides.
    pub fn establish(&mut self) {
        for _ in 0..10 {
            if self.a.is_authenticated() && self.b.is_authenticated() {
                return;
            }
            self.step(10);
        }
        panic!("handshake did not complete");
    }
}
