//! Session layer: handshake state machine, channel multiplexing, tick
//! entry points, and lifecycle callbacks.
//!
//! A [`Peer`] owns no socket and never blocks. The caller feeds arriving
//! datagrams through [`raw_input`](Peer::raw_input) and drives
//! [`tick_incoming`](Peer::tick_incoming) then
//! [`tick_outgoing`](Peer::tick_outgoing) once per cycle, passing its own
//! monotonic millisecond clock.

use crate::common::{
    constants, random_conv_id, time_diff, try_get_buffer, try_put_buffer, ConvId, LinkStats,
    Timestamp,
};
use crate::config::SessionConfig;
use crate::engine::ArqEngine;
use crate::error::{ErrorKind, RelinkError, Result};
use crate::metrics;
use crate::segment::{Channel, Command, Segment};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

/// Raw-send callback: hands one encoded datagram to the unreliable transport.
pub type OutputFn = Box<dyn FnMut(&[u8]) -> std::io::Result<()>>;

/// Lifecycle and data callbacks implemented by the caller.
pub trait Callbacks {
    /// Handshake completed. Fires exactly once.
    fn on_authenticated(&mut self);
    /// One reassembled reliable message or one accepted unreliable message.
    fn on_data(&mut self, data: Bytes, channel: Channel);
    /// Session torn down. Fires exactly once, terminal.
    fn on_disconnected(&mut self);
    /// Non-fatal and fatal conditions alike are reported here before any
    /// state transition they trigger.
    fn on_error(&mut self, kind: ErrorKind, reason: &str);
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Handshake in progress.
    Connecting,
    /// Handshake complete, data flows.
    Authenticated,
    /// Terminal. A new session requires a new peer instance.
    Closed,
}

/// One end of a session over an unreliable datagram transport.
pub struct Peer<C: Callbacks> {
    conv: ConvId,
    state: PeerState,
    config: SessionConfig,
    engine: ArqEngine,
    output: OutputFn,
    callbacks: C,
    initiator: bool,

    last_recv: Timestamp,
    last_probe: Timestamp,
    last_handshake: Timestamp,
}

impl<C: Callbacks> Peer<C> {
    /// Create the initiating side of a session and send the handshake
    /// immediately, without waiting for a tick.
    pub fn connect(
        config: SessionConfig,
        output: OutputFn,
        callbacks: C,
        now: Timestamp,
    ) -> Result<Self> {
        let conv = random_conv_id();
        let mut peer = Self::build(conv, true, config, output, callbacks, now)?;
        info!(conv = peer.conv, "connecting");
        peer.send_handshake(now);
        Ok(peer)
    }

    /// Create the accepting side of a session. The conversation id is
    /// adopted from the initiator's first handshake.
    pub fn accept(
        config: SessionConfig,
        output: OutputFn,
        callbacks: C,
        now: Timestamp,
    ) -> Result<Self> {
        let peer = Self::build(0, false, config, output, callbacks, now)?;
        info!("awaiting handshake");
        Ok(peer)
    }

    fn build(
        conv: ConvId,
        initiator: bool,
        config: SessionConfig,
        output: OutputFn,
        callbacks: C,
        now: Timestamp,
    ) -> Result<Self> {
        config.validate()?;
        metrics::global_metrics().session_created();

        Ok(Self {
            conv,
            state: PeerState::Connecting,
            engine: ArqEngine::new(conv, config.clone()),
            config,
            output,
            callbacks,
            initiator,
            last_recv: now,
            last_probe: now,
            last_handshake: now,
        })
    }

    /// Conversation id (0 on an accepting peer before the handshake).
    pub fn conv(&self) -> ConvId {
        self.conv
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// True once the handshake completed and the session is open.
    pub fn is_authenticated(&self) -> bool {
        self.state == PeerState::Authenticated
    }

    /// Link statistics of the underlying engine.
    pub fn stats(&self) -> &LinkStats {
        self.engine.stats()
    }

    /// Queue one message on the given channel.
    ///
    /// Reliable messages are fragmented and retransmitted by the engine;
    /// unreliable messages are wrapped and handed to the transport at once.
    /// Rejected (with a warning, no teardown) unless authenticated.
    pub fn send(&mut self, data: Bytes, channel: Channel) -> Result<()> {
        if self.state != PeerState::Authenticated {
            warn!(conv = self.conv, state = ?self.state, "send rejected");
            return Err(RelinkError::session("session is not open"));
        }

        match channel {
            Channel::Reliable => {
                if let Err(err) = self.engine.send(data) {
                    let reason = err.to_string();
                    self.callbacks.on_error(ErrorKind::OversizedMessage, &reason);
                    return Err(err);
                }
                Ok(())
            }
            Channel::Unreliable => {
                let max = self.config.mss() as usize;
                if data.len() > max {
                    let err = RelinkError::Oversized {
                        size: data.len(),
                        max,
                    };
                    let reason = err.to_string();
                    self.callbacks.on_error(ErrorKind::OversizedMessage, &reason);
                    return Err(err);
                }

                let len = data.len();
                let mut segment = Segment::unreliable(self.conv, data);
                segment.header.wnd = self.engine.unused_wnd();
                if self.send_segment(&segment) {
                    self.engine.record_unreliable_sent(len);
                }
                Ok(())
            }
        }
    }

    /// Feed one arriving datagram. Parsing and state updates happen
    /// synchronously; nothing is deferred to the next tick.
    pub fn raw_input(&mut self, data: &[u8], now: Timestamp) {
        if self.state == PeerState::Closed {
            return;
        }

        let mut buf = Bytes::copy_from_slice(data);
        let mut reliable: Vec<Segment> = Vec::new();
        let mut any_valid = false;

        while !buf.is_empty() {
            let Some(segment) = Segment::decode(&mut buf) else {
                self.callbacks
                    .on_error(ErrorKind::MalformedSegment, "datagram failed to decode");
                break;
            };

            if segment.header.cmd == Command::Handshake {
                if self.handle_handshake(&segment, now) {
                    any_valid = true;
                }
                continue;
            }

            if self.conv == 0 || segment.header.conv != self.conv {
                let reason = format!(
                    "conversation id mismatch: expected {}, got {}",
                    self.conv, segment.header.conv
                );
                self.callbacks
                    .on_error(ErrorKind::MalformedSegment, &reason);
                break;
            }

            if self.state != PeerState::Authenticated {
                trace!(conv = self.conv, cmd = segment.header.cmd_str(), "dropped before handshake");
                continue;
            }

            match segment.header.channel {
                Channel::Unreliable => {
                    self.engine.record_unreliable_received(segment.payload.len());
                    self.callbacks.on_data(segment.payload, Channel::Unreliable);
                    any_valid = true;
                }
                Channel::Reliable => {
                    reliable.push(segment);
                    any_valid = true;
                }
            }
        }

        if !reliable.is_empty() {
            if let Err(err) = self.engine.input(reliable, now) {
                let reason = err.to_string();
                self.callbacks
                    .on_error(ErrorKind::MalformedSegment, &reason);
            }
        }

        if any_valid {
            self.last_recv = now;
        }

        self.deliver_ready();

        // Low-latency mode pushes acks out right away instead of waiting
        // for the next outgoing tick.
        if self.config.no_delay {
            self.engine.flush_acks(now);
            self.pump_output();
        }
    }

    /// Incoming tick: inactivity timeout, liveness probes, and delivery of
    /// anything that became ready. Invoke before the outgoing tick.
    pub fn tick_incoming(&mut self, now: Timestamp) {
        if self.state == PeerState::Closed {
            return;
        }

        self.deliver_ready();

        if time_diff(now, self.last_recv) >= self.config.timeout as i32 {
            let err = RelinkError::Timeout {
                timeout_ms: self.config.timeout,
            };
            self.callbacks.on_error(ErrorKind::Timeout, &err.to_string());
            self.close();
            return;
        }

        if self.state == PeerState::Authenticated
            && time_diff(now, self.last_probe) >= constants::PROBE_INTERVAL as i32
        {
            self.last_probe = now;
            let probe = Segment::probe(self.conv, self.engine.unused_wnd(), now);
            self.send_segment(&probe);
        }
    }

    /// Outgoing tick: flush due segments, retransmissions, and pending acks
    /// to the raw-send callback.
    pub fn tick_outgoing(&mut self, now: Timestamp) {
        match self.state {
            PeerState::Closed => {}
            PeerState::Connecting => {
                // The handshake is not covered by the ARQ engine, resend it
                // on a fixed cadence until answered or timed out.
                if self.initiator
                    && time_diff(now, self.last_handshake) >= constants::HANDSHAKE_INTERVAL as i32
                {
                    self.send_handshake(now);
                }
            }
            PeerState::Authenticated => {
                if let Err(err) = self.engine.update(now) {
                    let kind = match err {
                        RelinkError::DeadLink => ErrorKind::DeadLink,
                        _ => ErrorKind::MalformedSegment,
                    };
                    self.callbacks.on_error(kind, &err.to_string());
                    if err.is_fatal() {
                        self.close();
                        return;
                    }
                }
                self.pump_output();
                metrics::global_metrics().update_from_stats(self.engine.stats());
            }
        }
    }

    /// Tear the session down. Idempotent; `on_disconnected` fires once.
    pub fn disconnect(&mut self) {
        self.close();
    }

    /// Handle a handshake segment. Returns true when it was valid.
    fn handle_handshake(&mut self, segment: &Segment, now: Timestamp) -> bool {
        match self.state {
            PeerState::Connecting => {
                if self.initiator {
                    if segment.header.conv != self.conv {
                        let reason = format!(
                            "handshake conversation mismatch: expected {}, got {}",
                            self.conv, segment.header.conv
                        );
                        self.callbacks
                            .on_error(ErrorKind::MalformedSegment, &reason);
                        return false;
                    }
                    self.authenticate(now);
                } else {
                    if segment.header.conv == 0 {
                        self.callbacks
                            .on_error(ErrorKind::MalformedSegment, "handshake with conversation 0");
                        return false;
                    }
                    // Adopt the initiator's conversation and answer so it
                    // can authenticate too.
                    self.conv = segment.header.conv;
                    self.engine.set_conv(self.conv);
                    self.send_handshake(now);
                    self.authenticate(now);
                }
                true
            }
            PeerState::Authenticated => {
                if segment.header.conv != self.conv {
                    return false;
                }
                trace!(conv = self.conv, "duplicate handshake");
                // The initiator keeps handshaking until our answer gets
                // through; repeat it, but never re-fire the callback.
                if !self.initiator {
                    self.send_handshake(now);
                }
                true
            }
            PeerState::Closed => false,
        }
    }

    fn authenticate(&mut self, now: Timestamp) {
        debug_assert_eq!(self.state, PeerState::Connecting);
        self.state = PeerState::Authenticated;
        self.last_recv = now;
        self.last_probe = now;
        info!(conv = self.conv, "authenticated");
        self.callbacks.on_authenticated();
    }

    fn send_handshake(&mut self, now: Timestamp) {
        self.last_handshake = now;
        let segment = Segment::handshake(self.conv, now);
        self.send_segment(&segment);
    }

    /// Encode and hand one segment to the transport. Returns false when the
    /// transport failed (the session is then closed).
    fn send_segment(&mut self, segment: &Segment) -> bool {
        let mut buf = try_get_buffer(segment.size());
        segment.encode(&mut buf);
        match (self.output)(&buf) {
            Ok(()) => {
                try_put_buffer(buf);
                true
            }
            Err(err) => {
                self.transport_failed(&RelinkError::Transport(err).to_string());
                false
            }
        }
    }

    /// Hand every staged engine datagram to the transport.
    fn pump_output(&mut self) {
        let packets: Vec<Bytes> = self.engine.drain_output().collect();
        for packet in packets {
            if let Err(err) = (self.output)(&packet) {
                self.transport_failed(&RelinkError::Transport(err).to_string());
                return;
            }
            if let Ok(buf) = packet.try_into_mut() {
                try_put_buffer(buf);
            }
        }
    }

    fn deliver_ready(&mut self) {
        while let Some(message) = self.engine.recv() {
            self.callbacks.on_data(message, Channel::Reliable);
        }
    }

    /// A raw-send failure means the other end is gone or the socket died;
    /// either way the session cannot continue.
    fn transport_failed(&mut self, reason: &str) {
        debug!(conv = self.conv, reason, "transport failure");
        self.callbacks
            .on_error(ErrorKind::TransportFailure, reason);
        self.close();
    }

    /// The single teardown path for every disconnect cause.
    fn close(&mut self) {
        if self.state == PeerState::Closed {
            return;
        }
        self.state = PeerState::Closed;
        metrics::global_metrics().session_closed();
        info!(conv = self.conv, "disconnected");
        self.callbacks.on_disconnected();
    }
}
