//! ARQ protocol engine: windows, RTT estimation, retransmission, congestion.

use crate::common::{
    constants, seq_before, time_diff, try_get_buffer, try_put_buffer, ConvId, LinkStats, SeqNum,
    Timestamp,
};
use crate::config::SessionConfig;
use crate::error::{RelinkError, Result};
use crate::recv_window::RecvWindow;
use crate::segment::{Command, Segment};
use crate::send_window::{FlushParams, SendWindow};

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// RTT estimation state, Jacobson/Karels smoothing.
#[derive(Debug)]
struct RttState {
    srtt: u32,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
}

/// Congestion window state. Maintained always, applied only when congestion
/// control is enabled.
#[derive(Debug)]
struct CongestionState {
    cwnd: u32,
    ssthresh: u32,
    incr: u32,
}

/// The reliable-channel core: fragmentation, windowed flow control,
/// retransmission, and in-order reassembly.
///
/// The engine performs no I/O and never blocks. Encoded datagrams accumulate
/// in an internal staging queue; the driver collects them with
/// [`drain_output`](ArqEngine::drain_output) and every time-dependent entry
/// point takes an explicit `now` in milliseconds.
pub struct ArqEngine {
    conv: ConvId,
    config: SessionConfig,

    snd: SendWindow,
    rcv: RecvWindow,
    rtt: RttState,
    cong: CongestionState,

    /// Peer's advertised free receive window.
    rmt_wnd: u32,
    /// Acks owed to the peer, as (sn, echoed timestamp).
    ack_list: Vec<(SeqNum, Timestamp)>,
    /// Encoded datagrams awaiting pickup by the driver.
    output: VecDeque<Bytes>,

    stats: LinkStats,
    last_flush: Timestamp,
    flushed_once: bool,
}

impl ArqEngine {
    /// Create an engine for one conversation.
    pub fn new(conv: ConvId, config: SessionConfig) -> Self {
        let min_rto = if config.no_delay {
            constants::RTO_NDL
        } else {
            constants::RTO_MIN
        };
        let mss = config.mss();

        let mut stats = LinkStats::default();
        stats.snd_wnd = config.send_window;
        stats.rcv_wnd = config.recv_window;

        Self {
            conv,
            snd: SendWindow::new(),
            rcv: RecvWindow::new(config.recv_window),
            rtt: RttState {
                srtt: 0,
                rttvar: 0,
                rto: constants::RTO_DEF,
                min_rto,
            },
            cong: CongestionState {
                cwnd: 1,
                ssthresh: constants::THRESH_INIT,
                incr: mss,
            },
            rmt_wnd: constants::WND_RCV,
            ack_list: Vec::new(),
            output: VecDeque::new(),
            stats,
            last_flush: 0,
            flushed_once: false,
            config,
        }
    }

    /// Conversation id this engine serves.
    pub fn conv(&self) -> ConvId {
        self.conv
    }

    /// Rebind the conversation id. Used by the accepting side once the
    /// initiator's handshake reveals the id.
    pub fn set_conv(&mut self, conv: ConvId) {
        self.conv = conv;
    }

    /// Queue one reliable message, fragmenting it as needed.
    ///
    /// Messages never drop for lack of window space; they wait in the send
    /// queue until acknowledgments free room.
    pub fn send(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mss = self.config.mss() as usize;
        let count = data.len().div_ceil(mss);
        let max_fragments = (u8::MAX as u32).min(self.config.recv_window) as usize;
        if count > max_fragments {
            return Err(RelinkError::Oversized {
                size: data.len(),
                max: max_fragments * mss,
            });
        }

        let mut offset = 0;
        for i in 0..count {
            let size = mss.min(data.len() - offset);
            let fragment = data.slice(offset..offset + size);
            self.snd
                .push(Segment::data(self.conv, i as u8, count as u8, fragment));
            offset += size;
        }

        self.stats.bytes_sent += data.len() as u64;
        trace!(
            conv = self.conv,
            bytes = data.len(),
            fragments = count,
            "message queued"
        );
        Ok(())
    }

    /// Process the reliable segments of one incoming datagram.
    ///
    /// Acknowledgments release send-window entries and feed the RTT
    /// estimator; data segments enter the receive window and schedule acks;
    /// probes refresh the remote window hint.
    pub fn input<I>(&mut self, segments: I, now: Timestamp) -> Result<()>
    where
        I: IntoIterator<Item = Segment>,
    {
        let prev_una = self.snd.snd_una();
        let mut max_ack: Option<SeqNum> = None;

        for segment in segments {
            if segment.header.conv != self.conv {
                return Err(RelinkError::malformed(format!(
                    "conversation id mismatch: expected {}, got {}",
                    self.conv, segment.header.conv
                )));
            }

            self.rmt_wnd = segment.header.wnd as u32;

            // Probes carry no cumulative ack; only data and ack segments
            // move the send window.
            if matches!(segment.header.cmd, Command::Data | Command::Ack) {
                self.snd.una(segment.header.una);
                self.snd.shrink();
            }

            match segment.header.cmd {
                Command::Ack => {
                    let rtt = time_diff(now, segment.header.ts);
                    if rtt >= 0 {
                        self.update_rtt(rtt as u32);
                    }

                    let sn = segment.header.sn;
                    self.snd.ack(sn);
                    self.snd.shrink();

                    max_ack = Some(match max_ack {
                        Some(prev) if !seq_before(prev, sn) => prev,
                        _ => sn,
                    });
                }
                Command::Data => {
                    let sn = segment.header.sn;
                    if self.rcv.should_ack(sn) {
                        // Re-acked even when a duplicate: the earlier ack may
                        // have been lost.
                        self.ack_list.push((sn, segment.header.ts));
                        let outcome = self.rcv.insert(segment);
                        trace!(conv = self.conv, sn, ?outcome, "data segment");
                    } else {
                        trace!(conv = self.conv, sn, "data segment beyond window");
                    }
                }
                Command::Probe => {
                    trace!(conv = self.conv, wnd = segment.header.wnd, "probe");
                }
                Command::Handshake => {
                    // Handshakes are consumed by the session layer.
                    debug!(conv = self.conv, "handshake reached the engine, ignored");
                }
            }
        }

        if let Some(sn) = max_ack {
            self.snd.fast_ack(sn);
        }

        if time_diff(self.snd.snd_una(), prev_una) > 0 {
            self.grow_cwnd();
        }

        self.stats.packets_received += 1;
        Ok(())
    }

    /// Pop the next fully reassembled message, if any.
    pub fn recv(&mut self) -> Option<Bytes> {
        let message = self.rcv.next_message()?;
        self.stats.bytes_received += message.len() as u64;
        Some(message)
    }

    /// Flush at most once per configured interval.
    pub fn update(&mut self, now: Timestamp) -> Result<()> {
        if !self.flushed_once {
            self.flushed_once = true;
            self.last_flush = now;
            return self.flush(now);
        }

        if time_diff(now, self.last_flush) >= self.config.interval as i32 {
            self.last_flush = now;
            return self.flush(now);
        }

        Ok(())
    }

    /// Flush everything due: pending acks, newly admitted segments, and
    /// retransmissions, bounded by the active window limit.
    ///
    /// Returns [`RelinkError::DeadLink`] when a segment has exhausted its
    /// retransmit budget.
    pub fn flush(&mut self, now: Timestamp) -> Result<()> {
        self.flush_acks(now);

        let mut limit = self.config.send_window.min(self.rmt_wnd);
        if self.config.congestion_control {
            limit = limit.min(self.cong.cwnd);
        }

        let wnd_hint = self.rcv.unused();
        let una = self.rcv.rcv_nxt();
        self.snd
            .promote(self.conv, limit, now, self.rtt.rto, wnd_hint, una);

        let outcome = self.snd.flush_due(FlushParams {
            now,
            rto: self.rtt.rto,
            rtomin: if self.config.no_delay {
                0
            } else {
                self.rtt.rto / 8
            },
            fast_resend: if self.config.fast_resend > 0 {
                self.config.fast_resend
            } else {
                u32::MAX
            },
            no_delay: self.config.no_delay,
            interval: self.config.interval,
            max_retransmits: self.config.max_retransmits,
            wnd: wnd_hint,
            una,
        });

        for segment in &outcome.segments {
            self.stage(segment);
        }

        self.stats.retransmissions += outcome.retransmits as u64;
        self.stats.fast_retransmissions += outcome.fast_retransmits as u64;

        // Fast-resend is a light congestion event, timeout a full one.
        let mss = self.config.mss();
        if outcome.fast_resend_loss {
            let inflight = self.snd.inflight_span();
            self.cong.ssthresh = (inflight / 2).max(constants::THRESH_MIN);
            self.cong.cwnd = self.cong.ssthresh + self.config.fast_resend;
            self.cong.incr = self.cong.cwnd * mss;
        }
        if outcome.timeout_loss {
            self.cong.ssthresh = (self.cong.cwnd / 2).max(constants::THRESH_MIN);
            self.cong.cwnd = 1;
            self.cong.incr = mss;
        }
        if self.cong.cwnd < 1 {
            self.cong.cwnd = 1;
            self.cong.incr = mss;
        }

        self.refresh_stats();

        if outcome.dead_link {
            debug!(conv = self.conv, "segment exceeded retransmit budget");
            return Err(RelinkError::DeadLink);
        }

        Ok(())
    }

    /// Emit pending acks immediately, without touching data segments. Used
    /// by the no-delay mode right after raw input.
    pub fn flush_acks(&mut self, _now: Timestamp) {
        if self.ack_list.is_empty() {
            return;
        }

        let wnd = self.rcv.unused();
        let una = self.rcv.rcv_nxt();
        let acks: Vec<(SeqNum, Timestamp)> = self.ack_list.drain(..).collect();
        for (sn, ts) in acks {
            let mut segment = Segment::ack(self.conv, sn, ts);
            segment.header.wnd = wnd;
            segment.header.una = una;
            self.stage(&segment);
        }
    }

    /// Encoded datagrams staged since the last drain.
    pub fn drain_output(&mut self) -> std::collections::vec_deque::Drain<'_, Bytes> {
        self.output.drain(..)
    }

    /// True when staged datagrams are waiting for the driver.
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Free receive-window slots, for the window hint of session-level
    /// segments.
    pub fn unused_wnd(&self) -> u16 {
        self.rcv.unused()
    }

    /// Current link statistics.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Account an unreliable message sent outside the ARQ path.
    pub fn record_unreliable_sent(&mut self, len: usize) {
        self.stats.bytes_sent += len as u64;
        self.stats.packets_sent += 1;
    }

    /// Account an unreliable message accepted outside the ARQ path.
    pub fn record_unreliable_received(&mut self, len: usize) {
        self.stats.bytes_received += len as u64;
        self.stats.packets_received += 1;
    }

    fn stage(&mut self, segment: &Segment) {
        let mut buf = try_get_buffer(segment.size());
        segment.encode(&mut buf);
        self.output.push_back(buf.freeze());
        self.stats.packets_sent += 1;
    }

    fn update_rtt(&mut self, rtt: u32) {
        if self.rtt.srtt == 0 {
            self.rtt.srtt = rtt.max(1);
            self.rtt.rttvar = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.rtt.srtt);
            self.rtt.rttvar = (3 * self.rtt.rttvar + delta) / 4;
            self.rtt.srtt = ((7 * self.rtt.srtt + rtt) / 8).max(1);
        }

        let rto = self.rtt.srtt + self.config.interval.max(4 * self.rtt.rttvar);
        self.rtt.rto = rto.clamp(self.rtt.min_rto, constants::RTO_MAX);

        self.stats.rtt = self.rtt.srtt;
        self.stats.rtt_var = self.rtt.rttvar;
        self.stats.rto = self.rtt.rto;
    }

    /// Slow start below ssthresh, additive growth above it.
    fn grow_cwnd(&mut self) {
        if self.cong.cwnd >= self.rmt_wnd {
            return;
        }

        let mss = self.config.mss();
        if self.cong.cwnd < self.cong.ssthresh {
            self.cong.cwnd += 1;
            self.cong.incr += mss;
        } else {
            self.cong.incr = self.cong.incr.max(mss);
            self.cong.incr += (mss * mss) / self.cong.incr + (mss / 16);
            if (self.cong.cwnd + 1) * mss <= self.cong.incr {
                self.cong.cwnd = if mss > 0 {
                    self.cong.incr.div_ceil(mss)
                } else {
                    1
                };
            }
        }

        if self.cong.cwnd > self.rmt_wnd {
            self.cong.cwnd = self.rmt_wnd;
            self.cong.incr = self.rmt_wnd * mss;
        }
    }

    fn refresh_stats(&mut self) {
        self.stats.cwnd = self.cong.cwnd;
        self.stats.snd_buf_size = self.snd.in_flight() as u32;
        self.stats.rcv_buf_size = self.rcv.buffered() as u32;
    }
}

impl Drop for ArqEngine {
    fn drop(&mut self) {
        // Return staged buffers that were never drained.
        for bytes in self.output.drain(..) {
            if let Ok(buf) = bytes.try_into_mut() {
                try_put_buffer(buf);
            }
        }
    }
}
