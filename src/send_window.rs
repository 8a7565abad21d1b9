//! Send window: in-flight reliable segments, retransmit deadlines, counts.

use crate::common::{constants, seq_before, time_diff, ConvId, SeqNum, Timestamp};
use crate::segment::Segment;
use std::collections::VecDeque;
use tracing::trace;

/// One reliable segment awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub segment: Segment,
    /// Current RTO of this entry, grows on repeated timeout.
    pub rto: u32,
    /// Deadline of the next timeout retransmission.
    pub resend_at: Timestamp,
    /// Times this entry was skipped by a later acknowledgment.
    pub fastack: u32,
    /// Transmissions so far.
    pub xmit: u32,
}

/// Inputs of one flush pass over the in-flight buffer.
#[derive(Debug, Clone, Copy)]
pub struct FlushParams {
    pub now: Timestamp,
    /// Engine's current RTO estimate, seeds first transmissions.
    pub rto: u32,
    /// Extra slack added to the first deadline (0 in no-delay mode).
    pub rtomin: u32,
    /// Fast-resend skip threshold, `u32::MAX` when disabled.
    pub fast_resend: u32,
    pub no_delay: bool,
    pub interval: u32,
    pub max_retransmits: u32,
    /// Window hint stamped on outgoing segments.
    pub wnd: u16,
    /// Cumulative ack stamped on outgoing segments.
    pub una: SeqNum,
}

/// Result of one flush pass.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// Segments due for (re)transmission, headers already stamped.
    pub segments: Vec<Segment>,
    /// At least one entry hit its RTO deadline.
    pub timeout_loss: bool,
    /// At least one entry crossed the fast-resend threshold.
    pub fast_resend_loss: bool,
    /// An entry exhausted the retransmit budget.
    pub dead_link: bool,
    pub retransmits: u32,
    pub fast_retransmits: u32,
}

/// Tracks reliable segments from enqueue to acknowledgment.
///
/// Segments wait in a pending queue until window space admits them into the
/// in-flight buffer, where each entry carries its own retransmission state.
#[derive(Debug, Default)]
pub struct SendWindow {
    queue: VecDeque<Segment>,
    flight: VecDeque<SendEntry>,
    snd_una: SeqNum,
    snd_nxt: SeqNum,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a segment for transmission once window space allows.
    pub fn push(&mut self, segment: Segment) {
        self.queue.push_back(segment);
    }

    /// Segments waiting for window space.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Segments in flight, unacknowledged.
    pub fn in_flight(&self) -> usize {
        self.flight.len()
    }

    /// Lowest unacknowledged sequence number.
    pub fn snd_una(&self) -> SeqNum {
        self.snd_una
    }

    /// Next sequence number to assign.
    pub fn snd_nxt(&self) -> SeqNum {
        self.snd_nxt
    }

    /// Unacknowledged span, `snd_nxt - snd_una`.
    pub fn inflight_span(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// Move pending segments into flight while occupancy stays below `limit`.
    ///
    /// Each promoted segment is assigned the next sequence number and stamped
    /// with the current conversation, window hint, and cumulative ack.
    pub fn promote(
        &mut self,
        conv: ConvId,
        limit: u32,
        now: Timestamp,
        rto: u32,
        wnd: u16,
        una: SeqNum,
    ) {
        while time_diff(self.snd_nxt, self.snd_una.wrapping_add(limit)) < 0 {
            let Some(mut segment) = self.queue.pop_front() else {
                break;
            };

            segment.header.conv = conv;
            segment.header.wnd = wnd;
            segment.header.ts = now;
            segment.header.sn = self.snd_nxt;
            segment.header.una = una;

            self.flight.push_back(SendEntry {
                segment,
                rto,
                resend_at: now,
                fastack: 0,
                xmit: 0,
            });
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
        }
    }

    /// Release the entry acknowledged by an exact-sequence ack.
    pub fn ack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }
        self.flight.retain(|entry| entry.segment.header.sn != sn);
    }

    /// Release every entry before the cumulative ack `una`.
    pub fn una(&mut self, una: SeqNum) {
        while let Some(entry) = self.flight.front() {
            if seq_before(entry.segment.header.sn, una) {
                self.flight.pop_front();
            } else {
                break;
            }
        }
    }

    /// Recompute `snd_una` after releases.
    pub fn shrink(&mut self) {
        self.snd_una = match self.flight.front() {
            Some(entry) => entry.segment.header.sn,
            None => self.snd_nxt,
        };
    }

    /// Bump skip counters of entries before `sn`; they were passed over by a
    /// later acknowledgment.
    pub fn fast_ack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        for entry in &mut self.flight {
            if seq_before(entry.segment.header.sn, sn) {
                entry.fastack += 1;
            } else {
                break;
            }
        }
    }

    /// Collect every segment due for transmission: first sends, timeout
    /// retransmissions, and fast-resends past the skip threshold.
    pub fn flush_due(&mut self, params: FlushParams) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        for entry in &mut self.flight {
            let mut needsend = false;

            if entry.xmit == 0 {
                // First transmission.
                needsend = true;
                entry.xmit = 1;
                entry.rto = params.rto;
                entry.resend_at = params.now.wrapping_add(entry.rto + params.rtomin);
            } else if time_diff(params.now, entry.resend_at) >= 0 {
                // Timeout retransmission with exponential RTO growth.
                needsend = true;
                entry.xmit += 1;
                if params.no_delay {
                    entry.rto += entry.rto / 2;
                } else {
                    entry.rto += entry.rto.max(params.interval);
                }
                entry.rto = entry.rto.min(constants::RTO_MAX);
                entry.resend_at = params.now.wrapping_add(entry.rto);
                outcome.timeout_loss = true;
                outcome.retransmits += 1;
                trace!(
                    sn = entry.segment.header.sn,
                    xmit = entry.xmit,
                    rto = entry.rto,
                    "timeout retransmission"
                );
            } else if entry.fastack >= params.fast_resend
                && entry.xmit <= constants::FASTACK_LIMIT
            {
                // Fast-resend: skipped often enough, do not wait for the RTO.
                needsend = true;
                entry.xmit += 1;
                entry.fastack = 0;
                entry.resend_at = params.now.wrapping_add(entry.rto);
                outcome.fast_resend_loss = true;
                outcome.fast_retransmits += 1;
                trace!(sn = entry.segment.header.sn, "fast resend");
            }

            if needsend {
                entry.segment.header.ts = params.now;
                entry.segment.header.wnd = params.wnd;
                entry.segment.header.una = params.una;
                outcome.segments.push(entry.segment.clone());

                if entry.xmit >= params.max_retransmits {
                    outcome.dead_link = true;
                }
            }
        }

        outcome
    }
}
