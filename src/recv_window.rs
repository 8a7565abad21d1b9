//! Receive window: out-of-order buffering, dedup, in-order reassembly.

use crate::common::{seq_before, try_get_buffer, SeqNum};
use crate::segment::Segment;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::warn;

/// Disposition of an incoming reliable data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New segment, buffered or promoted.
    Accepted,
    /// Already delivered or already buffered; dropped.
    Duplicate,
    /// Beyond the window; dropped without ack.
    OutOfWindow,
}

/// Buffers reliable segments until they can be delivered in sequence.
///
/// Segments enter `buf` keyed by sequence number; a contiguous run starting
/// at `rcv_nxt` is promoted to the deliverable queue, from which whole
/// messages are reassembled.
#[derive(Debug)]
pub struct RecvWindow {
    buf: VecDeque<Segment>,
    queue: VecDeque<Segment>,
    rcv_nxt: SeqNum,
    size: u32,
}

impl RecvWindow {
    pub fn new(size: u32) -> Self {
        Self {
            buf: VecDeque::new(),
            queue: VecDeque::new(),
            rcv_nxt: 0,
            size,
        }
    }

    /// Sequence number expected next.
    pub fn rcv_nxt(&self) -> SeqNum {
        self.rcv_nxt
    }

    /// Segments held out of order.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Segments promoted and awaiting reassembly.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Free window slots, advertised to the peer as the window hint.
    /// Saturates at the 16-bit range of the hint field.
    pub fn unused(&self) -> u16 {
        (self.size as usize)
            .saturating_sub(self.queue.len())
            .min(u16::MAX as usize) as u16
    }

    /// True when `sn` falls inside the current acceptance window and should
    /// therefore be acknowledged (covers duplicates below the cursor, whose
    /// earlier acks may have been lost).
    pub fn should_ack(&self, sn: SeqNum) -> bool {
        seq_before(sn, self.rcv_nxt.wrapping_add(self.size))
    }

    /// Insert an incoming reliable data segment.
    pub fn insert(&mut self, segment: Segment) -> InsertOutcome {
        let sn = segment.header.sn;

        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.size)) {
            return InsertOutcome::OutOfWindow;
        }
        if seq_before(sn, self.rcv_nxt) {
            return InsertOutcome::Duplicate;
        }

        // Splice in sequence order, scanning from the back since segments
        // usually arrive roughly in order.
        let mut insert_pos = self.buf.len();
        let mut repeat = false;
        for (i, held) in self.buf.iter().enumerate().rev() {
            if held.header.sn == sn {
                repeat = true;
                break;
            }
            if seq_before(sn, held.header.sn) {
                insert_pos = i;
            } else {
                break;
            }
        }

        if repeat {
            return InsertOutcome::Duplicate;
        }

        if insert_pos == self.buf.len() {
            self.buf.push_back(segment);
        } else {
            self.buf.insert(insert_pos, segment);
        }

        self.promote();
        InsertOutcome::Accepted
    }

    /// Pop the next fully reassembled message, if one is complete.
    pub fn next_message(&mut self) -> Option<Bytes> {
        loop {
            let head = self.queue.front()?;
            let count = head.header.frg_count as usize;

            if head.header.frg_index != 0 {
                // A message can only start at fragment 0; anything else is a
                // sender bug. Drop it so the stream can recover.
                warn!(
                    sn = head.header.sn,
                    frg_index = head.header.frg_index,
                    "dropping stray fragment at message boundary"
                );
                self.queue.pop_front();
                continue;
            }

            if self.queue.len() < count {
                return None;
            }

            let consistent = self
                .queue
                .iter()
                .take(count)
                .enumerate()
                .all(|(i, seg)| {
                    seg.header.frg_index as usize == i && seg.header.frg_count as usize == count
                });
            if !consistent {
                warn!(sn = head.header.sn, "dropping inconsistent fragment run");
                self.queue.pop_front();
                continue;
            }

            let total: usize = self
                .queue
                .iter()
                .take(count)
                .map(|seg| seg.payload.len())
                .sum();

            let mut data = try_get_buffer(total);
            for _ in 0..count {
                let segment = self.queue.pop_front().expect("fragment count verified");
                data.extend_from_slice(&segment.payload);
            }

            // Delivery freed queue slots, pull in whatever became contiguous.
            self.promote();
            return Some(data.freeze());
        }
    }

    /// Move the contiguous run at `rcv_nxt` into the deliverable queue.
    fn promote(&mut self) {
        while let Some(segment) = self.buf.front() {
            if segment.header.sn == self.rcv_nxt && self.queue.len() < self.size as usize {
                let segment = self.buf.pop_front().expect("front checked");
                self.queue.push_back(segment);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            } else {
                break;
            }
        }
    }
}
