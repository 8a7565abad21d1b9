//! Common types and utilities shared across the engine.

use bytes::BytesMut;
use std::sync::LazyLock;

/// Protocol constants.
pub mod constants {
    /// Minimum RTO in no-delay mode.
    pub const RTO_NDL: u32 = 30;
    /// Minimum RTO in normal mode.
    pub const RTO_MIN: u32 = 100;
    /// Initial RTO before any RTT sample exists.
    pub const RTO_DEF: u32 = 200;
    /// Upper bound on RTO growth.
    pub const RTO_MAX: u32 = 60_000;

    /// Default send window (segments).
    pub const WND_SND: u32 = 32;
    /// Default receive window (segments).
    pub const WND_RCV: u32 = 128;
    /// Default maximum transport unit.
    pub const MTU_DEF: u32 = 1400;
    /// Wire header overhead per segment.
    pub const OVERHEAD: u32 = 26;

    /// Default retransmit budget before a link is declared dead.
    pub const DEADLINK: u32 = 20;
    /// Initial slow start threshold.
    pub const THRESH_INIT: u32 = 2;
    /// Minimum slow start threshold.
    pub const THRESH_MIN: u32 = 2;
    /// Max transmissions of one segment via the fast-resend path.
    pub const FASTACK_LIMIT: u32 = 5;

    /// Default flush interval in milliseconds.
    pub const INTERVAL_DEF: u32 = 40;
    /// Liveness probe interval in milliseconds.
    pub const PROBE_INTERVAL: u32 = 1000;
    /// Handshake retransmit interval while connecting.
    pub const HANDSHAKE_INTERVAL: u32 = 1000;
    /// Default inactivity timeout in milliseconds.
    pub const TIMEOUT_DEF: u32 = 10_000;
}

/// Conversation ID type. 0 is reserved for "unassigned".
pub type ConvId = u32;

/// Sequence number type.
pub type SeqNum = u32;

/// Timestamp type (milliseconds, monotonic, caller-supplied).
pub type Timestamp = u32;

/// Generate a random conversation ID, avoiding the reserved value 0.
pub fn random_conv_id() -> ConvId {
    loop {
        let id = rand::random::<u32>();
        if id != 0 {
            return id;
        }
    }
}

/// Calculate time difference handling wrapping.
pub fn time_diff(later: Timestamp, earlier: Timestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Check if a sequence number is before another (handling wrapping).
pub fn seq_before(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Check if a sequence number is after another (handling wrapping).
pub fn seq_after(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) > 0
}

/// Statistics for one link.
#[derive(Debug, Default, Clone)]
pub struct LinkStats {
    /// Total application bytes sent.
    pub bytes_sent: u64,
    /// Total application bytes received.
    pub bytes_received: u64,
    /// Total datagrams handed to the raw-send callback.
    pub packets_sent: u64,
    /// Total datagrams accepted from raw input.
    pub packets_received: u64,
    /// Timeout-driven retransmissions.
    pub retransmissions: u64,
    /// Fast-resend retransmissions.
    pub fast_retransmissions: u64,
    /// Current smoothed RTT in milliseconds.
    pub rtt: u32,
    /// RTT variance.
    pub rtt_var: u32,
    /// Current RTO.
    pub rto: u32,
    /// Configured send window.
    pub snd_wnd: u32,
    /// Configured receive window.
    pub rcv_wnd: u32,
    /// Current congestion window.
    pub cwnd: u32,
    /// Segments currently in flight.
    pub snd_buf_size: u32,
    /// Segments buffered out of order on the receive side.
    pub rcv_buf_size: u32,
}

/// Lock-free buffer pool for encode/reassembly scratch buffers.
pub struct BufferPool {
    pool: crossbeam_queue::ArrayQueue<BytesMut>,
    buffer_size: usize,
    hits: std::sync::atomic::AtomicUsize,
}

impl BufferPool {
    /// Create a new buffer pool.
    pub fn new(max_size: usize, buffer_size: usize) -> Self {
        Self {
            pool: crossbeam_queue::ArrayQueue::new(max_size),
            buffer_size,
            hits: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Get a buffer from the pool, falling back to a fresh allocation.
    pub fn try_get(&self) -> BytesMut {
        match self.pool.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                buf
            }
            None => BytesMut::with_capacity(self.buffer_size),
        }
    }

    /// Return a buffer to the pool.
    pub fn try_put(&self, mut buf: BytesMut) {
        // Only keep buffers close to the pool's class size.
        if buf.capacity() >= self.buffer_size / 2 && buf.capacity() <= self.buffer_size * 2 {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }

    /// Pool statistics as (hits, current size).
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(std::sync::atomic::Ordering::Relaxed),
            self.pool.len(),
        )
    }
}

static SEGMENT_BUFFER_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(2000, 1400));
static MESSAGE_BUFFER_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(500, 16384));

/// Get a scratch buffer sized for `size_hint` bytes.
pub fn try_get_buffer(size_hint: usize) -> BytesMut {
    if size_hint <= 1400 {
        SEGMENT_BUFFER_POOL.try_get()
    } else {
        MESSAGE_BUFFER_POOL.try_get()
    }
}

/// Return a scratch buffer to the pool.
pub fn try_put_buffer(buf: BytesMut) {
    if buf.capacity() <= 2800 {
        SEGMENT_BUFFER_POOL.try_put(buf);
    } else {
        MESSAGE_BUFFER_POOL.try_put(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_id_never_zero() {
        for _ in 0..64 {
            assert_ne!(random_conv_id(), 0);
        }
    }

    #[test]
    fn seq_comparison_wraps() {
        assert!(seq_before(u32::MAX, 0));
        assert!(seq_after(0, u32::MAX));
        assert!(!seq_before(5, 5));
        assert!(!seq_after(5, 5));
    }

    #[test]
    fn time_diff_wraps() {
        assert_eq!(time_diff(10, 4), 6);
        assert!(time_diff(1, u32::MAX) > 0);
    }

    #[test]
    fn buffer_pool_reuse() {
        let pool = BufferPool::new(4, 1024);
        let buf = pool.try_get();
        pool.try_put(buf);
        let _ = pool.try_get();
        assert_eq!(pool.stats().0, 1);
    }
}
