//! Session configuration.

use crate::common::constants;
use crate::error::{RelinkError, Result};

/// Configuration for one session, immutable once the session is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Aggressive ack/retransmit timing: acks flush immediately after raw
    /// input and RTO growth is halved.
    pub no_delay: bool,
    /// Flush interval hint in milliseconds.
    pub interval: u32,
    /// Duplicate-ack threshold that triggers fast-resend. 0 disables.
    pub fast_resend: u32,
    /// Bound the send window by a dynamic congestion window.
    pub congestion_control: bool,
    /// Send window size in segments.
    pub send_window: u32,
    /// Receive window size in segments.
    pub recv_window: u32,
    /// Inactivity timeout in milliseconds.
    pub timeout: u32,
    /// Maximum transmissions of one segment before the link is declared dead.
    pub max_retransmits: u32,
    /// Maximum transport unit; bounds the segment payload size.
    pub mtu: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            no_delay: false,
            interval: constants::INTERVAL_DEF,
            fast_resend: 0,
            congestion_control: true,
            send_window: constants::WND_SND,
            recv_window: constants::WND_RCV,
            timeout: constants::TIMEOUT_DEF,
            max_retransmits: constants::DEADLINK,
            mtu: constants::MTU_DEF,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normal mode - balanced latency and throughput.
    pub fn normal_mode(mut self) -> Self {
        self.no_delay = false;
        self.interval = 40;
        self.fast_resend = 0;
        self.congestion_control = true;
        self
    }

    /// Fast mode - optimized for low latency.
    pub fn fast_mode(mut self) -> Self {
        self.no_delay = true;
        self.interval = 10;
        self.fast_resend = 2;
        self.congestion_control = true;
        self
    }

    /// Turbo mode - minimum latency, congestion control off.
    pub fn turbo_mode(mut self) -> Self {
        self.no_delay = true;
        self.interval = 5;
        self.fast_resend = 1;
        self.congestion_control = false;
        self
    }

    /// Set the flush interval hint.
    pub fn interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Set the fast-resend threshold. 0 disables fast-resend.
    pub fn fast_resend(mut self, threshold: u32) -> Self {
        self.fast_resend = threshold;
        self
    }

    /// Enable or disable congestion control.
    pub fn congestion_control(mut self, enabled: bool) -> Self {
        self.congestion_control = enabled;
        self
    }

    /// Set both window sizes.
    pub fn window_size(mut self, send_window: u32, recv_window: u32) -> Self {
        self.send_window = send_window;
        self.recv_window = recv_window;
        self
    }

    /// Set the inactivity timeout in milliseconds.
    pub fn timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retransmit budget.
    pub fn max_retransmits(mut self, max: u32) -> Self {
        self.max_retransmits = max;
        self
    }

    /// Set the maximum transport unit.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Maximum segment payload derived from the MTU.
    pub fn mss(&self) -> u32 {
        self.mtu - constants::OVERHEAD
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mtu <= constants::OVERHEAD || self.mtu > 65535 {
            return Err(RelinkError::config(format!(
                "MTU must be between {} and 65535",
                constants::OVERHEAD + 1
            )));
        }

        if self.send_window == 0 || self.recv_window == 0 {
            return Err(RelinkError::config("window sizes must be greater than 0"));
        }

        // The window hint on the wire is 16 bits.
        if self.recv_window > u16::MAX as u32 {
            return Err(RelinkError::config(
                "receive window must not exceed 65535 segments",
            ));
        }

        if self.interval == 0 {
            return Err(RelinkError::config("interval must be greater than 0"));
        }

        if self.timeout == 0 {
            return Err(RelinkError::config("timeout must be greater than 0"));
        }

        if self.max_retransmits == 0 {
            return Err(RelinkError::config(
                "max retransmits must be greater than 0",
            ));
        }

        Ok(())
    }
}
