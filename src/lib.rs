//! # relink — tick-driven reliable transport over unreliable datagrams
//!
//! A reliable-transport engine layered over a raw datagram channel: ordered,
//! retransmitted delivery of application messages on one channel, plus an
//! unordered fire-and-forget channel, multiplexed over a single conversation.
//!
//! ## Features
//!
//! - **ARQ core**: windowed flow control, RTT-derived retransmission
//!   timeouts, fast-resend on duplicate acks, optional congestion control
//! - **Fragmentation**: messages larger than the path MTU split and
//!   reassemble byte-identical
//! - **Tick-driven**: no threads, no blocking, no internal clock — the
//!   caller feeds raw datagrams and drives two tick entry points
//! - **Zero-copy**: `bytes`-based payload handling and pooled scratch buffers
//! - **Observability**: structured `tracing` events and process-wide metrics
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relink::{Callbacks, Channel, ErrorKind, Peer, SessionConfig};
//! use bytes::Bytes;
//!
//! struct App;
//!
//! impl Callbacks for App {
//!     fn on_authenticated(&mut self) { println!("connected"); }
//!     fn on_data(&mut self, data: Bytes, channel: Channel) {
//!         println!("{} bytes on {channel:?}", data.len());
//!     }
//!     fn on_disconnected(&mut self) { println!("closed"); }
//!     fn on_error(&mut self, kind: ErrorKind, reason: &str) {
//!         eprintln!("{kind}: {reason}");
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // The caller owns the socket; relink only sees bytes.
//!     let output: relink::OutputFn = Box::new(|_datagram| Ok(()));
//!     let mut peer = Peer::connect(SessionConfig::new().fast_mode(), output, App, 0)?;
//!
//!     // Once per cycle, with a monotonic millisecond clock:
//!     let now = 16;
//!     // peer.raw_input(&incoming_datagram, now);
//!     peer.tick_incoming(now);
//!     peer.tick_outgoing(now);
//!     # let _ = &mut peer;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐
//! │  Peer                 │  handshake, channels, ticks, callbacks
//! ├───────────────────────┤
//! │  ArqEngine            │  windows, RTT, retransmission, congestion
//! ├───────────────────────┤
//! │  Send/Recv windows    │  in-flight tracking, reordering, reassembly
//! ├───────────────────────┤
//! │  Segment codec        │  fixed header + payload, pure
//! └───────────────────────┘
//! ```

pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod peer;
pub mod recv_window;
pub mod segment;
pub mod send_window;

pub use config::SessionConfig;
pub use engine::ArqEngine;
pub use error::{ErrorKind, RelinkError, Result};
pub use peer::{Callbacks, OutputFn, Peer, PeerState};
pub use segment::{Channel, Command, Header, Segment};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;
