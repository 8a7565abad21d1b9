//! Wire segment codec: fixed header plus payload, pure and stateless.

use crate::common::{ConvId, SeqNum, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Command code of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Application payload (reliable or unreliable, per channel tag).
    Data = 81,
    /// Acknowledgment for one reliable segment, with cumulative `una`.
    Ack = 82,
    /// Connection establishment. Carries no fragment or window fields.
    Handshake = 83,
    /// Liveness probe. Also refreshes the sender's window hint.
    Probe = 84,
}

impl Command {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            81 => Some(Command::Data),
            82 => Some(Command::Ack),
            83 => Some(Command::Handshake),
            84 => Some(Command::Probe),
            _ => None,
        }
    }
}

/// Delivery channel of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// Ordered, retransmitted, exactly-once delivery through the ARQ engine.
    Reliable = 1,
    /// Fire-and-forget, bypasses windows and retransmission.
    Unreliable = 2,
}

impl Channel {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Channel::Reliable),
            2 => Some(Channel::Unreliable),
            _ => None,
        }
    }
}

/// Fixed-size segment header preceding the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub conv: ConvId,
    pub cmd: Command,
    pub channel: Channel,
    /// Fragment index within the message, `< frg_count`.
    pub frg_index: u8,
    /// Total fragment count of the message, >= 1 for data.
    pub frg_count: u8,
    /// Free receive-window hint of the sender.
    pub wnd: u16,
    /// Send timestamp in milliseconds, echoed back in acks.
    pub ts: Timestamp,
    pub sn: SeqNum,
    /// Highest contiguous sequence number fully received (cumulative ack).
    pub una: SeqNum,
    /// Payload length in bytes.
    pub len: u32,
}

impl Header {
    /// Size of the header in bytes.
    pub const SIZE: usize = 26;

    /// Create a new header with zeroed sequence fields.
    pub fn new(conv: ConvId, cmd: Command, channel: Channel) -> Self {
        Self {
            conv,
            cmd,
            channel,
            frg_index: 0,
            frg_count: if cmd == Command::Data { 1 } else { 0 },
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            len: 0,
        }
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.channel as u8);
        buf.put_u8(self.frg_index);
        buf.put_u8(self.frg_count);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode a header from `buf`, consuming [`Header::SIZE`] bytes.
    ///
    /// Returns `None` on short input, unknown command/channel codes, or a
    /// data header whose fragment fields are inconsistent.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let conv = buf.get_u32_le();
        let cmd = Command::from_u8(buf.get_u8())?;
        let channel = Channel::from_u8(buf.get_u8())?;
        let frg_index = buf.get_u8();
        let frg_count = buf.get_u8();
        let wnd = buf.get_u16_le();
        let ts = buf.get_u32_le();
        let sn = buf.get_u32_le();
        let una = buf.get_u32_le();
        let len = buf.get_u32_le();

        if cmd == Command::Data && (frg_count == 0 || frg_index >= frg_count) {
            return None;
        }

        Some(Self {
            conv,
            cmd,
            channel,
            frg_index,
            frg_count,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }

    /// Command name for log output.
    pub fn cmd_str(&self) -> &'static str {
        match self.cmd {
            Command::Data => "DATA",
            Command::Ack => "ACK",
            Command::Handshake => "HANDSHAKE",
            Command::Probe => "PROBE",
        }
    }
}

/// A segment: header plus payload, the atomic unit on the wire.
#[derive(Debug, Clone)]
pub struct Segment {
    pub header: Header,
    pub payload: Bytes,
}

impl Segment {
    /// Create a segment of the given command and channel.
    pub fn new(conv: ConvId, cmd: Command, channel: Channel, payload: Bytes) -> Self {
        let mut header = Header::new(conv, cmd, channel);
        header.len = payload.len() as u32;
        Self { header, payload }
    }

    /// Create a reliable data segment carrying one fragment.
    pub fn data(conv: ConvId, frg_index: u8, frg_count: u8, payload: Bytes) -> Self {
        let mut seg = Self::new(conv, Command::Data, Channel::Reliable, payload);
        seg.header.frg_index = frg_index;
        seg.header.frg_count = frg_count;
        seg
    }

    /// Create an unreliable data segment.
    pub fn unreliable(conv: ConvId, payload: Bytes) -> Self {
        Self::new(conv, Command::Data, Channel::Unreliable, payload)
    }

    /// Create an ack segment for `sn`, echoing the data segment's timestamp.
    pub fn ack(conv: ConvId, sn: SeqNum, ts: Timestamp) -> Self {
        let mut seg = Self::new(conv, Command::Ack, Channel::Reliable, Bytes::new());
        seg.header.sn = sn;
        seg.header.ts = ts;
        seg
    }

    /// Create a handshake segment.
    pub fn handshake(conv: ConvId, ts: Timestamp) -> Self {
        let mut seg = Self::new(conv, Command::Handshake, Channel::Reliable, Bytes::new());
        seg.header.ts = ts;
        seg
    }

    /// Create a liveness probe carrying the sender's window hint.
    pub fn probe(conv: ConvId, wnd: u16, ts: Timestamp) -> Self {
        let mut seg = Self::new(conv, Command::Probe, Channel::Reliable, Bytes::new());
        seg.header.wnd = wnd;
        seg.header.ts = ts;
        seg
    }

    /// Encode the segment into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.payload);
    }

    /// Decode one segment from the front of `buf`, consuming it.
    ///
    /// Returns `None` if the header is malformed or the payload is truncated;
    /// `buf` is left in an unspecified position in that case.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        let header = Header::decode(buf)?;
        if buf.len() < header.len as usize {
            return None;
        }
        let payload = buf.split_to(header.len as usize);
        Some(Self { header, payload })
    }

    /// Total encoded size of the segment.
    pub fn size(&self) -> usize {
        Header::SIZE + self.payload.len()
    }

    /// Check if this is a data segment.
    pub fn is_data(&self) -> bool {
        self.header.cmd == Command::Data
    }

    /// Check if this is an ack segment.
    pub fn is_ack(&self) -> bool {
        self.header.cmd == Command::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut header = Header::new(7, Command::Data, Channel::Reliable);
        header.frg_index = 2;
        header.frg_count = 5;
        header.wnd = 99;
        header.ts = 1234;
        header.sn = 42;
        header.una = 40;
        header.len = 3;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), Header::SIZE);

        let mut bytes = buf.freeze();
        let decoded = Header::decode(&mut bytes).expect("decode");
        assert_eq!(decoded, header);
        assert!(bytes.is_empty());
    }

    #[test]
    fn segment_round_trip() {
        let seg = Segment::data(1, 0, 1, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);

        let mut bytes = buf.freeze();
        let decoded = Segment::decode(&mut bytes).expect("decode");
        assert_eq!(decoded.header, seg.header);
        assert_eq!(decoded.payload, seg.payload);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let mut bytes = Bytes::from_static(&[0u8; 10]);
        assert!(Segment::decode(&mut bytes).is_none());
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let seg = Segment::ack(1, 0, 0);
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);
        buf[4] = 0xFF; // cmd byte
        let mut bytes = buf.freeze();
        assert!(Segment::decode(&mut bytes).is_none());
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let seg = Segment::data(1, 0, 1, Bytes::from_static(b"payload"));
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);
        let mut bytes = buf.freeze().slice(..Header::SIZE + 3);
        assert!(Segment::decode(&mut bytes).is_none());
    }

    #[test]
    fn decode_rejects_bad_fragment_fields() {
        let seg = Segment::data(1, 0, 1, Bytes::new());
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);
        buf[6] = 3; // frg_index
        buf[7] = 3; // frg_count, index must stay below count
        let mut bytes = buf.freeze();
        assert!(Segment::decode(&mut bytes).is_none());
    }

    #[test]
    fn multiple_segments_per_datagram() {
        let mut buf = BytesMut::new();
        Segment::ack(9, 1, 100).encode(&mut buf);
        Segment::data(9, 0, 1, Bytes::from_static(b"x")).encode(&mut buf);

        let mut bytes = buf.freeze();
        let first = Segment::decode(&mut bytes).expect("first");
        let second = Segment::decode(&mut bytes).expect("second");
        assert!(first.is_ack());
        assert!(second.is_data());
        assert!(bytes.is_empty());
    }
}
