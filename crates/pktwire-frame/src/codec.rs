use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Packet header: total length (2) + type (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum encoded packet size. The length field represents it exactly.
pub const DEFAULT_MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// A parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total encoded length, header included.
    pub length: u16,
    pub kind: u16,
}

impl Header {
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }
}

/// Read the header at the front of `src` without consuming anything.
///
/// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn peek_header(src: &[u8]) -> Option<Header> {
    if src.len() < HEADER_SIZE {
        return None;
    }
    Some(Header {
        length: u16::from_be_bytes([src[0], src[1]]),
        kind: u16::from_be_bytes([src[2], src[3]]),
    })
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬───────────┬──────────────────────┐
/// │ Length (2B BE)   │ Type      │ Payload              │
/// │ header + payload │ (2B BE)   │ (Length - 4 bytes)   │
/// └──────────────────┴───────────┴──────────────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) {
    dst.reserve(packet.encoded_size());
    dst.put_u16(packet.encoded_size() as u16);
    dst.put_u16(packet.kind());
    dst.put_slice(packet.payload());
}

/// Decode a packet from a growable buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>> {
    let Some(header) = peek_header(&src[..]) else {
        return Ok(None);
    };

    let total = header.length as usize;
    if total < HEADER_SIZE || total > max_packet_size {
        return Err(FrameError::Desynchronized {
            declared: total,
            capacity: max_packet_size,
        });
    }
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(total - HEADER_SIZE).freeze();
    Packet::try_new(header.kind, payload, max_packet_size).map(Some)
}

/// Configuration for packet buffers and packet I/O.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum encoded packet size in bytes. Default: 65535.
    pub max_packet_size: usize,
    /// Reassembly arena size. Must be at least `max_packet_size`. Default: 65535.
    pub buffer_capacity: usize,
    /// Read timeout applied to endpoints by [`PacketReader`](crate::PacketReader).
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to endpoints by [`PacketWriter`](crate::PacketWriter).
    pub write_timeout: Option<Duration>,
}

impl PacketConfig {
    /// Check that the ceiling fits the 16-bit length field and the arena can
    /// hold a maximum-size packet.
    pub fn validate(&self) -> Result<()> {
        if !(HEADER_SIZE..=DEFAULT_MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(FrameError::InvalidConfig(format!(
                "max_packet_size must be in {HEADER_SIZE}..={DEFAULT_MAX_PACKET_SIZE}, got {}",
                self.max_packet_size
            )));
        }
        if self.buffer_capacity < self.max_packet_size {
            return Err(FrameError::InvalidConfig(format!(
                "buffer_capacity {} is below max_packet_size {}",
                self.buffer_capacity, self.max_packet_size
            )));
        }
        Ok(())
    }
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            buffer_capacity: DEFAULT_MAX_PACKET_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::packet::EMPTY_KIND;

    #[test]
    fn wire_layout_is_big_endian() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(0x0102, &b"ab"[..]), &mut buf);
        assert_eq!(buf.as_ref(), &[0x00, 0x06, 0x01, 0x02, b'a', b'b']);
    }

    #[test]
    fn sentinel_encodes_as_bare_header() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::empty(), &mut buf);
        assert_eq!(buf.as_ref(), &[0x00, 0x04, 0xFF, 0xFF]);

        let decoded = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.kind(), EMPTY_KIND);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x00, 0x08, 0x00][..]);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .unwrap()
            .is_none());
        assert!(peek_header(&buf).is_none());
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(1, &b"hello"[..]), &mut buf);
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2, "nothing consumed");
    }

    #[test]
    fn decode_rejects_impossible_lengths() {
        let mut short = BytesMut::from(&[0x00, 0x02, 0x00, 0x01][..]);
        assert!(matches!(
            decode_packet(&mut short, DEFAULT_MAX_PACKET_SIZE),
            Err(FrameError::Desynchronized { declared: 2, .. })
        ));

        let mut long = BytesMut::from(&[0x01, 0x00, 0x00, 0x01][..]);
        assert!(matches!(
            decode_packet(&mut long, 64),
            Err(FrameError::Desynchronized { declared: 256, .. })
        ));
    }

    #[test]
    fn multiple_packets_in_order() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::new(1, &b"first"[..]), &mut buf);
        encode_packet(&Packet::new(2, &b"second"[..]), &mut buf);

        let p1 = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .unwrap()
            .unwrap();
        let p2 = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!((p1.kind(), p1.payload().as_ref()), (1, b"first".as_ref()));
        assert_eq!((p2.kind(), p2.payload().as_ref()), (2, b"second".as_ref()));
        assert!(buf.is_empty());
    }

    #[test]
    fn header_payload_len() {
        let header = peek_header(&[0x00, 0x0A, 0x00, 0x03]).unwrap();
        assert_eq!(header.length, 10);
        assert_eq!(header.kind, 3);
        assert_eq!(header.payload_len(), 6);
    }

    #[test]
    fn config_validation() {
        assert!(PacketConfig::default().validate().is_ok());

        let too_big = PacketConfig {
            max_packet_size: 70_000,
            buffer_capacity: 70_000,
            ..PacketConfig::default()
        };
        assert!(matches!(too_big.validate(), Err(FrameError::InvalidConfig(_))));

        let small_arena = PacketConfig {
            max_packet_size: 1024,
            buffer_capacity: 512,
            ..PacketConfig::default()
        };
        assert!(small_arena.validate().is_err());

        let payload = Bytes::from_static(b"x");
        assert_eq!(Packet::new(9, payload).encoded_size(), 5);
    }
}
