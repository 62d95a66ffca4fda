use bytes::Bytes;
use pktwire_transport::{Diagnostic, DiagnosticCode, DiagnosticSink, TracingSink};

use crate::codec::{DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Type tag reserved for the empty sentinel packet.
pub const EMPTY_KIND: u16 = u16::MAX;

/// A typed, length-delimited unit of application data.
///
/// Immutable once built. `encoded_size` is fixed at construction and always
/// equals `HEADER_SIZE + payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: u16,
    payload: Bytes,
    encoded_size: u16,
}

impl Packet {
    /// Build a packet against the default 65535-byte ceiling.
    ///
    /// An oversized payload yields [`Packet::empty`] and is reported as
    /// `PacketTooBig` through tracing. Use [`Packet::try_new`] to get an error
    /// instead.
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self::with_limit(kind, payload, DEFAULT_MAX_PACKET_SIZE, &TracingSink)
    }

    /// Build a packet against an explicit ceiling, reporting oversize to `sink`.
    ///
    /// `kind == EMPTY_KIND` yields the sentinel and the payload is ignored.
    pub fn with_limit(
        kind: u16,
        payload: impl Into<Bytes>,
        max_packet_size: usize,
        sink: &dyn DiagnosticSink,
    ) -> Self {
        match Self::try_new(kind, payload, max_packet_size) {
            Ok(packet) => packet,
            Err(err) => {
                sink.report(&Diagnostic::new(
                    DiagnosticCode::PacketTooBig,
                    err.to_string(),
                ));
                Self::empty()
            }
        }
    }

    /// Build a packet, failing if its encoding would exceed `max_packet_size`.
    pub fn try_new(kind: u16, payload: impl Into<Bytes>, max_packet_size: usize) -> Result<Self> {
        if kind == EMPTY_KIND {
            return Ok(Self::empty());
        }

        let payload = payload.into();
        let size = HEADER_SIZE + payload.len();
        let max = max_packet_size.min(DEFAULT_MAX_PACKET_SIZE);
        if size > max {
            return Err(FrameError::PacketTooLarge { size, max });
        }

        Ok(Self {
            kind,
            payload,
            encoded_size: size as u16,
        })
    }

    /// The sentinel "no message" packet.
    pub fn empty() -> Self {
        Self {
            kind: EMPTY_KIND,
            payload: Bytes::new(),
            encoded_size: HEADER_SIZE as u16,
        }
    }

    pub fn kind(&self) -> u16 {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Header plus payload length, as written in the length field.
    pub fn encoded_size(&self) -> usize {
        self.encoded_size as usize
    }

    pub fn is_empty_packet(&self) -> bool {
        self.kind == EMPTY_KIND
    }

    /// Consume the packet, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recording_sink() -> (Arc<Mutex<Vec<Diagnostic>>>, impl DiagnosticSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |d: &Diagnostic| seen.lock().unwrap().push(d.clone())
        };
        (seen, sink)
    }

    #[test]
    fn encoded_size_counts_header() {
        let packet = Packet::new(7, &b"hello"[..]);
        assert_eq!(packet.kind(), 7);
        assert_eq!(packet.payload().as_ref(), b"hello");
        assert_eq!(packet.encoded_size(), HEADER_SIZE + 5);
        assert!(!packet.is_empty_packet());
    }

    #[test]
    fn empty_kind_ignores_payload() {
        let packet = Packet::new(EMPTY_KIND, &b"dropped"[..]);
        assert_eq!(packet, Packet::empty());
        assert_eq!(packet.encoded_size(), HEADER_SIZE);
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn largest_payload_fits_exactly() {
        let payload = vec![0x5A; DEFAULT_MAX_PACKET_SIZE - HEADER_SIZE];
        let packet = Packet::new(1, payload);
        assert_eq!(packet.encoded_size(), DEFAULT_MAX_PACKET_SIZE);
    }

    #[test]
    fn oversized_payload_yields_sentinel_and_reports() {
        let (seen, sink) = recording_sink();
        let payload = vec![0u8; DEFAULT_MAX_PACKET_SIZE - HEADER_SIZE + 1];

        let packet = Packet::with_limit(3, payload, DEFAULT_MAX_PACKET_SIZE, &sink);

        assert!(packet.is_empty_packet());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, DiagnosticCode::PacketTooBig);
    }

    #[test]
    fn custom_ceiling_is_enforced() {
        let (seen, sink) = recording_sink();
        let packet = Packet::with_limit(1, &b"0123456789"[..], 8, &sink);
        assert!(packet.is_empty_packet());
        assert_eq!(seen.lock().unwrap().len(), 1);

        let err = Packet::try_new(1, &b"0123456789"[..], 8).unwrap_err();
        assert!(matches!(err, FrameError::PacketTooLarge { size: 14, max: 8 }));
    }

    #[test]
    fn ceiling_never_exceeds_length_field() {
        let payload = vec![0u8; DEFAULT_MAX_PACKET_SIZE];
        let err = Packet::try_new(1, payload, usize::MAX).unwrap_err();
        assert!(matches!(err, FrameError::PacketTooLarge { max, .. } if max == DEFAULT_MAX_PACKET_SIZE));
    }
}
