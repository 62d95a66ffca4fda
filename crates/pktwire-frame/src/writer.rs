use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use pktwire_transport::{
    default_sink, Diagnostic, DiagnosticCode, DiagnosticSink, Endpoint, Result as TransportResult,
    SharedSink, TransportError,
};
use tracing::trace;

use crate::codec::{encode_packet, PacketConfig};
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Encode `packet` and send all of it on `endpoint`.
///
/// The whole packet is encoded before the first write, so a datagram endpoint
/// always carries one packet per datagram. Partial writes are continued;
/// `Interrupted` is retried. Any other failure is reported to `sink` and ends
/// the send immediately.
pub fn send_packet(endpoint: &Endpoint, packet: &Packet, sink: &dyn DiagnosticSink) -> Result<()> {
    let mut buf = BytesMut::with_capacity(packet.encoded_size());
    encode_packet(packet, &mut buf);
    send_all(endpoint, &buf, sink, |chunk| endpoint.send_chunk(chunk))
}

/// Encode `packet` and send it as one datagram to `addr`, regardless of the
/// endpoint's default peer. Only UDP endpoints support this; anything else
/// fails with an unsupported-operation error, reported like any other send
/// failure.
pub fn send_packet_to(
    endpoint: &Endpoint,
    packet: &Packet,
    addr: SocketAddr,
    sink: &dyn DiagnosticSink,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(packet.encoded_size());
    encode_packet(packet, &mut buf);
    send_all(endpoint, &buf, sink, |chunk| endpoint.send_chunk_to(chunk, addr))
}

fn send_all(
    endpoint: &Endpoint,
    bytes: &[u8],
    sink: &dyn DiagnosticSink,
    mut send: impl FnMut(&[u8]) -> TransportResult<usize>,
) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match send(&bytes[offset..]) {
            Ok(0) => {
                sink.report(
                    &Diagnostic::new(DiagnosticCode::SocketHangup, "peer stopped accepting bytes")
                        .with_endpoint(endpoint.label()),
                );
                return Err(FrameError::ConnectionClosed);
            }
            Ok(n) => offset += n,
            Err(TransportError::Send(err)) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                sink.report(&err.diagnostic(Some(endpoint)));
                return Err(err.into());
            }
        }
    }
    trace!(endpoint = endpoint.label(), bytes = bytes.len(), "sent packet");
    Ok(())
}

/// Sends packets on one endpoint with a fixed config and diagnostic sink.
pub struct PacketWriter {
    endpoint: Endpoint,
    buf: BytesMut,
    config: PacketConfig,
    sink: SharedSink,
}

impl PacketWriter {
    /// Create a writer with default configuration.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            buf: BytesMut::new(),
            config: PacketConfig::default(),
            sink: default_sink(),
        }
    }

    /// Create a writer and apply the configured write timeout to the endpoint.
    pub fn with_config(endpoint: Endpoint, config: PacketConfig, sink: SharedSink) -> Result<Self> {
        config.validate()?;
        if config.write_timeout.is_some() {
            endpoint.set_write_timeout(config.write_timeout)?;
        }
        Ok(Self {
            endpoint,
            buf: BytesMut::new(),
            config,
            sink,
        })
    }

    /// Build a packet from `kind` and `payload` and send it.
    ///
    /// Oversized payloads are reported as `PacketTooBig` and rejected; nothing
    /// is written.
    pub fn send(&mut self, kind: u16, payload: impl Into<Bytes>) -> Result<()> {
        let packet = match Packet::try_new(kind, payload, self.config.max_packet_size) {
            Ok(packet) => packet,
            Err(err) => {
                self.sink.report(
                    &Diagnostic::new(DiagnosticCode::PacketTooBig, err.to_string())
                        .with_endpoint(self.endpoint.label()),
                );
                return Err(err);
            }
        };
        self.write_packet(&packet)
    }

    /// Send an already built packet.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.encoded_size() > self.config.max_packet_size {
            return Err(FrameError::PacketTooLarge {
                size: packet.encoded_size(),
                max: self.config.max_packet_size,
            });
        }
        self.buf.clear();
        encode_packet(packet, &mut self.buf);
        send_all(&self.endpoint, &self.buf, &*self.sink, |chunk| self.endpoint.send_chunk(chunk))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }

    /// Consume the writer and return the endpoint.
    pub fn into_inner(self) -> Endpoint {
        self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use pktwire_transport::{NullSink, Received};

    use super::*;
    use crate::buffer::PacketBuffer;

    fn read_all(endpoint: &Endpoint, expected: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        while out.len() < expected {
            match endpoint.receive_chunk(&mut chunk).unwrap() {
                Received::Data(n) => out.extend_from_slice(&chunk[..n]),
                Received::Closed => break,
            }
        }
        out
    }

    #[test]
    fn sends_encoded_packet() {
        let (left, right) = Endpoint::unix_pair().unwrap();
        let packet = Packet::new(0x0102, &b"hi"[..]);

        send_packet(&left, &packet, &NullSink).unwrap();

        assert_eq!(read_all(&right, 6), vec![0x00, 0x06, 0x01, 0x02, b'h', b'i']);
    }

    #[test]
    fn writer_sends_multiple_packets() {
        let (left, right) = Endpoint::unix_pair().unwrap();
        let mut writer = PacketWriter::new(left);

        writer.send(1, &b"one"[..]).unwrap();
        writer.send(2, &b"two"[..]).unwrap();
        writer.write_packet(&Packet::new(3, &b"three"[..])).unwrap();

        let bytes = read_all(&right, 7 + 7 + 9);
        let mut buffer = PacketBuffer::new();
        assert_eq!(buffer.extend_from_slice(&bytes).unwrap(), 3);
        let kinds: Vec<u16> = buffer.drain().map(|p| p.kind()).collect();
        assert_eq!(kinds, vec![1, 2, 3]);
    }

    #[test]
    fn oversized_send_is_rejected_and_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |d: &Diagnostic| seen.lock().unwrap().push(d.code))
        };
        let (left, _right) = Endpoint::unix_pair().unwrap();
        let config = PacketConfig {
            max_packet_size: 8,
            ..PacketConfig::default()
        };
        let mut writer = PacketWriter::with_config(left, config, sink).unwrap();

        let err = writer.send(1, &b"oversized"[..]).unwrap_err();
        assert!(matches!(err, FrameError::PacketTooLarge { size: 13, max: 8 }));
        assert_eq!(*seen.lock().unwrap(), vec![DiagnosticCode::PacketTooBig]);
    }

    #[test]
    fn send_on_closed_peer_reports_send_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |d: &Diagnostic| seen.lock().unwrap().push(d.clone())
        };
        let (left, right) = Endpoint::unix_pair().unwrap();
        drop(right);

        let err = send_packet(&left, &Packet::new(1, &b"lost"[..]), &sink).unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::Send(_))));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, DiagnosticCode::SocketSend);
        assert!(seen[0].os_error.is_some());
        assert_eq!(seen[0].endpoint.as_deref(), Some(left.label()));
    }

    #[test]
    fn udp_packet_is_one_datagram() {
        let receiver = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut sender = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        sender.set_default_peer(Some(receiver.local_addr().unwrap()));
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        send_packet(&sender, &Packet::new(7, &b"datagram"[..]), &NullSink).unwrap();

        let mut chunk = [0u8; 64];
        let (n, _) = receiver.receive_chunk_from(&mut chunk).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&chunk[4..n], b"datagram");
    }

    #[test]
    fn send_to_ignores_default_peer() {
        let target = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let bystander = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut sender = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        sender.set_default_peer(Some(bystander.local_addr().unwrap()));
        target
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        bystander.set_nonblocking(true).unwrap();

        let to = target.local_addr().unwrap();
        send_packet_to(&sender, &Packet::new(9, &b"direct"[..]), to, &NullSink).unwrap();

        let mut chunk = [0u8; 64];
        let (n, from) = target.receive_chunk_from(&mut chunk).unwrap();
        assert_eq!(&chunk[..n], b"\x00\x0a\x00\x09direct");
        assert_eq!(from, sender.local_addr().unwrap());
        assert!(bystander.receive_chunk_from(&mut chunk).is_err());
    }

    #[test]
    fn send_to_on_stream_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |d: &Diagnostic| seen.lock().unwrap().push(d.code)
        };
        let (left, _right) = Endpoint::unix_pair().unwrap();

        let to = "127.0.0.1:9".parse().unwrap();
        let err = send_packet_to(&left, &Packet::new(1, &b"x"[..]), to, &sink).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::Unsupported { .. })
        ));
        assert_eq!(*seen.lock().unwrap(), vec![DiagnosticCode::Unknown]);
    }

    #[test]
    fn applies_write_timeout() {
        let (left, _right) = Endpoint::unix_pair().unwrap();
        let config = PacketConfig {
            write_timeout: Some(Duration::from_millis(10)),
            ..PacketConfig::default()
        };
        let writer = PacketWriter::with_config(left, config, Arc::new(NullSink));
        assert!(writer.is_ok());
    }

    #[test]
    fn accessors_and_into_inner() {
        let (left, _right) = Endpoint::unix_pair().unwrap();
        let fd = left.descriptor();
        let writer = PacketWriter::new(left);

        assert_eq!(writer.endpoint().descriptor(), fd);
        assert_eq!(writer.config().max_packet_size, 65535);
        assert_eq!(writer.into_inner().descriptor(), fd);
    }
}
