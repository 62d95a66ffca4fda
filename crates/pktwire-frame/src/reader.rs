use std::io::ErrorKind;
use std::net::SocketAddr;

use pktwire_transport::{
    default_sink, Diagnostic, DiagnosticCode, DiagnosticSink, Endpoint, Received, SharedSink,
    TransportError,
};
use tracing::{debug, trace};

use crate::buffer::PacketBuffer;
use crate::codec::PacketConfig;
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Perform exactly one receive on `endpoint` into `buffer`'s free space and
/// reassemble whatever completed. Returns how many packets this read finished.
///
/// A poisoned or unusable buffer fails before anything is read, so no bytes
/// are pulled off the wire and lost. An orderly close is reported as
/// `SocketHangup` and returned as [`FrameError::ConnectionClosed`].
/// `WouldBlock` and timeouts are returned without being reported; see
/// [`FrameError::is_would_block`].
pub fn receive_once(
    endpoint: &Endpoint,
    buffer: &mut PacketBuffer,
    sink: &dyn DiagnosticSink,
) -> Result<usize> {
    buffer.check_ready()?;
    loop {
        match endpoint.receive_chunk(buffer.spare_mut()) {
            Ok(Received::Data(n)) => return buffer.ingest(n),
            Ok(Received::Closed) => {
                debug!(
                    endpoint = endpoint.label(),
                    held = buffer.filled_len(),
                    "peer closed connection"
                );
                sink.report(
                    &Diagnostic::new(DiagnosticCode::SocketHangup, "peer closed the connection")
                        .with_endpoint(endpoint.label()),
                );
                return Err(FrameError::ConnectionClosed);
            }
            Err(TransportError::Receive(err)) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(receive_failed(endpoint, err, sink)),
        }
    }
}

/// Datagram counterpart of [`receive_once`]: one `recvfrom` into `buffer`'s
/// free space, returning how many packets completed and who sent them.
///
/// Failures follow the same rules as [`receive_once`]. Endpoints other than
/// UDP sockets fail with an unsupported-operation error.
pub fn receive_once_from(
    endpoint: &Endpoint,
    buffer: &mut PacketBuffer,
    sink: &dyn DiagnosticSink,
) -> Result<(usize, SocketAddr)> {
    buffer.check_ready()?;
    loop {
        match endpoint.receive_chunk_from(buffer.spare_mut()) {
            Ok((n, from)) => {
                trace!(endpoint = endpoint.label(), %from, bytes = n, "received datagram");
                return buffer.ingest(n).map(|completed| (completed, from));
            }
            Err(TransportError::Receive(err)) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(receive_failed(endpoint, err, sink)),
        }
    }
}

fn receive_failed(
    endpoint: &Endpoint,
    err: TransportError,
    sink: &dyn DiagnosticSink,
) -> FrameError {
    let err = FrameError::from(err);
    if !err.is_would_block() {
        if let FrameError::Transport(transport) = &err {
            sink.report(&transport.diagnostic(Some(endpoint)));
        }
    }
    err
}

/// Receive until at least one packet is complete. Returns how many packets
/// the final read finished; earlier reads only added partial bytes.
pub fn receive_packets(
    endpoint: &Endpoint,
    buffer: &mut PacketBuffer,
    sink: &dyn DiagnosticSink,
) -> Result<usize> {
    loop {
        let produced = receive_once(endpoint, buffer, sink)?;
        if buffer.has_completed() {
            return Ok(produced);
        }
    }
}

/// Reads whole packets from one endpoint through a private reassembly buffer.
pub struct PacketReader {
    endpoint: Endpoint,
    buffer: PacketBuffer,
    sink: SharedSink,
}

impl PacketReader {
    /// Create a reader with default configuration.
    pub fn new(endpoint: Endpoint) -> Self {
        let sink = default_sink();
        Self {
            endpoint,
            buffer: PacketBuffer::with_config(&PacketConfig::default(), sink.clone()),
            sink,
        }
    }

    /// Create a reader and apply the configured read timeout to the endpoint.
    pub fn with_config(endpoint: Endpoint, config: PacketConfig, sink: SharedSink) -> Result<Self> {
        config.validate()?;
        if config.read_timeout.is_some() {
            endpoint.set_read_timeout(config.read_timeout)?;
        }
        Ok(Self {
            endpoint,
            buffer: PacketBuffer::with_config(&config, sink.clone()),
            sink,
        })
    }

    /// Return the next packet, blocking until one is complete.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.buffer.take_packet() {
                return Ok(packet);
            }
            receive_packets(&self.endpoint, &mut self.buffer, &*self.sink)?;
        }
    }

    /// Perform a single receive; useful after a selector reported readiness.
    pub fn fill(&mut self) -> Result<usize> {
        receive_once(&self.endpoint, &mut self.buffer, &*self.sink)
    }

    /// Take the oldest packet already reassembled, without touching the endpoint.
    pub fn try_packet(&mut self) -> Option<Packet> {
        self.buffer.take_packet()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buffer
    }

    /// Consume the reader and return the endpoint. Buffered bytes are lost.
    pub fn into_inner(self) -> Endpoint {
        self.endpoint
    }
}
