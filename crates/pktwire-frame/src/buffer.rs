use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use pktwire_transport::{default_sink, Diagnostic, DiagnosticCode, SharedSink};
use tracing::{trace, warn};

use crate::codec::{peek_header, PacketConfig, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Reassembles packets from an arbitrarily chunked byte stream.
///
/// The transport writes raw bytes into [`spare_mut`](Self::spare_mut), then
/// calls [`ingest`](Self::ingest) with the count. Every complete packet is
/// moved into a FIFO queue and its bytes are compacted out of the arena before
/// `ingest` returns, so `filled_len` only ever counts bytes of the next,
/// still-incomplete packet.
///
/// A declared length that can never be satisfied poisons the buffer; further
/// ingestion fails with [`FrameError::Poisoned`] until [`reset`](Self::reset).
pub struct PacketBuffer {
    arena: Box<[u8]>,
    filled: usize,
    completed: VecDeque<Packet>,
    max_packet_size: usize,
    poisoned: bool,
    sink: SharedSink,
}

impl PacketBuffer {
    /// A 65535-byte buffer with the default packet ceiling.
    pub fn new() -> Self {
        Self::with_config(&PacketConfig::default(), default_sink())
    }

    /// A buffer of `capacity` bytes with the default packet ceiling.
    ///
    /// Capacities below the ceiling produce an unusable buffer; see
    /// [`with_config`](Self::with_config).
    pub fn with_capacity(capacity: usize) -> Self {
        let config = PacketConfig {
            buffer_capacity: capacity,
            ..PacketConfig::default()
        };
        Self::with_config(&config, default_sink())
    }

    /// Build a buffer from explicit config and diagnostic sink.
    ///
    /// If `buffer_capacity < max_packet_size`, the result is a zero-capacity
    /// sentinel ([`is_usable`](Self::is_usable) is false) and `BufferTooSmall`
    /// is reported. Messages are never silently truncated.
    pub fn with_config(config: &PacketConfig, sink: SharedSink) -> Self {
        let max_packet_size = config
            .max_packet_size
            .clamp(HEADER_SIZE, DEFAULT_MAX_PACKET_SIZE);

        let arena = if config.buffer_capacity >= max_packet_size {
            vec![0u8; config.buffer_capacity].into_boxed_slice()
        } else {
            sink.report(&Diagnostic::new(
                DiagnosticCode::BufferTooSmall,
                format!(
                    "packet buffer capacity {} is below maximum packet size {max_packet_size}",
                    config.buffer_capacity
                ),
            ));
            Box::default()
        };

        Self {
            arena,
            filled: 0,
            completed: VecDeque::new(),
            max_packet_size,
            poisoned: false,
            sink,
        }
    }

    /// The unfilled tail of the arena. Write received bytes here, then call
    /// [`ingest`](Self::ingest).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.arena[self.filled..]
    }

    /// Account for `received` new bytes at the tail and extract every packet
    /// now complete. Returns how many packets this call completed.
    pub fn ingest(&mut self, received: usize) -> Result<usize> {
        self.check_ready()?;
        if received > self.arena.len() - self.filled {
            return Err(FrameError::Overrun {
                filled: self.filled,
                incoming: received,
                capacity: self.arena.len(),
            });
        }
        self.filled += received;

        let mut produced = 0usize;
        while let Some(header) = peek_header(&self.arena[..self.filled]) {
            let declared = header.length as usize;
            if declared < HEADER_SIZE
                || declared > self.arena.len()
                || declared > self.max_packet_size
            {
                return Err(self.poison(declared));
            }
            if self.filled < declared {
                break;
            }

            let payload = Bytes::copy_from_slice(&self.arena[HEADER_SIZE..declared]);
            self.completed.push_back(Packet::with_limit(
                header.kind,
                payload,
                self.max_packet_size,
                &*self.sink,
            ));

            let old_filled = self.filled;
            self.arena.copy_within(declared..old_filled, 0);
            self.filled = old_filled - declared;
            self.arena[self.filled..old_filled].fill(0);
            produced += 1;
        }

        trace!(
            produced,
            filled = self.filled,
            queued = self.completed.len(),
            "ingested bytes"
        );
        Ok(produced)
    }

    /// Copy `data` into the arena and ingest it, in as many steps as the free
    /// space requires. Returns how many packets were completed.
    pub fn extend_from_slice(&mut self, mut data: &[u8]) -> Result<usize> {
        self.check_ready()?;
        let mut produced = 0usize;
        while !data.is_empty() {
            let spare = self.spare_mut();
            let n = spare.len().min(data.len());
            if n == 0 {
                return Err(FrameError::Overrun {
                    filled: self.filled,
                    incoming: data.len(),
                    capacity: self.arena.len(),
                });
            }
            spare[..n].copy_from_slice(&data[..n]);
            produced += self.ingest(n)?;
            data = &data[n..];
        }
        Ok(produced)
    }

    /// Remove and return the oldest completed packet, or `None` if there is
    /// none. Calling it on an empty queue is harmless.
    pub fn take_packet(&mut self) -> Option<Packet> {
        self.completed.pop_front()
    }

    /// Remove all completed packets, oldest first.
    pub fn drain(&mut self) -> Drain<'_, Packet> {
        self.completed.drain(..)
    }

    pub fn has_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Bytes held that do not yet form a complete packet.
    pub fn filled_len(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// False for the zero-capacity sentinel built from an undersized config.
    pub fn is_usable(&self) -> bool {
        !self.arena.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Discard held bytes and queued packets and clear the poisoned state.
    pub fn reset(&mut self) {
        self.arena.fill(0);
        self.filled = 0;
        self.completed.clear();
        self.poisoned = false;
    }

    pub(crate) fn check_ready(&self) -> Result<()> {
        if !self.is_usable() {
            return Err(FrameError::BufferUnusable);
        }
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        Ok(())
    }

    fn poison(&mut self, declared: usize) -> FrameError {
        self.poisoned = true;
        let err = FrameError::Desynchronized {
            declared,
            capacity: self.arena.len(),
        };
        warn!(declared, capacity = self.arena.len(), "packet framing desynchronized");
        self.sink.report(&Diagnostic::new(
            DiagnosticCode::PayloadExceedsBuffer,
            err.to_string(),
        ));
        err
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("capacity", &self.arena.len())
            .field("filled", &self.filled)
            .field("completed", &self.completed.len())
            .field("max_packet_size", &self.max_packet_size)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
