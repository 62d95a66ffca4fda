//! Typed, length-prefixed packets over pktwire endpoints.
//!
//! Every packet is framed with:
//! - A 2-byte big-endian total length (header included)
//! - A 2-byte big-endian type tag
//!
//! [`PacketBuffer`] turns an arbitrarily chunked byte stream back into whole
//! packets; [`PacketReader`] and [`PacketWriter`] pair it with an endpoint.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod packet;
pub mod reader;
pub mod writer;

pub use buffer::PacketBuffer;
pub use codec::{
    decode_packet, encode_packet, peek_header, Header, PacketConfig, DEFAULT_MAX_PACKET_SIZE,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use packet::{Packet, EMPTY_KIND};
pub use reader::{receive_once, receive_once_from, receive_packets, PacketReader};
pub use writer::{send_packet, send_packet_to, PacketWriter};
