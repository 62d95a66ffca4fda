//! Typed, length-prefixed packets over TCP, UDP and Unix sockets.
//!
//! pktwire splits a byte stream into whole packets, each carrying a 16-bit
//! type tag, and multiplexes many endpoints with a `select`-based poller.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket endpoint handles and the diagnostic channel
//! - [`frame`]: packet encoding, stream reassembly and packet I/O
//! - [`select`]: readiness multiplexing over endpoints

/// Re-export transport types.
pub mod transport {
    pub use pktwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pktwire_frame::*;
}

/// Re-export selector types.
pub mod select {
    pub use pktwire_select::*;
}
