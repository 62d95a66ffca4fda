//! Socket endpoint handles for pktwire.
//!
//! This is the lowest layer of pktwire. It provides:
//! - [`Endpoint`], a reference-counted handle over TCP, UDP and Unix sockets
//!   exposing chunked send/receive and a descriptor for readiness polling
//! - the diagnostic channel ([`DiagnosticSink`]) used by every layer above
//!
//! Everything else builds on these two pieces.

#[cfg(not(unix))]
compile_error!("pktwire-transport currently supports Unix platforms only");

pub mod diagnostic;
pub mod endpoint;
pub mod error;
pub mod options;

pub use diagnostic::{
    default_sink, Diagnostic, DiagnosticCode, DiagnosticSink, NullSink, SharedSink, TracingSink,
};
pub use endpoint::{Endpoint, EndpointKind, Received};
pub use error::{Result, TransportError};
pub use options::SocketOption;
