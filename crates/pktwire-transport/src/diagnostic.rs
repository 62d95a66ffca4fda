//! Diagnostic reporting channel.
//!
//! Components never abort or change control flow because of a report; a
//! [`DiagnosticSink`] only observes. Each buffer, selector and packet I/O call
//! takes its own sink, so tests can substitute a recording closure.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

/// Numeric diagnostic codes.
///
/// Values are stable and grouped by origin: 1xx sockets, 2xx packets and
/// buffers, 3xx selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DiagnosticCode {
    Unknown = 0,
    SocketCreate = 100,
    SocketBind = 110,
    SocketConnect = 111,
    SocketListen = 112,
    SocketAccept = 113,
    SocketSetOption = 114,
    SocketGetOption = 115,
    SocketSend = 116,
    SocketReceive = 117,
    SocketHangup = 118,
    PacketTooBig = 200,
    BufferTooSmall = 250,
    PayloadExceedsBuffer = 251,
    SelectorFail = 300,
    SelectorTimeout = 301,
    SelectorNoTarget = 302,
}

impl DiagnosticCode {
    /// The numeric value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Short stable name, used as a structured log field.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::SocketCreate => "socket-create",
            Self::SocketBind => "socket-bind",
            Self::SocketConnect => "socket-connect",
            Self::SocketListen => "socket-listen",
            Self::SocketAccept => "socket-accept",
            Self::SocketSetOption => "socket-setsockopt",
            Self::SocketGetOption => "socket-getsockopt",
            Self::SocketSend => "socket-send",
            Self::SocketReceive => "socket-receive",
            Self::SocketHangup => "socket-hangup",
            Self::PacketTooBig => "packet-too-big",
            Self::BufferTooSmall => "buffer-too-small",
            Self::PayloadExceedsBuffer => "payload-exceeds-buffer",
            Self::SelectorFail => "selector-fail",
            Self::SelectorTimeout => "selector-timeout",
            Self::SelectorNoTarget => "selector-no-target",
        }
    }

    /// False for informational codes (a poll timing out is not a failure).
    pub fn is_error(self) -> bool {
        !matches!(self, Self::SelectorTimeout)
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// A single report delivered to a [`DiagnosticSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    /// Label of the endpoint involved, if any.
    pub endpoint: Option<String>,
    /// Raw OS error number, if the condition came from a system call.
    pub os_error: Option<i32>,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            endpoint: None,
            os_error: None,
            detail: detail.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_os_error(mut self, errno: Option<i32>) -> Self {
        self.os_error = errno;
        self
    }

    /// Build a report from an I/O error, capturing its errno.
    pub fn from_io(code: DiagnosticCode, err: &std::io::Error) -> Self {
        Self::new(code, err.to_string()).with_os_error(err.raw_os_error())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, " [endpoint {endpoint}]")?;
        }
        if let Some(errno) = self.os_error {
            write!(f, " [errno {errno}]")?;
        }
        Ok(())
    }
}

/// Receives diagnostics. Implementations must not panic.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn report(&self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}

/// Shared, clonable sink handle.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        let endpoint = diagnostic.endpoint.as_deref().unwrap_or("-");
        if diagnostic.code.is_error() {
            warn!(
                code = diagnostic.code.as_u32(),
                kind = diagnostic.code.name(),
                endpoint,
                os_error = diagnostic.os_error,
                "{}",
                diagnostic.detail
            );
        } else {
            debug!(
                code = diagnostic.code.as_u32(),
                kind = diagnostic.code.name(),
                endpoint,
                "{}",
                diagnostic.detail
            );
        }
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _diagnostic: &Diagnostic) {}
}

/// The sink used when none is supplied.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
