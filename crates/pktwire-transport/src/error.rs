use std::path::PathBuf;

use crate::diagnostic::{Diagnostic, DiagnosticCode};
use crate::endpoint::Endpoint;

/// Errors that can occur in socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// `setsockopt` failed.
    #[error("failed to set socket option {option}: {source}")]
    SetOption {
        option: &'static str,
        source: std::io::Error,
    },

    /// `getsockopt` failed.
    #[error("failed to read socket option {option}: {source}")]
    GetOption {
        option: &'static str,
        source: std::io::Error,
    },

    /// Sending on the endpoint failed.
    #[error("send failed: {0}")]
    Send(std::io::Error),

    /// Receiving on the endpoint failed.
    #[error("receive failed: {0}")]
    Receive(std::io::Error),

    /// The operation does not apply to this kind of endpoint.
    #[error("{operation} is not supported on {kind} endpoints")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Diagnostic code for this failure.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::Bind { .. } | Self::PathTooLong { .. } => DiagnosticCode::SocketBind,
            Self::Connect { .. } => DiagnosticCode::SocketConnect,
            Self::Accept(_) => DiagnosticCode::SocketAccept,
            Self::SetOption { .. } => DiagnosticCode::SocketSetOption,
            Self::GetOption { .. } => DiagnosticCode::SocketGetOption,
            Self::Send(_) => DiagnosticCode::SocketSend,
            Self::Receive(_) => DiagnosticCode::SocketReceive,
            Self::Unsupported { .. } | Self::Io(_) => DiagnosticCode::Unknown,
        }
    }

    /// Underlying OS error number, when there is one.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Bind { source, .. }
            | Self::Connect { source, .. }
            | Self::SetOption { source, .. }
            | Self::GetOption { source, .. } => source.raw_os_error(),
            Self::Accept(err) | Self::Send(err) | Self::Receive(err) | Self::Io(err) => {
                err.raw_os_error()
            }
            Self::Unsupported { .. } | Self::PathTooLong { .. } => None,
        }
    }

    /// Build a diagnostic report, optionally naming the endpoint involved.
    pub fn diagnostic(&self, endpoint: Option<&Endpoint>) -> Diagnostic {
        let diagnostic =
            Diagnostic::new(self.code(), self.to_string()).with_os_error(self.os_error());
        match endpoint {
            Some(endpoint) => diagnostic.with_endpoint(endpoint.label()),
            None => diagnostic,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
